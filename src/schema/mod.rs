//! Schema module - Configuration, gene function sets and run statistics types.

mod config;
mod evolution;
mod functions;

pub use config::*;
pub use evolution::*;
pub use functions::*;
