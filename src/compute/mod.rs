//! Compute module - Genomes, networks, novelty scoring and the evolution loop.

mod genome;
mod graph;
mod innovation;
mod network;
mod novelty;
mod parallel;
mod population;
mod reporting;
mod reproduction;
mod species;

pub use genome::*;
pub use graph::*;
pub use innovation::*;
pub use network::*;
pub use novelty::*;
pub use parallel::*;
pub use population::*;
pub use reporting::*;
pub use reproduction::*;
pub use species::*;
