//! NS-NEAT - Novelty Search over NEAT genomes.
//!
//! This crate evolves neural-network controllers with NEAT (speciation,
//! historical markings, structural mutation and crossover) while selecting
//! for behavioral novelty instead of, or blended with, task reward.
//!
//! # Architecture
//!
//! The crate is split into two main modules:
//!
//! - `schema`: Run configuration, gene function sets and statistics types
//! - `compute`: Genomes, network decoding, novelty archive, speciation,
//!   parallel evaluation and the population engine
//!
//! # Example
//!
//! ```rust,no_run
//! use ns_neat::{
//!     compute::{AgentError, FeedForwardNetwork, ParallelEvaluator, Population, StdOutReporter},
//!     schema::{EvaluationResult, NeatConfig},
//! };
//!
//! let config = NeatConfig::default();
//!
//! // Score a controller: reward plus a behavior descriptor.
//! let agent = |_key: u64, net: &mut FeedForwardNetwork, _generation: usize|
//!  -> Result<EvaluationResult, AgentError> {
//!     let out = net.activate(&[0.5, -0.5])?;
//!     Ok(EvaluationResult::new(out.iter().sum(), out))
//! };
//! let evaluator =
//!     ParallelEvaluator::new(agent, FeedForwardNetwork::create, &config.evaluation).unwrap();
//!
//! let mut population = Population::new(config).unwrap();
//! population.add_reporter(Box::new(StdOutReporter::new(false)));
//! let best = population.run(&evaluator, 50).unwrap();
//! println!("Best reward: {}", best.score.reward);
//! ```

pub mod compute;
pub mod schema;

// Re-export commonly used types
pub use compute::{FeedForwardNetwork, Genome, NeatError, ParallelEvaluator, Population};
pub use schema::{EvaluationResult, NeatConfig};
