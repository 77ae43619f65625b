//! Run-wide bookkeeping of structural innovations.
//!
//! Every distinct `(input, output)` connection receives one innovation id the
//! first time any genome in the run grows it, and every later occurrence in any
//! lineage reuses that id. Splitting the same connection more than once within
//! a single generation yields the same hidden node key, so identical
//! structural mutations line up during crossover and distance computation.
//!
//! The tracker is owned by the population and only touched on the orchestrating
//! thread between evaluations.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use super::genome::{ConnectionKey, Genome, NodeKey};
use crate::schema::GenomeConfig;

/// Innovation id and node key allocator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InnovationTracker {
    next_node_key: NodeKey,
    next_innovation: u64,
    #[serde(with = "crate::compute::genome::pairs")]
    innovations: BTreeMap<ConnectionKey, u64>,
    /// Node keys created by splits in the current generation.
    #[serde(skip)]
    splits: HashMap<ConnectionKey, NodeKey>,
}

impl InnovationTracker {
    /// Start a fresh run.
    ///
    /// Keys `num_outputs..num_outputs + num_hidden` are reserved for the
    /// hidden nodes every seeded genome starts with; fresh keys begin after.
    pub fn new(config: &GenomeConfig) -> Self {
        Self {
            next_node_key: (config.num_outputs + config.num_hidden) as NodeKey,
            next_innovation: 0,
            innovations: BTreeMap::new(),
            splits: HashMap::new(),
        }
    }

    /// Forget the per-generation split registry.
    pub fn begin_generation(&mut self) {
        self.splits.clear();
    }

    /// Innovation id for a connection, assigning a new one on first sight.
    pub fn connection_innovation(&mut self, key: ConnectionKey) -> u64 {
        if let Some(&innovation) = self.innovations.get(&key) {
            return innovation;
        }
        let innovation = self.next_innovation;
        self.next_innovation += 1;
        self.innovations.insert(key, innovation);
        innovation
    }

    /// Hidden node key for splitting `key` in `genome`.
    ///
    /// Reuses the key handed out for the same split earlier this generation
    /// unless the genome already contains that node.
    pub fn split_node(&mut self, key: ConnectionKey, genome: &Genome) -> NodeKey {
        if let Some(&node) = self.splits.get(&key)
            && !genome.nodes.contains_key(&node)
        {
            return node;
        }
        let node = self.next_node_key();
        self.splits.insert(key, node);
        node
    }

    /// Allocate a fresh hidden node key.
    pub fn next_node_key(&mut self) -> NodeKey {
        let node = self.next_node_key;
        self.next_node_key += 1;
        node
    }

    /// Number of distinct connections seen so far.
    pub fn innovation_count(&self) -> u64 {
        self.next_innovation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_connection_same_innovation() {
        let config = GenomeConfig::default();
        let mut tracker = InnovationTracker::new(&config);
        let a = tracker.connection_innovation((-1, 0));
        let b = tracker.connection_innovation((-2, 0));
        let c = tracker.connection_innovation((-1, 0));
        assert_eq!(a, c);
        assert_ne!(a, b);
        assert_eq!(tracker.innovation_count(), 2);
    }

    #[test]
    fn test_hidden_keys_start_after_outputs() {
        let config = GenomeConfig {
            num_outputs: 3,
            ..Default::default()
        };
        let mut tracker = InnovationTracker::new(&config);
        assert_eq!(tracker.next_node_key(), 3);
        assert_eq!(tracker.next_node_key(), 4);

        let config = GenomeConfig {
            num_outputs: 3,
            num_hidden: 2,
            ..Default::default()
        };
        let mut tracker = InnovationTracker::new(&config);
        assert_eq!(tracker.next_node_key(), 5);
    }

    #[test]
    fn test_split_reuse_within_generation() {
        let config = GenomeConfig::default();
        let mut tracker = InnovationTracker::new(&config);
        let genome = Genome::new(0);

        let first = tracker.split_node((-1, 0), &genome);
        let second = tracker.split_node((-1, 0), &genome);
        assert_eq!(first, second);

        tracker.begin_generation();
        let third = tracker.split_node((-1, 0), &genome);
        assert_ne!(first, third);
    }

    #[test]
    fn test_serde_roundtrip_keeps_innovations() {
        let config = GenomeConfig::default();
        let mut tracker = InnovationTracker::new(&config);
        tracker.connection_innovation((-1, 0));
        tracker.connection_innovation((-2, 1));

        let json = serde_json::to_string(&tracker).unwrap();
        let mut restored: InnovationTracker = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.connection_innovation((-2, 1)), 1);
        assert_eq!(restored.connection_innovation((-1, 1)), 2);
    }
}
