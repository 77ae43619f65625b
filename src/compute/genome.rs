//! NEAT genome encoding and the variation operators acting on it.
//!
//! A genome is a set of node genes (outputs and hidden nodes, keyed by
//! [`NodeKey`]) plus a set of connection genes keyed by their endpoints.
//! Inputs are implicit pins with keys `-1..=-num_inputs` and never carry a
//! node gene. Every connection gene carries the run-wide innovation id of its
//! endpoint pair so homologous genes line up across lineages.

use std::collections::{BTreeMap, BTreeSet};

use rand::prelude::*;
use serde::{Deserialize, Serialize};

use super::graph::{creates_cycle, feed_forward_order, required_for_output};
use super::innovation::InnovationTracker;
use crate::schema::{
    Activation, Aggregation, ChoiceGeneConfig, FloatGeneConfig, GenomeConfig, InitType,
    InitialConnection,
};

/// Identifier of a genome within a run.
pub type GenomeKey = u64;
/// Identifier of a node. Negative keys are inputs.
pub type NodeKey = i64;
/// A connection is identified by its `(input, output)` endpoints.
pub type ConnectionKey = (NodeKey, NodeKey);

/// Probability that a matching gene disabled in either parent stays disabled.
const INHERIT_DISABLED_PROB: f32 = 0.75;

/// Serialize a map with non-string keys as a sequence of pairs.
pub(crate) mod pairs {
    use std::collections::BTreeMap;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<K, V, S>(map: &BTreeMap<K, V>, serializer: S) -> Result<S::Ok, S::Error>
    where
        K: Serialize,
        V: Serialize,
        S: Serializer,
    {
        serializer.collect_seq(map.iter())
    }

    pub fn deserialize<'de, K, V, D>(deserializer: D) -> Result<BTreeMap<K, V>, D::Error>
    where
        K: Deserialize<'de> + Ord,
        V: Deserialize<'de>,
        D: Deserializer<'de>,
    {
        let pairs = Vec::<(K, V)>::deserialize(deserializer)?;
        Ok(pairs.into_iter().collect())
    }
}

/// A hidden or output node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeGene {
    pub key: NodeKey,
    pub bias: f32,
    pub response: f32,
    pub activation: Activation,
    pub aggregation: Aggregation,
}

impl NodeGene {
    /// Attribute distance between two genes for the same node.
    fn distance(&self, other: &NodeGene) -> f32 {
        let mut d = (self.bias - other.bias).abs() + (self.response - other.response).abs();
        if self.activation != other.activation {
            d += 1.0;
        }
        if self.aggregation != other.aggregation {
            d += 1.0;
        }
        d
    }
}

/// A weighted directed edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionGene {
    pub key: ConnectionKey,
    pub weight: f32,
    pub enabled: bool,
    pub innovation: u64,
}

impl ConnectionGene {
    fn distance(&self, other: &ConnectionGene) -> f32 {
        let mut d = (self.weight - other.weight).abs();
        if self.enabled != other.enabled {
            d += 1.0;
        }
        d
    }
}

/// An evolvable network description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Genome {
    pub key: GenomeKey,
    pub nodes: BTreeMap<NodeKey, NodeGene>,
    #[serde(with = "pairs")]
    pub connections: BTreeMap<ConnectionKey, ConnectionGene>,
}

impl Genome {
    /// A genome with no genes at all.
    pub fn new(key: GenomeKey) -> Self {
        Self {
            key,
            nodes: BTreeMap::new(),
            connections: BTreeMap::new(),
        }
    }

    /// `(node count, enabled connection count)`.
    pub fn size(&self) -> (usize, usize) {
        let enabled = self.connections.values().filter(|c| c.enabled).count();
        (self.nodes.len(), enabled)
    }

    /// Keys of hidden nodes (node genes that are not outputs).
    pub fn hidden_keys(&self, config: &GenomeConfig) -> Vec<NodeKey> {
        self.nodes
            .keys()
            .copied()
            .filter(|&k| !is_output(k, config))
            .collect()
    }

    /// Endpoints of enabled connections.
    pub fn enabled_connection_keys(&self) -> Vec<ConnectionKey> {
        self.connections
            .values()
            .filter(|c| c.enabled)
            .map(|c| c.key)
            .collect()
    }

    /// Genetic distance to another genome.
    pub fn distance(&self, other: &Genome, config: &GenomeConfig) -> f32 {
        genetic_distance(self, other, config)
    }

    /// Check the structural invariants every genome must hold.
    pub fn validate(&self, config: &GenomeConfig) -> Result<(), GenomeStructureError> {
        let genome = self.key;

        for node in config.output_keys() {
            if !self.nodes.contains_key(&node) {
                return Err(GenomeStructureError::MissingOutput { genome, node });
            }
        }

        for (&key, node) in &self.nodes {
            if key < 0 {
                return Err(GenomeStructureError::InputNodeGene { genome, node: key });
            }
            if node.key != key {
                return Err(GenomeStructureError::NodeKeyMismatch {
                    genome,
                    stored: key,
                    actual: node.key,
                });
            }
        }

        for (&(from, to), conn) in &self.connections {
            if conn.key != (from, to) {
                return Err(GenomeStructureError::ConnectionKeyMismatch {
                    genome,
                    from,
                    to,
                    actual: conn.key,
                });
            }
            if to < 0 {
                return Err(GenomeStructureError::ConnectionIntoInput { genome, from, to });
            }
            let source_known = is_input(from, config) || self.nodes.contains_key(&from);
            if !source_known || !self.nodes.contains_key(&to) {
                return Err(GenomeStructureError::DanglingConnection { genome, from, to });
            }
        }

        // Disabled connections count too: re-enabling must never close a cycle.
        let all: BTreeSet<NodeKey> = self.nodes.keys().copied().collect();
        let keys: Vec<ConnectionKey> = self.connections.keys().copied().collect();
        if let Err(nodes) = feed_forward_order(&config.input_keys(), &all, &keys) {
            return Err(GenomeStructureError::Cycle { genome, nodes });
        }

        Ok(())
    }

    /// Copy keeping only the nodes and enabled connections that can affect an output.
    pub fn pruned(&self, config: &GenomeConfig) -> Genome {
        let inputs = config.input_keys();
        let enabled = self.enabled_connection_keys();
        let required = required_for_output(&inputs, &config.output_keys(), &enabled);

        let nodes = self
            .nodes
            .iter()
            .filter(|(k, _)| required.contains(*k))
            .map(|(&k, n)| (k, n.clone()))
            .collect();
        let connections = self
            .connections
            .iter()
            .filter(|&(&(a, b), c)| {
                c.enabled && required.contains(&b) && (required.contains(&a) || inputs.contains(&a))
            })
            .map(|(&k, c)| (k, c.clone()))
            .collect();

        Genome {
            key: self.key,
            nodes,
            connections,
        }
    }

    fn add_connection_gene(
        &mut self,
        key: ConnectionKey,
        weight: f32,
        enabled: bool,
        tracker: &mut InnovationTracker,
    ) {
        let innovation = tracker.connection_innovation(key);
        self.connections.insert(
            key,
            ConnectionGene {
                key,
                weight,
                enabled,
                innovation,
            },
        );
    }
}

fn is_output(key: NodeKey, config: &GenomeConfig) -> bool {
    key >= 0 && (key as usize) < config.num_outputs
}

fn is_input(key: NodeKey, config: &GenomeConfig) -> bool {
    key < 0 && key.unsigned_abs() as usize <= config.num_inputs
}

/// Compatibility distance used for speciation.
///
/// The node part and the connection part each weigh disjoint genes by
/// `compatibility_disjoint_coefficient` and attribute differences of matching
/// genes by `compatibility_weight_coefficient`, normalized by the larger gene
/// count. Connections match on innovation id. The result is symmetric and zero
/// for identical genomes.
pub fn genetic_distance(a: &Genome, b: &Genome, config: &GenomeConfig) -> f32 {
    let c_disjoint = config.compatibility_disjoint_coefficient;
    let c_weight = config.compatibility_weight_coefficient;

    let node_keys: BTreeSet<NodeKey> = a.nodes.keys().chain(b.nodes.keys()).copied().collect();
    let mut node_distance = 0.0;
    if !node_keys.is_empty() {
        let mut disjoint = 0usize;
        let mut diff = 0.0f32;
        for key in &node_keys {
            match (a.nodes.get(key), b.nodes.get(key)) {
                (Some(n1), Some(n2)) => diff += n1.distance(n2),
                _ => disjoint += 1,
            }
        }
        let max_nodes = a.nodes.len().max(b.nodes.len()) as f32;
        node_distance = (c_weight * diff + c_disjoint * disjoint as f32) / max_nodes;
    }

    fn by_innovation(g: &Genome) -> BTreeMap<u64, &ConnectionGene> {
        g.connections.values().map(|c| (c.innovation, c)).collect()
    }
    let conns_a = by_innovation(a);
    let conns_b = by_innovation(b);
    let innovations: BTreeSet<u64> = conns_a.keys().chain(conns_b.keys()).copied().collect();

    let mut connection_distance = 0.0;
    if !innovations.is_empty() {
        let mut disjoint = 0usize;
        let mut diff = 0.0f32;
        for innovation in &innovations {
            match (conns_a.get(innovation), conns_b.get(innovation)) {
                (Some(c1), Some(c2)) => diff += c1.distance(c2),
                _ => disjoint += 1,
            }
        }
        let max_conns = a.connections.len().max(b.connections.len()) as f32;
        connection_distance = (c_weight * diff + c_disjoint * disjoint as f32) / max_conns;
    }

    node_distance + connection_distance
}

/// Random number generator wrapper for genome operations.
pub struct GenomeRng {
    rng: StdRng,
}

impl GenomeRng {
    /// Create from seed.
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// `true` with probability `p`.
    pub fn chance(&mut self, p: f32) -> bool {
        self.rng.r#gen::<f32>() < p
    }

    /// Uniform in `[0, 1)`.
    pub fn unit(&mut self) -> f32 {
        self.rng.r#gen()
    }

    /// Uniform index into a collection of `len > 0` items.
    pub fn index(&mut self, len: usize) -> usize {
        self.rng.gen_range(0..len)
    }

    /// Normal sample with the given mean and standard deviation.
    pub fn gaussian(&mut self, mean: f32, stdev: f32) -> f32 {
        let noise: f32 = self.rng.sample(rand_distr::StandardNormal);
        mean + noise * stdev
    }

    fn init_float(&mut self, cfg: &FloatGeneConfig) -> f32 {
        match cfg.init_type {
            InitType::Gaussian => self
                .gaussian(cfg.init_mean, cfg.init_stdev)
                .clamp(cfg.min_value, cfg.max_value),
            InitType::Uniform => {
                let lo = cfg.min_value.max(cfg.init_mean - 2.0 * cfg.init_stdev);
                let hi = cfg.max_value.min(cfg.init_mean + 2.0 * cfg.init_stdev);
                if lo < hi {
                    self.rng.gen_range(lo..=hi)
                } else {
                    cfg.init_mean.clamp(cfg.min_value, cfg.max_value)
                }
            }
        }
    }

    /// Perturb with probability `mutate_rate`, redraw with probability `replace_rate`.
    fn mutate_float(&mut self, value: f32, cfg: &FloatGeneConfig) -> f32 {
        let r = self.unit();
        if r < cfg.mutate_rate {
            (value + self.gaussian(0.0, cfg.mutate_power)).clamp(cfg.min_value, cfg.max_value)
        } else if r < cfg.mutate_rate + cfg.replace_rate {
            self.init_float(cfg)
        } else {
            value
        }
    }

    fn mutate_choice<T: Copy>(&mut self, current: T, cfg: &ChoiceGeneConfig<T>) -> T {
        if self.chance(cfg.mutate_rate) {
            cfg.options.choose(&mut self.rng).copied().unwrap_or(current)
        } else {
            current
        }
    }

    fn new_node(&mut self, key: NodeKey, config: &GenomeConfig) -> NodeGene {
        NodeGene {
            key,
            bias: self.init_float(&config.bias),
            response: self.init_float(&config.response),
            activation: config.activation.default,
            aggregation: config.aggregation.default,
        }
    }

    /// Generate a fresh genome following `config.initial_connection`.
    pub fn create_random(
        &mut self,
        key: GenomeKey,
        config: &GenomeConfig,
        tracker: &mut InnovationTracker,
    ) -> Genome {
        let mut genome = Genome::new(key);
        for node in config.output_keys() {
            genome.nodes.insert(node, self.new_node(node, config));
        }
        // Initial hidden nodes share keys across the population.
        let first_hidden = config.num_outputs as NodeKey;
        for node in first_hidden..first_hidden + config.num_hidden as NodeKey {
            genome.nodes.insert(node, self.new_node(node, config));
        }

        let connections = match config.initial_connection {
            InitialConnection::Unconnected => Vec::new(),
            InitialConnection::FsNeatNoHidden => {
                let input = self.random_input(config);
                config.output_keys().into_iter().map(|o| (input, o)).collect()
            }
            InitialConnection::FsNeatHidden => {
                let input = self.random_input(config);
                genome.nodes.keys().map(|&n| (input, n)).collect()
            }
            InitialConnection::FullNoDirect => full_connections(&genome, config, false),
            InitialConnection::FullDirect => full_connections(&genome, config, true),
            InitialConnection::PartialNoDirect { fraction } => full_connections(&genome, config, false)
                .into_iter()
                .filter(|_| self.chance(fraction))
                .collect(),
            InitialConnection::PartialDirect { fraction } => full_connections(&genome, config, true)
                .into_iter()
                .filter(|_| self.chance(fraction))
                .collect(),
        };

        for conn in connections {
            let weight = self.init_float(&config.weight);
            genome.add_connection_gene(conn, weight, config.enabled_default, tracker);
        }
        genome
    }

    fn random_input(&mut self, config: &GenomeConfig) -> NodeKey {
        -(self.rng.gen_range(1..=config.num_inputs) as NodeKey)
    }

    /// Produce a mutated copy of `parent` under a new key.
    pub fn mutate(
        &mut self,
        parent: &Genome,
        key: GenomeKey,
        config: &GenomeConfig,
        tracker: &mut InnovationTracker,
    ) -> Genome {
        let mut child = parent.clone();
        child.key = key;

        if config.single_structural_mutation {
            let total = config.node_add_prob
                + config.node_delete_prob
                + config.conn_add_prob
                + config.conn_delete_prob;
            let r = self.unit() * total.max(1.0);
            let delete_node_edge = config.node_add_prob + config.node_delete_prob;
            let add_conn_edge = delete_node_edge + config.conn_add_prob;
            if r < config.node_add_prob {
                self.mutate_add_node(&mut child, config, tracker);
            } else if r < delete_node_edge {
                self.mutate_delete_node(&mut child, config);
            } else if r < add_conn_edge {
                self.mutate_add_connection(&mut child, config, tracker);
            } else if r < total {
                self.mutate_delete_connection(&mut child);
            }
        } else {
            if self.chance(config.node_add_prob) {
                self.mutate_add_node(&mut child, config, tracker);
            }
            if self.chance(config.node_delete_prob) {
                self.mutate_delete_node(&mut child, config);
            }
            if self.chance(config.conn_add_prob) {
                self.mutate_add_connection(&mut child, config, tracker);
            }
            if self.chance(config.conn_delete_prob) {
                self.mutate_delete_connection(&mut child);
            }
        }

        for conn in child.connections.values_mut() {
            conn.weight = self.mutate_float(conn.weight, &config.weight);
            if self.chance(config.enabled_mutate_rate) {
                conn.enabled = !conn.enabled;
            }
        }
        for node in child.nodes.values_mut() {
            node.bias = self.mutate_float(node.bias, &config.bias);
            node.response = self.mutate_float(node.response, &config.response);
            node.activation = self.mutate_choice(node.activation, &config.activation);
            node.aggregation = self.mutate_choice(node.aggregation, &config.aggregation);
        }

        child
    }

    /// Split a random enabled connection `a -> b` into `a -> k -> b`.
    fn mutate_add_node(
        &mut self,
        genome: &mut Genome,
        config: &GenomeConfig,
        tracker: &mut InnovationTracker,
    ) {
        let enabled = genome.enabled_connection_keys();
        if enabled.is_empty() {
            if config.structural_mutation_surer {
                self.mutate_add_connection(genome, config, tracker);
            }
            return;
        }

        let split = enabled[self.index(enabled.len())];
        let node = tracker.split_node(split, genome);
        let Some(old) = genome.connections.get_mut(&split) else {
            return;
        };
        old.enabled = false;
        let old_weight = old.weight;

        let gene = self.new_node(node, config);
        genome.nodes.insert(node, gene);
        genome.add_connection_gene((split.0, node), 1.0, true, tracker);
        genome.add_connection_gene((node, split.1), old_weight, true, tracker);
    }

    /// Remove a random hidden node together with every connection touching it.
    fn mutate_delete_node(&mut self, genome: &mut Genome, config: &GenomeConfig) {
        let hidden = genome.hidden_keys(config);
        if hidden.is_empty() {
            return;
        }
        let node = hidden[self.index(hidden.len())];
        genome.nodes.remove(&node);
        genome.connections.retain(|&(a, b), _| a != node && b != node);
    }

    fn mutate_add_connection(
        &mut self,
        genome: &mut Genome,
        config: &GenomeConfig,
        tracker: &mut InnovationTracker,
    ) {
        let targets: Vec<NodeKey> = genome.nodes.keys().copied().collect();
        if targets.is_empty() {
            return;
        }
        let mut sources = targets.clone();
        sources.extend(config.input_keys());

        let to = targets[self.index(targets.len())];
        let from = sources[self.index(sources.len())];
        let key = (from, to);

        if let Some(existing) = genome.connections.get_mut(&key) {
            if config.structural_mutation_surer {
                existing.enabled = true;
            }
            return;
        }
        if is_output(from, config) && is_output(to, config) {
            return;
        }
        let all: Vec<ConnectionKey> = genome.connections.keys().copied().collect();
        if creates_cycle(&all, key) {
            return;
        }

        let weight = self.init_float(&config.weight);
        genome.add_connection_gene(key, weight, true, tracker);
    }

    fn mutate_delete_connection(&mut self, genome: &mut Genome) {
        if genome.connections.is_empty() {
            return;
        }
        let idx = self.index(genome.connections.len());
        if let Some(&key) = genome.connections.keys().nth(idx) {
            genome.connections.remove(&key);
        }
    }

    /// Combine two parents into a child under a new key.
    ///
    /// Matching genes are copied whole from one parent, the fitter one with
    /// probability `fitter_parent_bias`. Disjoint and excess genes come only
    /// from the fitter parent; on a score tie `parent_a` counts as fitter.
    pub fn crossover(
        &mut self,
        key: GenomeKey,
        parent_a: &Genome,
        score_a: f32,
        parent_b: &Genome,
        score_b: f32,
        fitter_parent_bias: f32,
    ) -> Genome {
        let (fitter, other) = if score_a >= score_b {
            (parent_a, parent_b)
        } else {
            (parent_b, parent_a)
        };

        let mut child = Genome::new(key);

        let other_by_innovation: BTreeMap<u64, &ConnectionGene> = other
            .connections
            .values()
            .map(|c| (c.innovation, c))
            .collect();
        for (&conn_key, c1) in &fitter.connections {
            let gene = match other_by_innovation.get(&c1.innovation) {
                None => c1.clone(),
                Some(c2) => {
                    let mut gene = if self.chance(fitter_parent_bias) {
                        c1.clone()
                    } else {
                        (*c2).clone()
                    };
                    if !c1.enabled || !c2.enabled {
                        gene.enabled = !self.chance(INHERIT_DISABLED_PROB);
                    }
                    gene
                }
            };
            child.connections.insert(conn_key, gene);
        }

        for (&node_key, n1) in &fitter.nodes {
            let gene = match other.nodes.get(&node_key) {
                Some(n2) if !self.chance(fitter_parent_bias) => n2.clone(),
                _ => n1.clone(),
            };
            child.nodes.insert(node_key, gene);
        }

        child
    }
}

/// Full initial connectivity: inputs to hidden and hidden to outputs, plus
/// inputs to outputs when `direct` is set or there are no hidden nodes.
fn full_connections(genome: &Genome, config: &GenomeConfig, direct: bool) -> Vec<ConnectionKey> {
    let inputs = config.input_keys();
    let outputs = config.output_keys();
    let hidden = genome.hidden_keys(config);

    let mut connections = Vec::new();
    for &h in &hidden {
        connections.extend(inputs.iter().map(|&i| (i, h)));
    }
    for &h in &hidden {
        connections.extend(outputs.iter().map(|&o| (h, o)));
    }
    if direct || hidden.is_empty() {
        for &i in &inputs {
            connections.extend(outputs.iter().map(|&o| (i, o)));
        }
    }
    connections
}

/// Structural invariant violations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GenomeStructureError {
    #[error("Genome {genome} is missing output node {node}")]
    MissingOutput { genome: GenomeKey, node: NodeKey },
    #[error("Genome {genome} has a node gene under input key {node}")]
    InputNodeGene { genome: GenomeKey, node: NodeKey },
    #[error("Genome {genome} stores node {actual} under key {stored}")]
    NodeKeyMismatch {
        genome: GenomeKey,
        stored: NodeKey,
        actual: NodeKey,
    },
    #[error("Genome {genome} stores connection {actual:?} under key ({from}, {to})")]
    ConnectionKeyMismatch {
        genome: GenomeKey,
        from: NodeKey,
        to: NodeKey,
        actual: ConnectionKey,
    },
    #[error("Genome {genome} has connection {from} -> {to} into an input")]
    ConnectionIntoInput {
        genome: GenomeKey,
        from: NodeKey,
        to: NodeKey,
    },
    #[error("Genome {genome} has connection {from} -> {to} to an unknown node")]
    DanglingConnection {
        genome: GenomeKey,
        from: NodeKey,
        to: NodeKey,
    },
    #[error("Genome {genome} contains a cycle through nodes {nodes:?}")]
    Cycle { genome: GenomeKey, nodes: Vec<NodeKey> },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup(config: &GenomeConfig) -> (GenomeRng, InnovationTracker) {
        (GenomeRng::new(42), InnovationTracker::new(config))
    }

    fn connection(
        genome: &mut Genome,
        key: ConnectionKey,
        weight: f32,
        tracker: &mut InnovationTracker,
    ) {
        genome.add_connection_gene(key, weight, true, tracker);
    }

    #[test]
    fn test_create_random_full_no_direct() {
        let config = GenomeConfig::default();
        let (mut rng, mut tracker) = setup(&config);

        let genome = rng.create_random(7, &config, &mut tracker);
        assert_eq!(genome.key, 7);
        assert_eq!(genome.nodes.keys().copied().collect::<Vec<_>>(), vec![0, 1]);
        assert_eq!(genome.connections.len(), 4);
        assert!(genome.validate(&config).is_ok());
        for node in genome.nodes.values() {
            assert_eq!(node.response, 1.0);
            assert_eq!(node.activation, Activation::Sigmoid);
        }
    }

    #[test]
    fn test_create_random_with_hidden() {
        let mut config = GenomeConfig {
            num_hidden: 1,
            ..Default::default()
        };
        let (mut rng, mut tracker) = setup(&config);
        let genome = rng.create_random(0, &config, &mut tracker);
        assert!(genome.nodes.contains_key(&2));
        assert_eq!(genome.connections.len(), 4);
        assert!(!genome.connections.contains_key(&(-1, 0)));

        config.initial_connection = InitialConnection::FullDirect;
        let genome = rng.create_random(1, &config, &mut tracker);
        assert_eq!(genome.connections.len(), 8);
        assert!(genome.validate(&config).is_ok());
    }

    #[test]
    fn test_fs_neat_connects_single_input() {
        let config = GenomeConfig {
            num_inputs: 4,
            num_outputs: 3,
            initial_connection: InitialConnection::FsNeatNoHidden,
            ..Default::default()
        };
        let (mut rng, mut tracker) = setup(&config);
        let genome = rng.create_random(0, &config, &mut tracker);
        assert_eq!(genome.connections.len(), 3);
        let sources: BTreeSet<NodeKey> = genome.connections.keys().map(|k| k.0).collect();
        assert_eq!(sources.len(), 1);
    }

    #[test]
    fn test_unconnected_genome_is_valid() {
        let config = GenomeConfig {
            initial_connection: InitialConnection::Unconnected,
            ..Default::default()
        };
        let (mut rng, mut tracker) = setup(&config);
        let genome = rng.create_random(0, &config, &mut tracker);
        assert!(genome.connections.is_empty());
        assert!(genome.validate(&config).is_ok());
    }

    #[test]
    fn test_add_node_splits_connection() {
        let config = GenomeConfig {
            num_inputs: 1,
            num_outputs: 1,
            ..Default::default()
        };
        let (mut rng, mut tracker) = setup(&config);
        let mut genome = Genome::new(0);
        genome.nodes.insert(0, rng.new_node(0, &config));
        connection(&mut genome, (-1, 0), 0.7, &mut tracker);

        rng.mutate_add_node(&mut genome, &config, &mut tracker);

        assert_eq!(genome.nodes.len(), 2);
        assert!(!genome.connections[&(-1, 0)].enabled);
        let node = genome.hidden_keys(&config)[0];
        assert_eq!(node, 1);
        assert_eq!(genome.connections[&(-1, node)].weight, 1.0);
        assert_eq!(genome.connections[&(node, 0)].weight, 0.7);
        assert!(genome.validate(&config).is_ok());
    }

    #[test]
    fn test_same_split_same_node_key() {
        let config = GenomeConfig {
            num_inputs: 1,
            num_outputs: 1,
            ..Default::default()
        };
        let (mut rng, mut tracker) = setup(&config);
        let mut base = Genome::new(0);
        base.nodes.insert(0, rng.new_node(0, &config));
        connection(&mut base, (-1, 0), 0.5, &mut tracker);

        let mut a = base.clone();
        let mut b = base.clone();
        rng.mutate_add_node(&mut a, &config, &mut tracker);
        rng.mutate_add_node(&mut b, &config, &mut tracker);

        assert_eq!(a.hidden_keys(&config), b.hidden_keys(&config));
        let node = a.hidden_keys(&config)[0];
        assert_eq!(
            a.connections[&(-1, node)].innovation,
            b.connections[&(-1, node)].innovation
        );
    }

    #[test]
    fn test_delete_node_removes_connections() {
        let config = GenomeConfig {
            num_hidden: 1,
            ..Default::default()
        };
        let (mut rng, mut tracker) = setup(&config);
        let mut genome = rng.create_random(0, &config, &mut tracker);

        rng.mutate_delete_node(&mut genome, &config);
        assert!(!genome.nodes.contains_key(&2));
        assert!(genome.connections.keys().all(|&(a, b)| a != 2 && b != 2));
        assert!(genome.validate(&config).is_ok());
    }

    #[test]
    fn test_add_connection_never_links_outputs() {
        let config = GenomeConfig {
            initial_connection: InitialConnection::Unconnected,
            ..Default::default()
        };
        let (mut rng, mut tracker) = setup(&config);
        let mut genome = rng.create_random(0, &config, &mut tracker);
        for _ in 0..200 {
            rng.mutate_add_connection(&mut genome, &config, &mut tracker);
        }
        assert!(
            genome
                .connections
                .keys()
                .all(|&(a, b)| !(is_output(a, &config) && is_output(b, &config)))
        );
        assert!(genome.validate(&config).is_ok());
    }

    #[test]
    fn test_repeated_mutation_stays_valid() {
        let config = GenomeConfig {
            num_inputs: 3,
            num_outputs: 2,
            node_add_prob: 0.5,
            node_delete_prob: 0.3,
            conn_add_prob: 0.8,
            conn_delete_prob: 0.3,
            enabled_mutate_rate: 0.2,
            ..Default::default()
        };
        let (mut rng, mut tracker) = setup(&config);
        let mut genome = rng.create_random(0, &config, &mut tracker);
        for key in 1..300 {
            genome = rng.mutate(&genome, key, &config, &mut tracker);
            assert_eq!(genome.key, key);
            assert!(genome.validate(&config).is_ok(), "{:?}", genome.validate(&config));
            for conn in genome.connections.values() {
                assert!(conn.weight >= config.weight.min_value);
                assert!(conn.weight <= config.weight.max_value);
            }
        }
    }

    #[test]
    fn test_single_structural_mutation_stays_valid() {
        let config = GenomeConfig {
            single_structural_mutation: true,
            structural_mutation_surer: true,
            ..Default::default()
        };
        let (mut rng, mut tracker) = setup(&config);
        let mut genome = rng.create_random(0, &config, &mut tracker);
        for key in 1..200 {
            genome = rng.mutate(&genome, key, &config, &mut tracker);
            assert!(genome.validate(&config).is_ok());
        }
    }

    #[test]
    fn test_mutate_leaves_parent_untouched() {
        let config = GenomeConfig::default();
        let (mut rng, mut tracker) = setup(&config);
        let parent = rng.create_random(0, &config, &mut tracker);
        let snapshot = parent.clone();
        let _child = rng.mutate(&parent, 1, &config, &mut tracker);
        assert_eq!(parent, snapshot);
    }

    #[test]
    fn test_crossover_inherits_matching_from_either_parent() {
        let config = GenomeConfig::default();
        let (mut rng, mut tracker) = setup(&config);
        let a = rng.create_random(0, &config, &mut tracker);
        let mut b = a.clone();
        b.key = 1;
        for conn in b.connections.values_mut() {
            conn.weight += 10.0;
        }
        // Disjoint gene only in the weaker parent.
        b.nodes.insert(2, rng.new_node(2, &config));
        connection(&mut b, (-1, 2), 0.3, &mut tracker);
        connection(&mut b, (2, 0), 0.3, &mut tracker);

        let child = rng.crossover(5, &a, 2.0, &b, 1.0, 0.5);
        assert_eq!(child.key, 5);
        assert_eq!(child.connections.len(), a.connections.len());
        assert!(!child.nodes.contains_key(&2));
        for (key, conn) in &child.connections {
            let wa = a.connections[key].weight;
            let wb = b.connections[key].weight;
            assert!(conn.weight == wa || conn.weight == wb);
        }
        assert!(child.validate(&config).is_ok());
    }

    #[test]
    fn test_crossover_tie_prefers_first_parent() {
        let config = GenomeConfig::default();
        let (mut rng, mut tracker) = setup(&config);
        let a = rng.create_random(0, &config, &mut tracker);
        let mut b = a.clone();
        b.nodes.insert(2, rng.new_node(2, &config));
        connection(&mut b, (-1, 2), 0.3, &mut tracker);

        let child = rng.crossover(3, &a, 1.0, &b, 1.0, 0.5);
        assert!(!child.nodes.contains_key(&2));
        let child = rng.crossover(4, &b, 1.0, &a, 1.0, 0.5);
        assert!(child.nodes.contains_key(&2));
    }

    #[test]
    fn test_distance_identity_and_disjoint() {
        let config = GenomeConfig::default();
        let (mut rng, mut tracker) = setup(&config);
        let a = rng.create_random(0, &config, &mut tracker);
        assert_eq!(genetic_distance(&a, &a, &config), 0.0);

        let mut b = a.clone();
        b.connections.remove(&(-1, 0));
        // One disjoint connection out of four, coefficient 1.0.
        assert!((genetic_distance(&a, &b, &config) - 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_distance_counts_enabled_mismatch() {
        let config = GenomeConfig::default();
        let (mut rng, mut tracker) = setup(&config);
        let a = rng.create_random(0, &config, &mut tracker);
        let mut b = a.clone();
        if let Some(conn) = b.connections.get_mut(&(-1, 0)) {
            conn.enabled = false;
        }
        // (0.5 * 1.0) / 4
        assert!((genetic_distance(&a, &b, &config) - 0.125).abs() < 1e-6);
    }

    #[test]
    fn test_validate_detects_cycle() {
        let config = GenomeConfig::default();
        let (mut rng, mut tracker) = setup(&config);
        let mut genome = rng.create_random(0, &config, &mut tracker);
        genome.nodes.insert(2, rng.new_node(2, &config));
        genome.nodes.insert(3, rng.new_node(3, &config));
        connection(&mut genome, (2, 3), 1.0, &mut tracker);
        connection(&mut genome, (3, 2), 1.0, &mut tracker);
        if let Some(conn) = genome.connections.get_mut(&(3, 2)) {
            conn.enabled = false;
        }
        assert!(matches!(
            genome.validate(&config),
            Err(GenomeStructureError::Cycle { .. })
        ));
    }

    #[test]
    fn test_validate_detects_dangling_connection() {
        let config = GenomeConfig::default();
        let (mut rng, mut tracker) = setup(&config);
        let mut genome = rng.create_random(0, &config, &mut tracker);
        connection(&mut genome, (-1, 9), 1.0, &mut tracker);
        assert!(matches!(
            genome.validate(&config),
            Err(GenomeStructureError::DanglingConnection { to: 9, .. })
        ));

        let mut genome = rng.create_random(1, &config, &mut tracker);
        genome.nodes.remove(&1);
        assert!(matches!(
            genome.validate(&config),
            Err(GenomeStructureError::MissingOutput { node: 1, .. })
        ));
    }

    #[test]
    fn test_pruned_drops_dead_ends() {
        let config = GenomeConfig::default();
        let (mut rng, mut tracker) = setup(&config);
        let mut genome = rng.create_random(0, &config, &mut tracker);
        // Node 2 receives input but feeds nothing.
        genome.nodes.insert(2, rng.new_node(2, &config));
        connection(&mut genome, (-1, 2), 1.0, &mut tracker);
        if let Some(conn) = genome.connections.get_mut(&(-2, 1)) {
            conn.enabled = false;
        }

        let pruned = genome.pruned(&config);
        assert!(!pruned.nodes.contains_key(&2));
        assert!(pruned.nodes.contains_key(&0) && pruned.nodes.contains_key(&1));
        assert_eq!(pruned.connections.len(), 3);
        assert!(pruned.validate(&config).is_ok());
    }

    #[test]
    fn test_size() {
        let config = GenomeConfig::default();
        let (mut rng, mut tracker) = setup(&config);
        let mut genome = rng.create_random(0, &config, &mut tracker);
        assert_eq!(genome.size(), (2, 4));
        if let Some(conn) = genome.connections.get_mut(&(-1, 0)) {
            conn.enabled = false;
        }
        assert_eq!(genome.size(), (2, 3));
    }

    #[test]
    fn test_serde_roundtrip() {
        let config = GenomeConfig::default();
        let (mut rng, mut tracker) = setup(&config);
        let genome = rng.create_random(3, &config, &mut tracker);
        let json = serde_json::to_string(&genome).unwrap();
        let parsed: Genome = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, genome);
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        fn evolved(
            seed: u64,
            steps: usize,
            config: &GenomeConfig,
            tracker: &mut InnovationTracker,
        ) -> Genome {
            let mut rng = GenomeRng::new(seed);
            let mut genome = rng.create_random(0, config, tracker);
            for key in 1..=steps as GenomeKey {
                genome = rng.mutate(&genome, key, config, tracker);
            }
            genome
        }

        proptest! {
            #[test]
            fn test_distance_symmetric(
                seed_a in any::<u64>(),
                seed_b in any::<u64>(),
                steps_a in 0usize..15,
                steps_b in 0usize..15
            ) {
                let config = GenomeConfig::default();
                let mut tracker = InnovationTracker::new(&config);
                let a = evolved(seed_a, steps_a, &config, &mut tracker);
                let b = evolved(seed_b, steps_b, &config, &mut tracker);

                prop_assert_eq!(genetic_distance(&a, &b, &config), genetic_distance(&b, &a, &config));
                prop_assert_eq!(genetic_distance(&a, &a, &config), 0.0);
                prop_assert!(genetic_distance(&a, &b, &config) >= 0.0);
            }
        }
    }
}
