//! Feed-forward phenotype decoded from a genome.
//!
//! Decoding keeps only nodes that lie on an input-to-output path (outputs are
//! always kept) and fixes a topological evaluation order up front, so
//! activation is a single pass over a flat slot buffer.

use std::collections::BTreeMap;

use super::genome::{Genome, GenomeStructureError, NodeKey};
use super::graph::{feed_forward_order, required_for_output};
use crate::schema::{Activation, Aggregation, GenomeConfig};

#[derive(Debug, Clone)]
struct NodeEval {
    slot: usize,
    activation: Activation,
    aggregation: Aggregation,
    bias: f32,
    response: f32,
    links: Vec<(usize, f32)>,
}

/// Executable network. Activation never mutates the network.
#[derive(Debug, Clone)]
pub struct FeedForwardNetwork {
    num_inputs: usize,
    num_slots: usize,
    evals: Vec<NodeEval>,
    output_slots: Vec<usize>,
}

impl FeedForwardNetwork {
    /// Decode `genome`. Fails if the genome breaks a structural invariant.
    pub fn create(genome: &Genome, config: &GenomeConfig) -> Result<Self, GenomeStructureError> {
        genome.validate(config)?;

        let inputs = config.input_keys();
        let outputs = config.output_keys();
        let enabled = genome.enabled_connection_keys();
        let required = required_for_output(&inputs, &outputs, &enabled);
        let order = feed_forward_order(&inputs, &required, &enabled).map_err(|nodes| {
            GenomeStructureError::Cycle {
                genome: genome.key,
                nodes,
            }
        })?;

        let mut slots: BTreeMap<NodeKey, usize> = inputs
            .iter()
            .enumerate()
            .map(|(i, &k)| (k, i))
            .collect();
        for (i, &node) in order.iter().enumerate() {
            slots.insert(node, inputs.len() + i);
        }

        let mut evals = Vec::with_capacity(order.len());
        for &node in &order {
            let Some(gene) = genome.nodes.get(&node) else {
                return Err(GenomeStructureError::MissingOutput {
                    genome: genome.key,
                    node,
                });
            };
            let links = genome
                .connections
                .values()
                .filter(|c| c.enabled && c.key.1 == node)
                .filter_map(|c| slots.get(&c.key.0).map(|&slot| (slot, c.weight)))
                .collect();
            evals.push(NodeEval {
                slot: slots[&node],
                activation: gene.activation,
                aggregation: gene.aggregation,
                bias: gene.bias,
                response: gene.response,
                links,
            });
        }

        let output_slots = outputs.iter().map(|k| slots[k]).collect();

        Ok(Self {
            num_inputs: inputs.len(),
            num_slots: inputs.len() + order.len(),
            evals,
            output_slots,
        })
    }

    pub fn num_inputs(&self) -> usize {
        self.num_inputs
    }

    pub fn num_outputs(&self) -> usize {
        self.output_slots.len()
    }

    /// Number of evaluated (non-input) nodes.
    pub fn num_nodes(&self) -> usize {
        self.evals.len()
    }

    /// Propagate one input vector and return the output vector.
    ///
    /// Each node computes `activation(bias + response * aggregation(w * v))`.
    pub fn activate(&self, inputs: &[f32]) -> Result<Vec<f32>, NetworkError> {
        if inputs.len() != self.num_inputs {
            return Err(NetworkError::InputLength {
                expected: self.num_inputs,
                got: inputs.len(),
            });
        }

        let mut values = vec![0.0f32; self.num_slots];
        values[..self.num_inputs].copy_from_slice(inputs);

        let mut weighted = Vec::new();
        for eval in &self.evals {
            weighted.clear();
            weighted.extend(eval.links.iter().map(|&(slot, w)| values[slot] * w));
            let s = eval.aggregation.apply(&weighted);
            values[eval.slot] = eval.activation.apply(eval.bias + eval.response * s);
        }

        Ok(self.output_slots.iter().map(|&slot| values[slot]).collect())
    }
}

/// Network activation errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NetworkError {
    #[error("Network expects {expected} inputs, got {got}")]
    InputLength { expected: usize, got: usize },
}
