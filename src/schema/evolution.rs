//! Evaluation results, per-generation statistics and engine state types.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Summary vector characterizing one evaluation episode.
pub type BehaviorDescriptor = Vec<f32>;

/// What an environment reports for one genome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    /// Task reward.
    pub reward: f32,
    /// Behavior descriptor (fixed length for the whole run).
    pub behavior: BehaviorDescriptor,
}

impl EvaluationResult {
    pub fn new(reward: f32, behavior: BehaviorDescriptor) -> Self {
        Self { reward, behavior }
    }
}

/// Scores assigned to one genome in one generation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GenomeScore {
    /// Task reward reported by the environment.
    pub reward: f32,
    /// k-nearest-neighbor novelty.
    pub novelty: f32,
    /// Score used for selection and stagnation.
    pub score: f32,
    /// Whether the minimal criterion was met (always true when disabled).
    pub meets_criterion: bool,
}

/// Statistics for one completed generation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerationStats {
    pub generation: usize,
    pub best_reward: f32,
    pub mean_reward: f32,
    pub reward_std: f32,
    pub best_novelty: f32,
    pub mean_novelty: f32,
    pub best_score: f32,
    pub num_species: usize,
    pub archive_size: usize,
    /// Entries admitted to the archive this generation.
    pub archive_added: usize,
    /// Archive threshold after this generation's adaptation.
    pub novelty_threshold: f32,
    pub mean_nodes: f32,
    pub mean_connections: f32,
    pub elapsed_seconds: f64,
}

impl GenerationStats {
    /// Compute reward and novelty statistics from a generation's scores.
    ///
    /// Species, archive and timing fields are left for the caller to fill.
    pub fn from_scores<K>(generation: usize, scores: &BTreeMap<K, GenomeScore>) -> Self {
        let n = scores.len().max(1) as f32;
        let rewards = scores.values().map(|s| s.reward);
        let mean_reward = rewards.clone().sum::<f32>() / n;
        let variance = rewards.map(|r| (r - mean_reward).powi(2)).sum::<f32>() / n;

        Self {
            generation,
            best_reward: max_or_zero(scores.values().map(|s| s.reward)),
            mean_reward,
            reward_std: variance.sqrt(),
            best_novelty: max_or_zero(scores.values().map(|s| s.novelty)),
            mean_novelty: scores.values().map(|s| s.novelty).sum::<f32>() / n,
            best_score: max_or_zero(scores.values().map(|s| s.score)),
            ..Default::default()
        }
    }
}

fn max_or_zero(values: impl Iterator<Item = f32>) -> f32 {
    let best = values.fold(f32::NEG_INFINITY, f32::max);
    if best.is_finite() { best } else { 0.0 }
}

/// Evolution history for plotting.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EvolutionHistory {
    /// Best reward per generation.
    pub best_reward: Vec<f32>,
    /// Mean reward per generation.
    pub mean_reward: Vec<f32>,
    /// Mean novelty per generation.
    pub mean_novelty: Vec<f32>,
    /// Archive size at the end of each generation.
    pub archive_size: Vec<usize>,
    /// Number of species per generation.
    pub species_count: Vec<usize>,
    /// Archive threshold per generation.
    pub novelty_threshold: Vec<f32>,
}

impl EvolutionHistory {
    /// Append one generation.
    pub fn record(&mut self, stats: &GenerationStats) {
        self.best_reward.push(stats.best_reward);
        self.mean_reward.push(stats.mean_reward);
        self.mean_novelty.push(stats.mean_novelty);
        self.archive_size.push(stats.archive_size);
        self.species_count.push(stats.num_species);
        self.novelty_threshold.push(stats.novelty_threshold);
    }

    /// Number of recorded generations.
    pub fn len(&self) -> usize {
        self.best_reward.len()
    }

    pub fn is_empty(&self) -> bool {
        self.best_reward.is_empty()
    }
}

/// Current phase of the population engine.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum EnginePhase {
    /// Population seeded, nothing evaluated yet.
    #[default]
    Initialized,
    /// Waiting on the worker pool.
    Evaluating,
    /// Computing novelty and selection scores.
    Scoring,
    /// Assigning species and updating stagnation.
    Speciating,
    /// Creating offspring.
    Reproducing,
    /// Notifying reporters.
    Reporting,
    /// Run finished.
    Terminated,
}

/// Reason a run stopped.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum StopReason {
    /// Reached the requested number of generations.
    MaxGenerations,
    /// A generation's best reward met the configured threshold.
    RewardThreshold,
    /// A reporter asked to stop.
    ReporterRequested,
    /// The cancel handle was set.
    Cancelled,
}
