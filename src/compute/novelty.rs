//! Novelty archive with k-nearest-neighbor scoring and an adaptive threshold.
//!
//! Novelty of a behavior is the mean distance to its `neighbors` nearest
//! points among the archive and the other behaviors of the same generation.
//! A genome enters the archive when its novelty beats the current threshold
//! (and it meets the minimal criterion, if one is set). The threshold rises
//! when a generation admits many entries and decays toward its floor when it
//! admits few. Entries are never evicted.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::genome::GenomeKey;
use crate::schema::{BehaviorDescriptor, GenomeScore, NoveltyConfig, SelectionScore};

/// One archived behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveEntry {
    pub genome_key: GenomeKey,
    /// Generation the entry was admitted.
    pub generation: usize,
    pub behavior: BehaviorDescriptor,
    /// Novelty at admission.
    pub novelty: f32,
    /// Reward at admission.
    pub reward: f32,
}

/// Threshold adaptation applied at the end of a generation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ThresholdChange {
    Raised { from: f32, to: f32 },
    Lowered { from: f32, to: f32 },
    Unchanged,
}

/// A descriptor whose length differs from the run's descriptor length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Behavior descriptor has {got} dimensions, expected {expected}")]
pub struct DimensionMismatch {
    pub expected: usize,
    pub got: usize,
}

/// The novelty archive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoveltyArchive {
    config: NoveltyConfig,
    entries: Vec<ArchiveEntry>,
    threshold: f32,
    dimension: Option<usize>,
    added: usize,
}

impl NoveltyArchive {
    pub fn new(config: &NoveltyConfig) -> Self {
        Self {
            config: config.clone(),
            entries: Vec::new(),
            threshold: config.threshold_init.max(config.threshold_floor),
            dimension: None,
            added: 0,
        }
    }

    /// Current admission threshold.
    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Archived entries in admission order.
    pub fn entries(&self) -> &[ArchiveEntry] {
        &self.entries
    }

    /// Descriptor length fixed by the first descriptor seen.
    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    /// Entries admitted since the last [`end_generation`](Self::end_generation).
    pub fn added_this_generation(&self) -> usize {
        self.added
    }

    /// Check a descriptor length, fixing the run's length on first use.
    pub fn check_dimension(&mut self, len: usize) -> Result<(), DimensionMismatch> {
        match self.dimension {
            Some(expected) if expected != len => Err(DimensionMismatch { expected, got: len }),
            Some(_) => Ok(()),
            None => {
                self.dimension = Some(len);
                Ok(())
            }
        }
    }

    /// Novelty of one behavior against the archive and `population`.
    ///
    /// `population` must not contain `behavior` itself.
    pub fn score(&self, behavior: &[f32], population: &[&[f32]]) -> f32 {
        let metric = self.config.metric;
        let distances = self
            .entries
            .iter()
            .map(|e| metric.distance(behavior, &e.behavior))
            .chain(population.iter().map(|other| metric.distance(behavior, other)))
            .collect();
        mean_of_nearest(distances, self.config.neighbors)
    }

    /// Novelty of every genome of a generation.
    ///
    /// Each behavior is compared with the archive and with every other
    /// behavior of the generation. Fails before scoring anything if a
    /// descriptor has the wrong length.
    pub fn score_population(
        &mut self,
        behaviors: &BTreeMap<GenomeKey, BehaviorDescriptor>,
    ) -> Result<BTreeMap<GenomeKey, f32>, (GenomeKey, DimensionMismatch)> {
        for (&key, behavior) in behaviors {
            self.check_dimension(behavior.len()).map_err(|e| (key, e))?;
        }

        let all: Vec<(GenomeKey, &[f32])> = behaviors
            .iter()
            .map(|(&k, b)| (k, b.as_slice()))
            .collect();

        let mut novelty = BTreeMap::new();
        for &(key, behavior) in &all {
            let others: Vec<&[f32]> = all
                .iter()
                .filter(|&&(other, _)| other != key)
                .map(|&(_, b)| b)
                .collect();
            novelty.insert(key, self.score(behavior, &others));
        }
        Ok(novelty)
    }

    /// Admit `behavior` if it is novel enough and meets the minimal criterion.
    pub fn consider_add(
        &mut self,
        genome_key: GenomeKey,
        behavior: &[f32],
        novelty: f32,
        reward: f32,
        generation: usize,
    ) -> bool {
        if !(novelty > self.threshold && self.meets_criterion(reward)) {
            return false;
        }
        self.entries.push(ArchiveEntry {
            genome_key,
            generation,
            behavior: behavior.to_vec(),
            novelty,
            reward,
        });
        self.added += 1;
        true
    }

    /// Whether `reward` satisfies the minimal criterion (always true when disabled).
    pub fn meets_criterion(&self, reward: f32) -> bool {
        self.config.mcns.is_none_or(|c| reward >= c)
    }

    /// Adapt the threshold to this generation's admissions and reset the count.
    pub fn end_generation(&mut self) -> ThresholdChange {
        let from = self.threshold;
        let added = std::mem::take(&mut self.added);

        if added > self.config.add_upper {
            self.threshold *= self.config.threshold_increase;
            ThresholdChange::Raised {
                from,
                to: self.threshold,
            }
        } else if added < self.config.add_lower {
            self.threshold =
                (self.threshold * self.config.threshold_decrease).max(self.config.threshold_floor);
            if self.threshold < from {
                ThresholdChange::Lowered {
                    from,
                    to: self.threshold,
                }
            } else {
                ThresholdChange::Unchanged
            }
        } else {
            ThresholdChange::Unchanged
        }
    }

    /// Combine novelty, reward and the minimal criterion into a selection score.
    pub fn selection_score(&self, novelty: f32, reward: f32) -> GenomeScore {
        let meets_criterion = self.meets_criterion(reward);
        let score = if !meets_criterion {
            0.0
        } else {
            match self.config.selection_score {
                SelectionScore::Novelty => novelty,
                SelectionScore::Reward => reward,
                SelectionScore::Blend { novelty_weight } => {
                    novelty_weight * novelty + (1.0 - novelty_weight) * reward
                }
            }
        };
        GenomeScore {
            reward,
            novelty,
            score,
            meets_criterion,
        }
    }
}

/// Mean of the `k` smallest distances (all of them if fewer, 0 if none).
fn mean_of_nearest(mut distances: Vec<f32>, k: usize) -> f32 {
    if distances.is_empty() || k == 0 {
        return 0.0;
    }
    let k = k.min(distances.len());
    if k < distances.len() {
        distances.select_nth_unstable_by(k - 1, f32::total_cmp);
    }
    distances[..k].iter().sum::<f32>() / k as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::BehaviorMetric;

    fn config() -> NoveltyConfig {
        NoveltyConfig {
            neighbors: 3,
            threshold_init: 1.0,
            threshold_floor: 0.25,
            ..Default::default()
        }
    }

    #[test]
    fn test_mean_of_nearest() {
        assert_eq!(mean_of_nearest(vec![], 3), 0.0);
        assert_eq!(mean_of_nearest(vec![4.0, 2.0], 3), 3.0);
        assert_eq!(mean_of_nearest(vec![9.0, 1.0, 5.0, 3.0], 2), 2.0);
    }

    #[test]
    fn test_identical_archive_gives_zero_novelty() {
        let mut archive = NoveltyArchive::new(&config());
        for key in 0..3 {
            assert!(archive.consider_add(key, &[1.0, 2.0], 5.0, 0.0, 0));
        }
        assert_eq!(archive.score(&[1.0, 2.0], &[]), 0.0);
        assert!(archive.score(&[2.0, 2.0], &[]) > 0.0);
    }

    #[test]
    fn test_population_excludes_self() {
        let mut archive = NoveltyArchive::new(&NoveltyConfig {
            metric: BehaviorMetric::Manhattan,
            neighbors: 1,
            ..config()
        });
        let behaviors: BTreeMap<GenomeKey, BehaviorDescriptor> =
            [(0, vec![0.0]), (1, vec![1.0]), (2, vec![3.0])].into_iter().collect();
        let novelty = archive.score_population(&behaviors).unwrap();
        assert_eq!(novelty[&0], 1.0);
        assert_eq!(novelty[&1], 1.0);
        assert_eq!(novelty[&2], 2.0);
    }

    #[test]
    fn test_single_genome_without_archive_is_zero() {
        let mut archive = NoveltyArchive::new(&config());
        let behaviors: BTreeMap<GenomeKey, BehaviorDescriptor> =
            [(7, vec![0.5, 0.5])].into_iter().collect();
        assert_eq!(archive.score_population(&behaviors).unwrap()[&7], 0.0);
    }

    #[test]
    fn test_dimension_is_fixed() {
        let mut archive = NoveltyArchive::new(&config());
        let first: BTreeMap<GenomeKey, BehaviorDescriptor> =
            [(0, vec![0.0, 0.0])].into_iter().collect();
        archive.score_population(&first).unwrap();
        assert_eq!(archive.dimension(), Some(2));

        let second: BTreeMap<GenomeKey, BehaviorDescriptor> =
            [(1, vec![0.0, 0.0]), (2, vec![0.0, 0.0, 0.0])].into_iter().collect();
        assert_eq!(
            archive.score_population(&second),
            Err((2, DimensionMismatch { expected: 2, got: 3 }))
        );
    }

    #[test]
    fn test_admission_requires_strictly_greater_novelty() {
        let mut archive = NoveltyArchive::new(&config());
        assert!(!archive.consider_add(0, &[0.0], 1.0, 0.0, 0));
        assert!(archive.consider_add(1, &[0.0], 1.01, 0.0, 0));
        assert_eq!(archive.len(), 1);
        assert_eq!(archive.entries()[0].genome_key, 1);
    }

    #[test]
    fn test_minimal_criterion_blocks_admission() {
        let mut archive = NoveltyArchive::new(&NoveltyConfig {
            mcns: Some(0.5),
            ..config()
        });
        assert!(!archive.consider_add(0, &[0.0], 100.0, 0.2, 0));
        assert!(archive.consider_add(1, &[0.0], 100.0, 0.5, 0));

        let score = archive.selection_score(3.0, 0.2);
        assert!(!score.meets_criterion);
        assert_eq!(score.score, 0.0);
        let score = archive.selection_score(3.0, 0.7);
        assert_eq!(score.score, 3.0);
    }

    #[test]
    fn test_threshold_raises_on_many_admissions() {
        let mut archive = NoveltyArchive::new(&NoveltyConfig {
            add_upper: 2,
            threshold_increase: 1.5,
            ..config()
        });
        for key in 0..3 {
            archive.consider_add(key, &[key as f32], 10.0, 0.0, 0);
        }
        assert_eq!(
            archive.end_generation(),
            ThresholdChange::Raised { from: 1.0, to: 1.5 }
        );
        assert_eq!(archive.added_this_generation(), 0);
    }

    #[test]
    fn test_threshold_never_below_floor() {
        let mut archive = NoveltyArchive::new(&NoveltyConfig {
            threshold_decrease: 0.5,
            ..config()
        });
        for _ in 0..50 {
            archive.end_generation();
            assert!(archive.threshold() >= 0.25);
        }
        assert_eq!(archive.threshold(), 0.25);
        assert_eq!(archive.end_generation(), ThresholdChange::Unchanged);
    }

    #[test]
    fn test_blend_selection_score() {
        let archive = NoveltyArchive::new(&NoveltyConfig {
            selection_score: SelectionScore::Blend {
                novelty_weight: 0.25,
            },
            ..config()
        });
        let score = archive.selection_score(4.0, 8.0);
        assert_eq!(score.score, 7.0);
    }

    #[test]
    fn test_serde_roundtrip_keeps_state() {
        let mut archive = NoveltyArchive::new(&config());
        archive.consider_add(3, &[1.0, 1.0], 2.0, 0.5, 4);
        archive.end_generation();
        let json = serde_json::to_string(&archive).unwrap();
        let restored: NoveltyArchive = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.entries(), archive.entries());
        assert_eq!(restored.threshold(), archive.threshold());
    }
}
