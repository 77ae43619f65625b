//! Offspring allocation and breeding.
//!
//! Species share the next generation in proportion to their adjusted score,
//! smoothed toward their previous size. Every reproducing species keeps its
//! elites unchanged and fills the rest of its quota with mutated offspring,
//! produced either by crossing two parents or by mutating one.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::genome::{Genome, GenomeKey, GenomeRng};
use super::innovation::InnovationTracker;
use super::species::{SpeciesKey, SpeciesSet, StagnationStatus};
use crate::schema::{
    GenomeConfig, NeatConfig, ReproductionConfig, SelectionMethod, StagnationPolicy,
};

/// Every species was removed for stagnation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Every species was excluded from reproduction")]
pub struct CompleteExtinction;

/// Breeds generations and hands out genome keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reproduction {
    config: ReproductionConfig,
    policy: StagnationPolicy,
    pop_size: usize,
    next_key: GenomeKey,
}

impl Reproduction {
    pub fn new(config: &NeatConfig) -> Self {
        Self {
            config: config.reproduction.clone(),
            policy: config.species.stagnation_policy,
            pop_size: config.population.pop_size,
            next_key: 0,
        }
    }

    /// Key the next new genome will receive.
    pub fn next_key(&self) -> GenomeKey {
        self.next_key
    }

    fn allocate_key(&mut self) -> GenomeKey {
        let key = self.next_key;
        self.next_key += 1;
        key
    }

    /// `n` freshly seeded genomes with new keys.
    pub fn create_new(
        &mut self,
        n: usize,
        genome_config: &GenomeConfig,
        tracker: &mut InnovationTracker,
        rng: &mut GenomeRng,
    ) -> BTreeMap<GenomeKey, Genome> {
        (0..n)
            .map(|_| {
                let key = self.allocate_key();
                (key, rng.create_random(key, genome_config, tracker))
            })
            .collect()
    }

    /// Build the next generation from the current one.
    ///
    /// `scores` holds selection scores. Species that are stagnant under the
    /// `Exclude` policy, and species that receive no offspring, are removed
    /// from `species`. The result always holds exactly `pop_size` genomes.
    #[allow(clippy::too_many_arguments)]
    pub fn reproduce(
        &mut self,
        genome_config: &GenomeConfig,
        species: &mut SpeciesSet,
        stagnation: &[StagnationStatus],
        population: &BTreeMap<GenomeKey, Genome>,
        scores: &BTreeMap<GenomeKey, f32>,
        tracker: &mut InnovationTracker,
        rng: &mut GenomeRng,
    ) -> Result<BTreeMap<GenomeKey, Genome>, CompleteExtinction> {
        let stagnant: BTreeSet<SpeciesKey> = stagnation
            .iter()
            .filter(|s| s.stagnant)
            .map(|s| s.key)
            .collect();

        let mut remaining: Vec<SpeciesKey> = Vec::new();
        let mut excluded: Vec<SpeciesKey> = Vec::new();
        for s in species.iter() {
            if stagnant.contains(&s.key) && self.policy == StagnationPolicy::Exclude {
                excluded.push(s.key);
            } else {
                remaining.push(s.key);
            }
        }
        for key in excluded {
            species.remove(key);
            log::debug!("Species {key} excluded for stagnation");
        }
        if remaining.is_empty() {
            return Err(CompleteExtinction);
        }

        let member_scores = |key: SpeciesKey| -> Vec<(GenomeKey, f32)> {
            species
                .get(key)
                .map(|s| {
                    s.members
                        .iter()
                        .map(|&m| (m, scores.get(&m).copied().unwrap_or(0.0)))
                        .collect()
                })
                .unwrap_or_default()
        };

        let all_scores: Vec<f32> = remaining
            .iter()
            .flat_map(|&k| member_scores(k).into_iter().map(|(_, s)| s))
            .collect();
        let min = all_scores.iter().copied().fold(f32::INFINITY, f32::min);
        let max = all_scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let range = (max - min).max(1.0);

        let mut plans: Vec<(SpeciesKey, f32, Vec<(GenomeKey, f32)>)> = remaining
            .iter()
            .map(|&key| {
                let members = member_scores(key);
                let mean =
                    members.iter().map(|(_, s)| s).sum::<f32>() / members.len().max(1) as f32;
                let mut adjusted = (mean - min) / range;
                if let StagnationPolicy::Deprioritize { penalty } = self.policy
                    && stagnant.contains(&key)
                {
                    adjusted *= penalty;
                }
                (key, adjusted, members)
            })
            .collect();

        // Keep only as many species as can receive the minimum quota.
        let min_size = self.config.min_quota();
        let max_species = (self.pop_size / min_size).max(1);
        if plans.len() > max_species {
            plans.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
            for (key, adjusted, _) in plans.drain(max_species..) {
                log::debug!("Species {key} dropped (adjusted score {adjusted:.3}), no room left");
                species.remove(key);
            }
            plans.sort_by_key(|p| p.0);
        }

        for (key, adjusted, _) in &plans {
            if let Some(s) = species.get_mut(*key) {
                s.adjusted_fitness = Some(*adjusted);
            }
        }

        let adjusted: Vec<f32> = plans.iter().map(|p| p.1).collect();
        let previous: Vec<usize> = plans.iter().map(|p| p.2.len()).collect();
        let quotas = compute_spawn(&adjusted, &previous, self.pop_size, min_size);

        let mut next = BTreeMap::new();
        for ((key, _, mut members), quota) in plans.into_iter().zip(quotas) {
            members.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));

            let elites = self.config.effective_elitism().min(quota).min(members.len());
            for &(genome_key, _) in &members[..elites] {
                if let Some(genome) = population.get(&genome_key) {
                    next.insert(genome_key, genome.clone());
                }
            }

            let survivors = ((self.config.survival_threshold * members.len() as f32).ceil() as usize)
                .max(2)
                .min(members.len());
            let pool = &members[..survivors];

            for _ in elites..quota {
                let child_key = self.allocate_key();
                let first = select_index(pool, &self.config.selection, rng);
                let Some(parent_a) = population.get(&pool[first].0) else {
                    continue;
                };

                let child = if pool.len() >= 2 && rng.chance(self.config.crossover_rate) {
                    let mut second = select_index(pool, &self.config.selection, rng);
                    if second == first {
                        second = (first + 1 + rng.index(pool.len() - 1)) % pool.len();
                    }
                    match population.get(&pool[second].0) {
                        Some(parent_b) => {
                            let crossed = rng.crossover(
                                child_key,
                                parent_a,
                                pool[first].1,
                                parent_b,
                                pool[second].1,
                                self.config.fitter_parent_bias,
                            );
                            rng.mutate(&crossed, child_key, genome_config, tracker)
                        }
                        None => rng.mutate(parent_a, child_key, genome_config, tracker),
                    }
                } else {
                    rng.mutate(parent_a, child_key, genome_config, tracker)
                };
                next.insert(child_key, child);
            }
            log::debug!("Species {key}: quota {quota}, {elites} elites");
        }

        Ok(next)
    }
}

/// Offspring quota per species, summing to exactly `pop_size`.
///
/// Each species moves half-way from its previous size toward its share of
/// `pop_size` by adjusted score, never below `min_size`. Requires
/// `adjusted.len() * min_size <= pop_size`.
pub fn compute_spawn(
    adjusted: &[f32],
    previous: &[usize],
    pop_size: usize,
    min_size: usize,
) -> Vec<usize> {
    if adjusted.is_empty() {
        return Vec::new();
    }

    let sum: f32 = adjusted.iter().sum();
    let raw: Vec<f32> = adjusted
        .iter()
        .zip(previous)
        .map(|(&af, &ps)| {
            let target = if sum > 0.0 {
                (af / sum * pop_size as f32).max(min_size as f32)
            } else {
                min_size as f32
            };
            let ps = ps as f32;
            let d = (target - ps) * 0.5;
            let c = d.round();
            if c.abs() > 0.0 {
                ps + c
            } else if d > 0.0 {
                ps + 1.0
            } else if d < 0.0 {
                ps - 1.0
            } else {
                ps
            }
        })
        .collect();

    let total: f32 = raw.iter().sum();
    let norm = if total > 0.0 {
        pop_size as f32 / total
    } else {
        1.0
    };
    let mut quotas: Vec<usize> = raw
        .iter()
        .map(|n| ((n * norm).round().max(0.0) as usize).max(min_size))
        .collect();

    let mut total: usize = quotas.iter().sum();
    while total > pop_size {
        // Shrink the largest quota, the weaker species on ties.
        let Some(i) = (0..quotas.len())
            .filter(|&i| quotas[i] > min_size)
            .max_by(|&a, &b| {
                quotas[a]
                    .cmp(&quotas[b])
                    .then(adjusted[b].total_cmp(&adjusted[a]))
            })
        else {
            break;
        };
        quotas[i] -= 1;
        total -= 1;
    }
    while total < pop_size {
        let best = (0..quotas.len())
            .max_by(|&a, &b| adjusted[a].total_cmp(&adjusted[b]).then(b.cmp(&a)))
            .unwrap_or(0);
        quotas[best] += 1;
        total += 1;
    }
    quotas
}

/// Select a parent from `pool`, which is sorted best first.
fn select_index(
    pool: &[(GenomeKey, f32)],
    method: &SelectionMethod,
    rng: &mut GenomeRng,
) -> usize {
    let n = pool.len();
    if n <= 1 {
        return 0;
    }

    match method {
        SelectionMethod::Tournament { size } => {
            let mut best_idx = rng.index(n);
            for _ in 1..(*size).max(1) {
                let idx = rng.index(n);
                if pool[idx].1 > pool[best_idx].1 {
                    best_idx = idx;
                }
            }
            best_idx
        }
        SelectionMethod::RankBased => {
            // Best has rank n, worst rank 1.
            let total_rank: usize = (1..=n).sum();
            let mut target = rng.index(total_rank);
            for i in 0..n {
                let rank = n - i;
                if target < rank {
                    return i;
                }
                target -= rank;
            }
            0
        }
        SelectionMethod::RouletteWheel => {
            let total: f32 = pool.iter().map(|(_, s)| s.max(0.0)).sum();
            if total <= 0.0 {
                return rng.index(n);
            }
            let target = rng.unit() * total;
            let mut cumulative = 0.0;
            for (i, (_, score)) in pool.iter().enumerate() {
                cumulative += score.max(0.0);
                if cumulative > target {
                    return i;
                }
            }
            n - 1
        }
    }
}
