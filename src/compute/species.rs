//! Speciation by genetic distance and stagnation tracking.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::genome::{Genome, GenomeKey, GenomeRng};
use crate::schema::{GenomeConfig, SpeciesConfig};

/// Identifier of a species within a run.
pub type SpeciesKey = u64;

/// A cluster of genetically similar genomes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Species {
    pub key: SpeciesKey,
    /// Generation the species was founded.
    pub created: usize,
    /// Last generation the species fitness improved on its history.
    pub last_improved: usize,
    pub representative: Genome,
    /// Member genome keys in ascending order.
    pub members: Vec<GenomeKey>,
    /// Species fitness of the latest generation.
    pub fitness: Option<f32>,
    /// Normalized fitness assigned during reproduction.
    pub adjusted_fitness: Option<f32>,
    pub fitness_history: Vec<f32>,
}

impl Species {
    fn new(key: SpeciesKey, generation: usize, representative: Genome) -> Self {
        Self {
            key,
            created: generation,
            last_improved: generation,
            representative,
            members: Vec::new(),
            fitness: None,
            adjusted_fitness: None,
            fitness_history: Vec::new(),
        }
    }

    /// Generations since the last improvement.
    pub fn stagnant_for(&self, generation: usize) -> usize {
        generation.saturating_sub(self.last_improved)
    }
}

/// Stagnation verdict for one species.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StagnationStatus {
    pub key: SpeciesKey,
    pub fitness: f32,
    pub stagnant: bool,
}

/// Every species of the current generation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpeciesSet {
    species: BTreeMap<SpeciesKey, Species>,
    genome_to_species: BTreeMap<GenomeKey, SpeciesKey>,
    next_key: SpeciesKey,
}

impl SpeciesSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Partition `genomes` into species.
    ///
    /// Genomes are visited in key order; each joins the first species (in key
    /// order, founders of this pass included) whose representative lies within
    /// `compatibility_threshold`, or founds a new species. Species left without
    /// members are dropped and every survivor takes a random member as its new
    /// representative.
    pub fn speciate(
        &mut self,
        genomes: &BTreeMap<GenomeKey, Genome>,
        generation: usize,
        config: &SpeciesConfig,
        genome_config: &GenomeConfig,
        rng: &mut GenomeRng,
    ) {
        for species in self.species.values_mut() {
            species.members.clear();
        }
        self.genome_to_species.clear();

        for (&key, genome) in genomes {
            let found = self
                .species
                .values()
                .find(|s| {
                    s.representative.distance(genome, genome_config)
                        < config.compatibility_threshold
                })
                .map(|s| s.key);

            let species_key = match found {
                Some(species_key) => species_key,
                None => {
                    let species_key = self.next_key;
                    self.next_key += 1;
                    self.species
                        .insert(species_key, Species::new(species_key, generation, genome.clone()));
                    log::debug!("Species {species_key} founded by genome {key}");
                    species_key
                }
            };

            if let Some(species) = self.species.get_mut(&species_key) {
                species.members.push(key);
            }
            self.genome_to_species.insert(key, species_key);
        }

        self.species.retain(|_, s| !s.members.is_empty());

        for species in self.species.values_mut() {
            let pick = species.members[rng.index(species.members.len())];
            if let Some(genome) = genomes.get(&pick) {
                species.representative = genome.clone();
            }
        }
    }

    /// Update species fitness from member scores and decide stagnation.
    ///
    /// The `species_elitism` fittest species are never stagnant, and no
    /// species is marked stagnant once only `species_elitism` non-stagnant
    /// species would remain. Returned in ascending fitness order.
    pub fn update_stagnation(
        &mut self,
        scores: &BTreeMap<GenomeKey, f32>,
        generation: usize,
        config: &SpeciesConfig,
    ) -> Vec<StagnationStatus> {
        let mut ranked = Vec::with_capacity(self.species.len());
        for species in self.species.values_mut() {
            let member_scores: Vec<f32> = species
                .members
                .iter()
                .filter_map(|k| scores.get(k).copied())
                .collect();
            if member_scores.is_empty() {
                continue;
            }
            let fitness = config.species_fitness_func.apply(&member_scores);
            let previous_best = species
                .fitness_history
                .iter()
                .copied()
                .fold(f32::NEG_INFINITY, f32::max);
            if fitness > previous_best {
                species.last_improved = generation;
            }
            species.fitness = Some(fitness);
            species.fitness_history.push(fitness);
            ranked.push((species.key, fitness, species.stagnant_for(generation)));
        }

        ranked.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));

        let total = ranked.len();
        let mut non_stagnant = total;
        let mut result = Vec::with_capacity(total);
        for (idx, (key, fitness, stagnant_for)) in ranked.into_iter().enumerate() {
            let mut stagnant = false;
            if non_stagnant > config.species_elitism {
                stagnant = stagnant_for >= config.max_stagnation;
            }
            if total - idx <= config.species_elitism {
                stagnant = false;
            }
            if stagnant {
                non_stagnant -= 1;
            }
            result.push(StagnationStatus {
                key,
                fitness,
                stagnant,
            });
        }
        result
    }

    pub fn len(&self) -> usize {
        self.species.len()
    }

    pub fn is_empty(&self) -> bool {
        self.species.is_empty()
    }

    pub fn get(&self, key: SpeciesKey) -> Option<&Species> {
        self.species.get(&key)
    }

    pub fn get_mut(&mut self, key: SpeciesKey) -> Option<&mut Species> {
        self.species.get_mut(&key)
    }

    /// Species in key order.
    pub fn iter(&self) -> impl Iterator<Item = &Species> {
        self.species.values()
    }

    /// Species a genome was assigned to in the latest pass.
    pub fn species_of(&self, genome: GenomeKey) -> Option<SpeciesKey> {
        self.genome_to_species.get(&genome).copied()
    }

    /// Drop a species, e.g. when it receives no offspring.
    pub fn remove(&mut self, key: SpeciesKey) -> Option<Species> {
        let removed = self.species.remove(&key)?;
        self.genome_to_species.retain(|_, s| *s != key);
        Some(removed)
    }

    /// Forget every species (used when the population is reseeded).
    pub fn clear(&mut self) {
        self.species.clear();
        self.genome_to_species.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::InnovationTracker;

    fn population(n: u64, seed: u64, config: &GenomeConfig) -> BTreeMap<GenomeKey, Genome> {
        let mut rng = GenomeRng::new(seed);
        let mut tracker = InnovationTracker::new(config);
        (0..n)
            .map(|k| (k, rng.create_random(k, config, &mut tracker)))
            .collect()
    }

    #[test]
    fn test_identical_genomes_share_species() {
        let genome_config = GenomeConfig::default();
        let base = population(1, 1, &genome_config).remove(&0).unwrap();
        let genomes: BTreeMap<GenomeKey, Genome> = (0..10)
            .map(|k| {
                let mut g = base.clone();
                g.key = k;
                (k, g)
            })
            .collect();

        let mut set = SpeciesSet::new();
        let mut rng = GenomeRng::new(0);
        set.speciate(&genomes, 0, &SpeciesConfig::default(), &genome_config, &mut rng);
        assert_eq!(set.len(), 1);
        assert_eq!(set.iter().next().unwrap().members.len(), 10);
    }

    #[test]
    fn test_every_genome_in_exactly_one_species() {
        let genome_config = GenomeConfig::default();
        let genomes = population(40, 3, &genome_config);
        let config = SpeciesConfig {
            compatibility_threshold: 0.8,
            ..Default::default()
        };

        let mut set = SpeciesSet::new();
        let mut rng = GenomeRng::new(0);
        set.speciate(&genomes, 0, &config, &genome_config, &mut rng);

        let mut seen: Vec<GenomeKey> = set.iter().flat_map(|s| s.members.clone()).collect();
        seen.sort_unstable();
        assert_eq!(seen, genomes.keys().copied().collect::<Vec<_>>());
        assert!(set.iter().all(|s| !s.members.is_empty()));
        for species in set.iter() {
            for member in &species.members {
                assert_eq!(set.species_of(*member), Some(species.key));
            }
            assert!(species.members.contains(&species.representative.key));
        }
    }

    #[test]
    fn test_tiny_threshold_splits_everyone() {
        let genome_config = GenomeConfig::default();
        let genomes = population(8, 5, &genome_config);
        let config = SpeciesConfig {
            compatibility_threshold: 1e-9,
            ..Default::default()
        };
        let mut set = SpeciesSet::new();
        let mut rng = GenomeRng::new(0);
        set.speciate(&genomes, 0, &config, &genome_config, &mut rng);
        assert_eq!(set.len(), 8);
    }

    #[test]
    fn test_empty_species_dropped() {
        let genome_config = GenomeConfig::default();
        let config = SpeciesConfig {
            compatibility_threshold: 1e-9,
            ..Default::default()
        };
        let mut set = SpeciesSet::new();
        let mut rng = GenomeRng::new(0);
        set.speciate(&population(6, 5, &genome_config), 0, &config, &genome_config, &mut rng);
        assert_eq!(set.len(), 6);

        set.speciate(&population(2, 9, &genome_config), 1, &config, &genome_config, &mut rng);
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_stagnation_and_species_elitism() {
        let genome_config = GenomeConfig::default();
        let genomes = population(3, 5, &genome_config);
        let config = SpeciesConfig {
            compatibility_threshold: 1e-9,
            max_stagnation: 2,
            species_elitism: 1,
            ..Default::default()
        };
        let mut set = SpeciesSet::new();
        let mut rng = GenomeRng::new(0);
        set.speciate(&genomes, 0, &config, &genome_config, &mut rng);

        let scores: BTreeMap<GenomeKey, f32> = [(0, 1.0), (1, 2.0), (2, 3.0)].into_iter().collect();
        for generation in 0..2 {
            let status = set.update_stagnation(&scores, generation, &config);
            assert!(status.iter().all(|s| !s.stagnant));
        }

        let status = set.update_stagnation(&scores, 2, &config);
        assert_eq!(status.len(), 3);
        assert!(status[0].stagnant);
        assert!(status[1].stagnant);
        // The fittest species is protected.
        assert!(!status[2].stagnant);
        assert_eq!(status[2].fitness, 3.0);
    }

    #[test]
    fn test_improvement_resets_stagnation() {
        let genome_config = GenomeConfig::default();
        let genomes = population(1, 5, &genome_config);
        let config = SpeciesConfig {
            max_stagnation: 1,
            species_elitism: 0,
            ..Default::default()
        };
        let mut set = SpeciesSet::new();
        let mut rng = GenomeRng::new(0);
        set.speciate(&genomes, 0, &config, &genome_config, &mut rng);

        let mut scores: BTreeMap<GenomeKey, f32> = [(0, 1.0)].into_iter().collect();
        set.update_stagnation(&scores, 0, &config);
        scores.insert(0, 2.0);
        let status = set.update_stagnation(&scores, 1, &config);
        assert!(!status[0].stagnant);
        let status = set.update_stagnation(&scores, 2, &config);
        assert!(status[0].stagnant);
    }
}
