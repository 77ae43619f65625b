//! Generation reporters.
//!
//! Reporters observe a run without owning any of its state. The engine calls
//! them on the orchestrating thread at fixed points of every generation, and
//! any reporter may ask the run to stop once a generation is complete.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::genome::{Genome, GenomeKey};
use super::novelty::NoveltyArchive;
use super::population::{BestGenome, Checkpoint, NeatError, Population};
use super::species::{SpeciesKey, SpeciesSet};
use crate::schema::{EvaluationResult, EvolutionHistory, GenerationStats, GenomeScore};

/// What a reporter wants after a generation ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReporterAction {
    #[default]
    Continue,
    Stop,
}

/// Everything known about a generation once it is complete.
///
/// `genomes` and `scores` describe the evaluated generation; the engine has
/// already published its offspring, so [`GenerationSummary::checkpoint`]
/// resumes with the next generation.
pub struct GenerationSummary<'a> {
    pub generation: usize,
    pub genomes: &'a BTreeMap<GenomeKey, Genome>,
    pub scores: &'a BTreeMap<GenomeKey, GenomeScore>,
    pub stats: &'a GenerationStats,
    pub(crate) population: &'a Population,
}

impl GenerationSummary<'_> {
    pub fn species(&self) -> &SpeciesSet {
        self.population.species()
    }

    pub fn archive(&self) -> &NoveltyArchive {
        self.population.archive()
    }

    /// Best genome by reward over the whole run so far.
    pub fn best(&self) -> Option<&BestGenome> {
        self.population.best()
    }

    /// Snapshot of the engine, ready to run the next generation.
    pub fn checkpoint(&self) -> Checkpoint {
        self.population.checkpoint()
    }
}

/// Observer of a population run.
pub trait Reporter: Send {
    fn on_generation_start(&mut self, _generation: usize, _genomes: &BTreeMap<GenomeKey, Genome>) {}

    fn on_evaluation_complete(
        &mut self,
        _generation: usize,
        _results: &BTreeMap<GenomeKey, EvaluationResult>,
    ) {
    }

    fn on_generation_end(
        &mut self,
        summary: &GenerationSummary<'_>,
    ) -> Result<ReporterAction, NeatError>;

    fn on_species_stagnant(&mut self, _generation: usize, _species: SpeciesKey, _members: usize) {}

    fn on_extinction(&mut self, _generation: usize) {}
}

/// Logs a short report for every generation.
#[derive(Debug, Clone, Default)]
pub struct StdOutReporter {
    show_species_detail: bool,
}

impl StdOutReporter {
    pub fn new(show_species_detail: bool) -> Self {
        Self {
            show_species_detail,
        }
    }
}

impl Reporter for StdOutReporter {
    fn on_generation_start(&mut self, generation: usize, genomes: &BTreeMap<GenomeKey, Genome>) {
        log::info!(
            "****** Running generation {generation} ({} genomes) ******",
            genomes.len()
        );
    }

    fn on_generation_end(
        &mut self,
        summary: &GenerationSummary<'_>,
    ) -> Result<ReporterAction, NeatError> {
        let stats = summary.stats;
        log::info!(
            "Reward: best {:.4}, mean {:.4}, std {:.4}",
            stats.best_reward,
            stats.mean_reward,
            stats.reward_std
        );
        log::info!(
            "Novelty: best {:.4}, mean {:.4}; archive {} (+{}), threshold {:.4}",
            stats.best_novelty,
            stats.mean_novelty,
            stats.archive_size,
            stats.archive_added,
            stats.novelty_threshold
        );
        log::info!(
            "{} species, mean size {:.1} nodes / {:.1} connections, {:.3}s",
            stats.num_species,
            stats.mean_nodes,
            stats.mean_connections,
            stats.elapsed_seconds
        );

        if self.show_species_detail {
            for species in summary.species().iter() {
                log::info!(
                    "  species {:>4}  age {:>3}  size {:>4}  fitness {:>8}  adjusted {:>6}  stagnant {:>3}",
                    species.key,
                    summary.generation.saturating_sub(species.created),
                    species.members.len(),
                    species.fitness.map_or("--".to_string(), |f| format!("{f:.3}")),
                    species
                        .adjusted_fitness
                        .map_or("--".to_string(), |f| format!("{f:.3}")),
                    species.stagnant_for(summary.generation)
                );
            }
        }

        if let Some(best) = summary.best() {
            log::info!(
                "Best genome so far: {} (reward {:.4}, generation {})",
                best.genome.key,
                best.score.reward,
                best.generation
            );
        }
        Ok(ReporterAction::Continue)
    }

    fn on_species_stagnant(&mut self, generation: usize, species: SpeciesKey, members: usize) {
        log::info!("Generation {generation}: species {species} with {members} members is stagnant");
    }

    fn on_extinction(&mut self, generation: usize) {
        log::info!("Generation {generation}: all species extinct");
    }
}

/// Keeps per-generation statistics in memory.
#[derive(Debug, Clone, Default)]
pub struct StatisticsReporter {
    generations: Vec<GenerationStats>,
    history: EvolutionHistory,
}

impl StatisticsReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn generations(&self) -> &[GenerationStats] {
        &self.generations
    }

    pub fn history(&self) -> &EvolutionHistory {
        &self.history
    }

    /// Best reward per generation.
    pub fn best_rewards(&self) -> &[f32] {
        &self.history.best_reward
    }

    /// Write every recorded generation as a JSON array.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), NeatError> {
        write_json(path.as_ref(), &self.generations)
    }
}

impl Reporter for StatisticsReporter {
    fn on_generation_end(
        &mut self,
        summary: &GenerationSummary<'_>,
    ) -> Result<ReporterAction, NeatError> {
        self.history.record(summary.stats);
        self.generations.push(summary.stats.clone());
        Ok(ReporterAction::Continue)
    }
}

/// Archive state after one generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveRecord {
    pub generation: usize,
    pub archive_size: usize,
    pub added: usize,
    pub threshold: f32,
}

/// Tracks how the novelty archive grows and how its threshold adapts.
#[derive(Debug, Clone, Default)]
pub struct NoveltySearchReporter {
    records: Vec<ArchiveRecord>,
}

impl NoveltySearchReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> &[ArchiveRecord] {
        &self.records
    }

    /// Archive size after each generation.
    pub fn archive_sizes(&self) -> Vec<usize> {
        self.records.iter().map(|r| r.archive_size).collect()
    }
}

impl Reporter for NoveltySearchReporter {
    fn on_generation_end(
        &mut self,
        summary: &GenerationSummary<'_>,
    ) -> Result<ReporterAction, NeatError> {
        let stats = summary.stats;
        let previous = self.records.last().map(|r| r.threshold);
        if let Some(previous) = previous
            && previous != stats.novelty_threshold
        {
            log::debug!(
                "Novelty threshold {previous:.4} -> {:.4} after {} admissions",
                stats.novelty_threshold,
                stats.archive_added
            );
        }
        self.records.push(ArchiveRecord {
            generation: summary.generation,
            archive_size: stats.archive_size,
            added: stats.archive_added,
            threshold: stats.novelty_threshold,
        });
        Ok(ReporterAction::Continue)
    }
}

/// Writes run results into a directory.
///
/// After every generation it rewrites `history.json` and writes the
/// generation's best genome. Every `checkpoint_interval` generations it also
/// writes a checkpoint that [`Population::restore`] can resume from.
#[derive(Debug, Clone)]
pub struct SaveResultReporter {
    output_dir: PathBuf,
    checkpoint_interval: Option<usize>,
    history: EvolutionHistory,
}

impl SaveResultReporter {
    /// Create the reporter, creating `output_dir` if needed.
    pub fn new<P: AsRef<Path>>(
        output_dir: P,
        checkpoint_interval: Option<usize>,
    ) -> Result<Self, NeatError> {
        let output_dir = output_dir.as_ref().to_path_buf();
        fs::create_dir_all(&output_dir).map_err(|source| NeatError::Io {
            path: output_dir.clone(),
            source,
        })?;
        Ok(Self {
            output_dir,
            checkpoint_interval: checkpoint_interval.filter(|&n| n > 0),
            history: EvolutionHistory::default(),
        })
    }

    pub fn history_path(&self) -> PathBuf {
        self.output_dir.join("history.json")
    }

    pub fn best_genome_path(&self, generation: usize) -> PathBuf {
        self.output_dir.join(format!("best_genome_{generation:04}.json"))
    }

    pub fn checkpoint_path(&self, generation: usize) -> PathBuf {
        self.output_dir.join(format!("checkpoint_{generation:04}.json"))
    }
}

impl Reporter for SaveResultReporter {
    fn on_generation_end(
        &mut self,
        summary: &GenerationSummary<'_>,
    ) -> Result<ReporterAction, NeatError> {
        let generation = summary.generation;
        self.history.record(summary.stats);
        write_json(&self.history_path(), &self.history)?;

        let best = summary
            .scores
            .iter()
            .max_by(|a, b| a.1.reward.total_cmp(&b.1.reward).then(b.0.cmp(a.0)))
            .and_then(|(key, _)| summary.genomes.get(key));
        if let Some(genome) = best {
            write_json(&self.best_genome_path(generation), genome)?;
        }

        if let Some(interval) = self.checkpoint_interval
            && (generation + 1) % interval == 0
        {
            let path = self.checkpoint_path(generation);
            summary.checkpoint().save(&path)?;
            log::debug!("Checkpoint written to {}", path.display());
        }
        Ok(ReporterAction::Continue)
    }
}

/// Stops the run once a generation's best reward reaches a threshold.
#[derive(Debug, Clone, Copy)]
pub struct RewardThresholdReporter {
    threshold: f32,
}

impl RewardThresholdReporter {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }
}

impl Reporter for RewardThresholdReporter {
    fn on_generation_end(
        &mut self,
        summary: &GenerationSummary<'_>,
    ) -> Result<ReporterAction, NeatError> {
        if summary.stats.best_reward >= self.threshold {
            log::info!(
                "Generation {}: best reward {:.4} reached threshold {:.4}",
                summary.generation,
                summary.stats.best_reward,
                self.threshold
            );
            Ok(ReporterAction::Stop)
        } else {
            Ok(ReporterAction::Continue)
        }
    }
}

pub(crate) fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), NeatError> {
    let json = serde_json::to_string_pretty(value)?;
    fs::write(path, json).map_err(|source| NeatError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::PopulationEvaluator;
    use crate::compute::parallel::EvaluationError;
    use crate::schema::{GenomeConfig, NeatConfig};
    use tempfile::tempdir;

    /// Rewards genomes by their connection count; behavior is the
    /// connection count and mean weight.
    struct SizeEvaluator;

    impl PopulationEvaluator for SizeEvaluator {
        fn evaluate(
            &self,
            genomes: &BTreeMap<GenomeKey, Genome>,
            _config: &GenomeConfig,
            _generation: usize,
        ) -> Result<BTreeMap<GenomeKey, EvaluationResult>, EvaluationError> {
            Ok(genomes
                .iter()
                .map(|(&key, genome)| {
                    let n = genome.connections.len() as f32;
                    let mean_weight =
                        genome.connections.values().map(|c| c.weight).sum::<f32>() / n.max(1.0);
                    (key, EvaluationResult::new(n, vec![n, mean_weight]))
                })
                .collect())
        }
    }

    fn small_config() -> NeatConfig {
        let mut config = NeatConfig::default();
        config.population.pop_size = 12;
        config.population.random_seed = Some(5);
        config
    }

    #[test]
    fn test_statistics_reporter_records_each_generation() {
        let population = Population::new(small_config()).unwrap();
        let mut reporter = StatisticsReporter::new();
        let scores = BTreeMap::new();
        let genomes = BTreeMap::new();
        for generation in 0..3 {
            let stats = GenerationStats {
                generation,
                best_reward: generation as f32,
                ..Default::default()
            };
            let summary = GenerationSummary {
                generation,
                genomes: &genomes,
                scores: &scores,
                stats: &stats,
                population: &population,
            };
            assert_eq!(
                reporter.on_generation_end(&summary).unwrap(),
                ReporterAction::Continue
            );
        }
        assert_eq!(reporter.generations().len(), 3);
        assert_eq!(reporter.best_rewards(), &[0.0, 1.0, 2.0]);

        let dir = tempdir().unwrap();
        let path = dir.path().join("stats.json");
        reporter.save(&path).unwrap();
        let saved: Vec<GenerationStats> =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(saved.len(), 3);
    }

    #[test]
    fn test_novelty_reporter_tracks_archive() {
        let mut population = Population::new(small_config()).unwrap();
        let mut reporter = NoveltySearchReporter::new();
        for generation in 0..3 {
            population.run(&SizeEvaluator, 1).unwrap();
            let stats = GenerationStats {
                generation,
                archive_size: population.archive().len(),
                novelty_threshold: population.archive().threshold(),
                ..Default::default()
            };
            let scores = BTreeMap::new();
            let genomes = BTreeMap::new();
            let summary = GenerationSummary {
                generation,
                genomes: &genomes,
                scores: &scores,
                stats: &stats,
                population: &population,
            };
            reporter.on_generation_end(&summary).unwrap();
        }
        let sizes = reporter.archive_sizes();
        assert_eq!(sizes.len(), 3);
        assert!(sizes.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_save_result_reporter_writes_files() {
        let dir = tempdir().unwrap();
        let out = dir.path().join("run");
        let reporter = SaveResultReporter::new(&out, Some(2)).unwrap();
        let history_path = reporter.history_path();
        let best_path = reporter.best_genome_path(3);
        let checkpoint_path = reporter.checkpoint_path(3);

        let mut population = Population::new(small_config()).unwrap();
        population.add_reporter(Box::new(reporter));
        population.run(&SizeEvaluator, 4).unwrap();

        let history: EvolutionHistory =
            serde_json::from_str(&fs::read_to_string(&history_path).unwrap()).unwrap();
        assert_eq!(history.len(), 4);

        let best: Genome = serde_json::from_str(&fs::read_to_string(&best_path).unwrap()).unwrap();
        assert!(best.validate(&population.config().genome).is_ok());

        assert!(checkpoint_path.exists());
        assert!(!out.join("checkpoint_0002.json").exists());
        let checkpoint = Checkpoint::load(&checkpoint_path).unwrap();
        assert_eq!(checkpoint.generation, 4);
    }

    #[test]
    fn test_reward_threshold_reporter_stops_run() {
        let mut population = Population::new(small_config()).unwrap();
        population.add_reporter(Box::new(RewardThresholdReporter::new(f32::NEG_INFINITY)));
        population.run(&SizeEvaluator, 10).unwrap();
        assert_eq!(population.generation(), 1);
    }
}
