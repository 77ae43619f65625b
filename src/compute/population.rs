//! The population engine: one generation at a time, from evaluation to
//! published offspring.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use serde::{Deserialize, Serialize};

use super::genome::{Genome, GenomeKey, GenomeRng, GenomeStructureError};
use super::innovation::InnovationTracker;
use super::network::NetworkError;
use super::novelty::{NoveltyArchive, ThresholdChange};
use super::parallel::{EvaluationError, PopulationEvaluator};
use super::reporting::{GenerationSummary, Reporter, ReporterAction, write_json};
use super::reproduction::{CompleteExtinction, Reproduction};
use super::species::{SpeciesKey, SpeciesSet};
use crate::schema::{
    BehaviorDescriptor, ConfigError, EnginePhase, EvaluationResult, GenerationStats, GenomeScore,
    NeatConfig, StopReason,
};

/// Errors that end a run.
#[derive(Debug, thiserror::Error)]
pub enum NeatError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Evaluation(#[from] EvaluationError),
    #[error("Invalid genome: {0}")]
    GenomeStructure(#[from] GenomeStructureError),
    #[error("Network activation failed: {0}")]
    Network(#[from] NetworkError),
    #[error("Every species went extinct in generation {generation}")]
    CompleteExtinction { generation: usize },
    #[error("Run cancelled at generation {generation} before any genome was evaluated")]
    Cancelled { generation: usize },
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Highest-reward genome seen during a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BestGenome {
    pub genome: Genome,
    pub score: GenomeScore,
    /// Generation in which it was evaluated.
    pub generation: usize,
}

/// Serializable engine state between two generations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Generation the restored engine will run next.
    pub generation: usize,
    pub config: NeatConfig,
    pub seed: u64,
    pub genomes: BTreeMap<GenomeKey, Genome>,
    pub species: SpeciesSet,
    pub archive: NoveltyArchive,
    pub tracker: InnovationTracker,
    pub reproduction: Reproduction,
    pub best: Option<BestGenome>,
}

impl Checkpoint {
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), NeatError> {
        write_json(path.as_ref(), self)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, NeatError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| NeatError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_json::from_str(&text)?)
    }
}

/// Novelty-search NEAT population.
///
/// Owns every piece of evolutionary state. Only `run` mutates it, always on
/// the calling thread; workers see cloned genomes and shared configuration.
/// A generation's offspring, archive admissions, species and innovation
/// records are published together once every phase succeeded, so a failed
/// generation leaves the previous snapshot in place.
pub struct Population {
    config: NeatConfig,
    seed: u64,
    rng: GenomeRng,
    tracker: InnovationTracker,
    reproduction: Reproduction,
    genomes: BTreeMap<GenomeKey, Genome>,
    species: SpeciesSet,
    archive: NoveltyArchive,
    reporters: Vec<Box<dyn Reporter>>,
    generation: usize,
    best: Option<BestGenome>,
    phase: EnginePhase,
    stop_reason: Option<StopReason>,
    cancelled: Arc<AtomicBool>,
}

impl Population {
    /// Validate `config` and seed the initial population.
    pub fn new(config: NeatConfig) -> Result<Self, NeatError> {
        config.validate()?;

        let seed = config.population.random_seed.unwrap_or_else(rand::random);
        let mut rng = GenomeRng::new(seed);
        let mut tracker = InnovationTracker::new(&config.genome);
        let mut reproduction = Reproduction::new(&config);
        let genomes = reproduction.create_new(
            config.population.pop_size,
            &config.genome,
            &mut tracker,
            &mut rng,
        );
        let archive = NoveltyArchive::new(&config.novelty);
        log::debug!("Seeded {} genomes (seed {seed})", config.population.pop_size);

        Ok(Self {
            config,
            seed,
            rng,
            tracker,
            reproduction,
            genomes,
            species: SpeciesSet::new(),
            archive,
            reporters: Vec::new(),
            generation: 0,
            best: None,
            phase: EnginePhase::Initialized,
            stop_reason: None,
            cancelled: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Resume from a checkpoint. Reporters are not part of a checkpoint.
    pub fn restore(checkpoint: Checkpoint) -> Result<Self, NeatError> {
        checkpoint.config.validate()?;
        Ok(Self {
            rng: GenomeRng::new(generation_seed(checkpoint.seed, checkpoint.generation)),
            config: checkpoint.config,
            seed: checkpoint.seed,
            tracker: checkpoint.tracker,
            reproduction: checkpoint.reproduction,
            genomes: checkpoint.genomes,
            species: checkpoint.species,
            archive: checkpoint.archive,
            reporters: Vec::new(),
            generation: checkpoint.generation,
            best: checkpoint.best,
            phase: EnginePhase::Initialized,
            stop_reason: None,
            cancelled: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Snapshot the state needed to continue this run.
    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            generation: self.generation,
            config: self.config.clone(),
            seed: self.seed,
            genomes: self.genomes.clone(),
            species: self.species.clone(),
            archive: self.archive.clone(),
            tracker: self.tracker.clone(),
            reproduction: self.reproduction.clone(),
            best: self.best.clone(),
        }
    }

    pub fn add_reporter(&mut self, reporter: Box<dyn Reporter>) {
        self.reporters.push(reporter);
    }

    /// Get cancellation handle. Setting it stops the run before the next generation.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }

    pub fn config(&self) -> &NeatConfig {
        &self.config
    }

    /// The current (not yet evaluated) population.
    pub fn genomes(&self) -> &BTreeMap<GenomeKey, Genome> {
        &self.genomes
    }

    pub fn species(&self) -> &SpeciesSet {
        &self.species
    }

    pub fn archive(&self) -> &NoveltyArchive {
        &self.archive
    }

    pub fn best(&self) -> Option<&BestGenome> {
        self.best.as_ref()
    }

    /// Number of completed generations.
    pub fn generation(&self) -> usize {
        self.generation
    }

    pub fn phase(&self) -> EnginePhase {
        self.phase
    }

    /// Why the last call to [`Population::run`] stopped.
    pub fn stop_reason(&self) -> Option<&StopReason> {
        self.stop_reason.as_ref()
    }

    /// Run up to `generations` more generations.
    ///
    /// Stops early when a reporter asks to, when a generation's best reward
    /// reaches `population.reward_threshold`, or when the cancel handle is
    /// set. Returns the best genome by reward seen so far.
    pub fn run<E>(&mut self, evaluator: &E, generations: usize) -> Result<BestGenome, NeatError>
    where
        E: PopulationEvaluator + ?Sized,
    {
        if generations == 0 {
            return Err(ConfigError::NoGenerations.into());
        }

        let mut reason = StopReason::MaxGenerations;
        for _ in 0..generations {
            if self.cancelled.load(Ordering::Relaxed) {
                reason = StopReason::Cancelled;
                break;
            }

            let (action, best_reward) = self.run_generation(evaluator)?;
            if action == ReporterAction::Stop {
                reason = StopReason::ReporterRequested;
                break;
            }
            if let Some(threshold) = self.config.population.reward_threshold
                && best_reward >= threshold
            {
                reason = StopReason::RewardThreshold;
                break;
            }
        }

        log::info!("Run stopped after generation {}: {reason:?}", self.generation);
        self.phase = EnginePhase::Terminated;
        self.stop_reason = Some(reason);
        self.best.clone().ok_or(NeatError::Cancelled {
            generation: self.generation,
        })
    }

    fn run_generation<E>(&mut self, evaluator: &E) -> Result<(ReporterAction, f32), NeatError>
    where
        E: PopulationEvaluator + ?Sized,
    {
        let generation = self.generation;
        let started = Instant::now();
        self.rng = GenomeRng::new(generation_seed(self.seed, generation));

        self.with_reporters(|reporters, population| {
            for reporter in reporters.iter_mut() {
                reporter.on_generation_start(generation, &population.genomes);
            }
        });

        self.phase = EnginePhase::Evaluating;
        let mut raw = evaluator.evaluate(&self.genomes, &self.config.genome, generation)?;
        let results: BTreeMap<GenomeKey, EvaluationResult> = self
            .genomes
            .keys()
            .map(|&key| {
                raw.remove(&key)
                    .map(|result| (key, result))
                    .ok_or(EvaluationError::MissingResult { key, generation })
            })
            .collect::<Result<_, _>>()?;

        self.with_reporters(|reporters, _| {
            for reporter in reporters.iter_mut() {
                reporter.on_evaluation_complete(generation, &results);
            }
        });

        // Everything below works on copies; they replace the live state only
        // once reproduction has succeeded.
        let mut archive = self.archive.clone();
        let mut species = self.species.clone();
        let mut tracker = self.tracker.clone();
        let mut reproduction = self.reproduction.clone();

        self.phase = EnginePhase::Scoring;
        let (scores, archive_added) = score(&mut archive, &results, generation)?;
        let best = self.best_candidate(&scores, generation);

        self.phase = EnginePhase::Speciating;
        species.speciate(
            &self.genomes,
            generation,
            &self.config.species,
            &self.config.genome,
            &mut self.rng,
        );
        let selection: BTreeMap<GenomeKey, f32> =
            scores.iter().map(|(&key, s)| (key, s.score)).collect();
        let stagnation = species.update_stagnation(&selection, generation, &self.config.species);
        let stagnant: Vec<(SpeciesKey, usize)> = stagnation
            .iter()
            .filter(|s| s.stagnant)
            .filter_map(|s| species.get(s.key).map(|sp| (s.key, sp.members.len())))
            .collect();
        self.with_reporters(|reporters, _| {
            for &(key, members) in &stagnant {
                for reporter in reporters.iter_mut() {
                    reporter.on_species_stagnant(generation, key, members);
                }
            }
        });

        let mut stats = GenerationStats::from_scores(generation, &scores);
        stats.num_species = species.len();
        stats.archive_size = archive.len();
        stats.archive_added = archive_added;
        stats.novelty_threshold = archive.threshold();
        let n = self.genomes.len().max(1) as f32;
        let (nodes, connections) = self
            .genomes
            .values()
            .map(Genome::size)
            .fold((0, 0), |(total_n, total_c), (n, c)| (total_n + n, total_c + c));
        stats.mean_nodes = nodes as f32 / n;
        stats.mean_connections = connections as f32 / n;

        self.phase = EnginePhase::Reproducing;
        tracker.begin_generation();
        let next = match reproduction.reproduce(
            &self.config.genome,
            &mut species,
            &stagnation,
            &self.genomes,
            &selection,
            &mut tracker,
            &mut self.rng,
        ) {
            Ok(next) => next,
            Err(CompleteExtinction) => {
                self.with_reporters(|reporters, _| {
                    for reporter in reporters.iter_mut() {
                        reporter.on_extinction(generation);
                    }
                });
                if !self.config.population.reset_on_extinction {
                    return Err(NeatError::CompleteExtinction { generation });
                }
                log::warn!("Generation {generation}: complete extinction, reseeding population");
                species.clear();
                reproduction.create_new(
                    self.config.population.pop_size,
                    &self.config.genome,
                    &mut tracker,
                    &mut self.rng,
                )
            }
        };

        // Publish.
        self.archive = archive;
        self.species = species;
        self.tracker = tracker;
        self.reproduction = reproduction;
        if best.is_some() {
            self.best = best;
        }
        let evaluated = std::mem::replace(&mut self.genomes, next);
        self.generation += 1;
        stats.elapsed_seconds = started.elapsed().as_secs_f64();

        self.phase = EnginePhase::Reporting;
        let action = self.with_reporters(|reporters, population| {
            let summary = GenerationSummary {
                generation,
                genomes: &evaluated,
                scores: &scores,
                stats: &stats,
                population,
            };
            let mut action = ReporterAction::Continue;
            for reporter in reporters.iter_mut() {
                if reporter.on_generation_end(&summary)? == ReporterAction::Stop {
                    action = ReporterAction::Stop;
                }
            }
            Ok::<_, NeatError>(action)
        })?;

        Ok((action, stats.best_reward))
    }

    /// The generation's highest-reward genome, if it beats the tracked best.
    fn best_candidate(
        &self,
        scores: &BTreeMap<GenomeKey, GenomeScore>,
        generation: usize,
    ) -> Option<BestGenome> {
        let (&key, score) = scores
            .iter()
            .max_by(|a, b| a.1.reward.total_cmp(&b.1.reward).then(b.0.cmp(a.0)))?;
        if self
            .best
            .as_ref()
            .is_some_and(|best| best.score.reward >= score.reward)
        {
            return None;
        }
        let genome = self.genomes.get(&key)?;
        log::debug!(
            "Generation {generation}: new best genome {key} (reward {:.4})",
            score.reward
        );
        Some(BestGenome {
            genome: genome.clone(),
            score: *score,
            generation,
        })
    }

    /// Lend the reporters out alongside a shared view of the engine.
    fn with_reporters<T>(
        &mut self,
        f: impl FnOnce(&mut [Box<dyn Reporter>], &Population) -> T,
    ) -> T {
        let mut reporters = std::mem::take(&mut self.reporters);
        let out = f(&mut reporters, self);
        self.reporters = reporters;
        out
    }
}

/// Novelty scoring, archive admission and selection scores.
///
/// Returns the scores and the number of genomes admitted to `archive`.
fn score(
    archive: &mut NoveltyArchive,
    results: &BTreeMap<GenomeKey, EvaluationResult>,
    generation: usize,
) -> Result<(BTreeMap<GenomeKey, GenomeScore>, usize), NeatError> {
    let behaviors: BTreeMap<GenomeKey, BehaviorDescriptor> = results
        .iter()
        .map(|(&key, r)| (key, r.behavior.clone()))
        .collect();
    let novelty = archive.score_population(&behaviors).map_err(|(key, source)| {
        EvaluationError::DescriptorShape {
            key,
            generation,
            source,
        }
    })?;

    let mut scores = BTreeMap::new();
    for (&key, result) in results {
        let n = novelty.get(&key).copied().unwrap_or(0.0);
        archive.consider_add(key, &result.behavior, n, result.reward, generation);
        scores.insert(key, archive.selection_score(n, result.reward));
    }

    let added = archive.added_this_generation();
    match archive.end_generation() {
        ThresholdChange::Raised { from, to } | ThresholdChange::Lowered { from, to } => {
            log::debug!("Generation {generation}: {added} archived, threshold {from:.4} -> {to:.4}");
        }
        ThresholdChange::Unchanged => {
            log::debug!("Generation {generation}: {added} archived");
        }
    }
    Ok((scores, added))
}

/// Per-generation RNG seed, so a restored checkpoint replays the same draws.
fn generation_seed(seed: u64, generation: usize) -> u64 {
    seed ^ (generation as u64 + 1).wrapping_mul(0x9E37_79B9_7F4A_7C15)
}
