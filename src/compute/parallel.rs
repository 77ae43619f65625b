//! Parallel evaluation of a generation on a fixed worker pool.
//!
//! Every genome becomes a self-contained [`EvaluationTask`] carrying its own
//! copy of the genome and shared handles to the configuration, decoder and
//! agent evaluator. Workers report progress over a channel; the coordinator
//! collects results, enforces the per-evaluation timeout and aborts the
//! generation on the first failure.

use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::marker::PhantomData;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::genome::{Genome, GenomeKey, GenomeStructureError};
use super::novelty::DimensionMismatch;
use crate::schema::{EvaluationConfig, EvaluationResult, GenomeConfig};

/// Error type returned by agent evaluators.
pub type AgentError = Box<dyn std::error::Error + Send + Sync>;

/// Runs one decoded controller in an environment.
pub trait AgentEvaluator<C>: Send + Sync {
    fn evaluate_agent(
        &self,
        key: GenomeKey,
        controller: &mut C,
        generation: usize,
    ) -> Result<EvaluationResult, AgentError>;
}

impl<C, F> AgentEvaluator<C> for F
where
    F: Fn(GenomeKey, &mut C, usize) -> Result<EvaluationResult, AgentError> + Send + Sync,
{
    fn evaluate_agent(
        &self,
        key: GenomeKey,
        controller: &mut C,
        generation: usize,
    ) -> Result<EvaluationResult, AgentError> {
        self(key, controller, generation)
    }
}

/// Evaluates a whole generation.
pub trait PopulationEvaluator {
    fn evaluate(
        &self,
        genomes: &BTreeMap<GenomeKey, Genome>,
        config: &GenomeConfig,
        generation: usize,
    ) -> Result<BTreeMap<GenomeKey, EvaluationResult>, EvaluationError>;
}

/// Evaluation failures. Each one aborts the generation.
#[derive(Debug, thiserror::Error)]
pub enum EvaluationError {
    #[error("Generation {generation}: genome {key} could not be decoded: {source}")]
    Decode {
        key: GenomeKey,
        generation: usize,
        #[source]
        source: GenomeStructureError,
    },
    #[error("Generation {generation}: evaluation of genome {key} failed: {source}")]
    Agent {
        key: GenomeKey,
        generation: usize,
        #[source]
        source: AgentError,
    },
    #[error("Generation {generation}: evaluation of genome {key} panicked: {message}")]
    Panicked {
        key: GenomeKey,
        generation: usize,
        message: String,
    },
    #[error("Generation {generation}: evaluation of genome {key} exceeded {limit_secs}s")]
    Timeout {
        key: GenomeKey,
        generation: usize,
        limit_secs: f64,
    },
    #[error("Generation {generation}: no result for genome {key}")]
    MissingResult { key: GenomeKey, generation: usize },
    #[error("Generation {generation}: genome {key}: {source}")]
    DescriptorShape {
        key: GenomeKey,
        generation: usize,
        #[source]
        source: DimensionMismatch,
    },
    #[error("Failed to build evaluation worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),
    #[error("Generation {generation}: evaluation workers disconnected")]
    Disconnected { generation: usize },
}

enum WorkerMessage {
    Started {
        key: GenomeKey,
        at: Instant,
    },
    Finished {
        key: GenomeKey,
        outcome: Result<EvaluationResult, EvaluationError>,
    },
}

/// Everything a worker needs to evaluate one genome.
struct EvaluationTask<E, D, C> {
    key: GenomeKey,
    genome: Genome,
    config: Arc<GenomeConfig>,
    evaluator: Arc<E>,
    decoder: Arc<D>,
    generation: usize,
    cancelled: Arc<AtomicBool>,
    _controller: PhantomData<fn() -> C>,
}

impl<E, D, C> EvaluationTask<E, D, C>
where
    E: AgentEvaluator<C>,
    D: Fn(&Genome, &GenomeConfig) -> Result<C, GenomeStructureError>,
{
    fn run(self, tx: Sender<WorkerMessage>) {
        // Generation already aborted.
        if self.cancelled.load(Ordering::Relaxed) {
            return;
        }

        let key = self.key;
        let generation = self.generation;
        let _ = tx.send(WorkerMessage::Started {
            key,
            at: Instant::now(),
        });

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.execute())).unwrap_or_else(
            |payload| {
                Err(EvaluationError::Panicked {
                    key,
                    generation,
                    message: panic_message(payload),
                })
            },
        );

        // The coordinator may have returned already; nobody is listening then.
        let _ = tx.send(WorkerMessage::Finished { key, outcome });
    }

    fn execute(&self) -> Result<EvaluationResult, EvaluationError> {
        let mut controller =
            (self.decoder)(&self.genome, &self.config).map_err(|source| EvaluationError::Decode {
                key: self.key,
                generation: self.generation,
                source,
            })?;
        self.evaluator
            .evaluate_agent(self.key, &mut controller, self.generation)
            .map_err(|source| EvaluationError::Agent {
                key: self.key,
                generation: self.generation,
                source,
            })
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Evaluates genomes concurrently on a dedicated rayon pool.
///
/// `D` turns a genome into a controller of type `C` (usually
/// [`FeedForwardNetwork::create`](super::network::FeedForwardNetwork::create)),
/// and `E` runs that controller. A timed-out evaluation keeps its worker busy
/// until the agent returns; its result is discarded.
pub struct ParallelEvaluator<E, D, C> {
    pool: rayon::ThreadPool,
    evaluator: Arc<E>,
    decoder: Arc<D>,
    timeout: Option<Duration>,
    _controller: PhantomData<fn() -> C>,
}

impl<E, D, C> ParallelEvaluator<E, D, C>
where
    E: AgentEvaluator<C> + 'static,
    D: Fn(&Genome, &GenomeConfig) -> Result<C, GenomeStructureError> + Send + Sync + 'static,
    C: 'static,
{
    /// Build the worker pool. `num_workers == 0` uses one worker per CPU.
    pub fn new(evaluator: E, decoder: D, config: &EvaluationConfig) -> Result<Self, EvaluationError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.num_workers)
            .thread_name(|i| format!("ns-neat-eval-{i}"))
            .build()?;
        log::debug!(
            "Evaluation pool ready with {} workers",
            pool.current_num_threads()
        );

        Ok(Self {
            pool,
            evaluator: Arc::new(evaluator),
            decoder: Arc::new(decoder),
            timeout: config.timeout_secs.map(Duration::from_secs_f64),
            _controller: PhantomData,
        })
    }

    pub fn num_workers(&self) -> usize {
        self.pool.current_num_threads()
    }

    fn collect(
        &self,
        rx: mpsc::Receiver<WorkerMessage>,
        expected: usize,
        generation: usize,
    ) -> Result<BTreeMap<GenomeKey, EvaluationResult>, EvaluationError> {
        let mut running: HashMap<GenomeKey, Instant> = HashMap::new();
        let mut results = BTreeMap::new();

        while results.len() < expected {
            let message = match self.next_deadline(&running) {
                None => rx
                    .recv()
                    .map_err(|_| EvaluationError::Disconnected { generation })?,
                Some((key, deadline)) => {
                    let wait = deadline.saturating_duration_since(Instant::now());
                    match rx.recv_timeout(wait) {
                        Ok(message) => message,
                        Err(RecvTimeoutError::Timeout) => {
                            return Err(EvaluationError::Timeout {
                                key,
                                generation,
                                limit_secs: self.timeout.map_or(0.0, |t| t.as_secs_f64()),
                            });
                        }
                        Err(RecvTimeoutError::Disconnected) => {
                            return Err(EvaluationError::Disconnected { generation });
                        }
                    }
                }
            };

            match message {
                WorkerMessage::Started { key, at } => {
                    running.insert(key, at);
                }
                WorkerMessage::Finished { key, outcome } => {
                    running.remove(&key);
                    results.insert(key, outcome?);
                }
            }
        }

        Ok(results)
    }

    /// The running evaluation whose deadline comes first.
    fn next_deadline(&self, running: &HashMap<GenomeKey, Instant>) -> Option<(GenomeKey, Instant)> {
        let limit = self.timeout?;
        running
            .iter()
            .min_by_key(|&(&key, &start)| (start, key))
            .map(|(&key, &start)| (key, start + limit))
    }
}

impl<E, D, C> PopulationEvaluator for ParallelEvaluator<E, D, C>
where
    E: AgentEvaluator<C> + 'static,
    D: Fn(&Genome, &GenomeConfig) -> Result<C, GenomeStructureError> + Send + Sync + 'static,
    C: 'static,
{
    fn evaluate(
        &self,
        genomes: &BTreeMap<GenomeKey, Genome>,
        config: &GenomeConfig,
        generation: usize,
    ) -> Result<BTreeMap<GenomeKey, EvaluationResult>, EvaluationError> {
        let config = Arc::new(config.clone());
        let cancelled = Arc::new(AtomicBool::new(false));
        let (tx, rx) = mpsc::channel();

        for (&key, genome) in genomes {
            let task = EvaluationTask {
                key,
                genome: genome.clone(),
                config: Arc::clone(&config),
                evaluator: Arc::clone(&self.evaluator),
                decoder: Arc::clone(&self.decoder),
                generation,
                cancelled: Arc::clone(&cancelled),
                _controller: PhantomData,
            };
            let tx = tx.clone();
            self.pool.spawn(move || task.run(tx));
        }
        drop(tx);

        let outcome = self.collect(rx, genomes.len(), generation);
        if let Err(e) = &outcome {
            cancelled.store(true, Ordering::Relaxed);
            log::warn!("Aborting generation {generation}: {e}");
        }
        outcome
    }
}
