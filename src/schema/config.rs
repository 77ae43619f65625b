//! Configuration types for novelty-search NEAT runs.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::{Activation, Aggregation};

/// Top-level run configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NeatConfig {
    /// Population size and run limits.
    #[serde(default)]
    pub population: PopulationConfig,
    /// Novelty archive and scoring settings.
    #[serde(default)]
    pub novelty: NoveltyConfig,
    /// Genome encoding and mutation settings.
    #[serde(default)]
    pub genome: GenomeConfig,
    /// Speciation and stagnation settings.
    #[serde(default)]
    pub species: SpeciesConfig,
    /// Offspring allocation and parent selection settings.
    #[serde(default)]
    pub reproduction: ReproductionConfig,
    /// Worker pool settings.
    #[serde(default)]
    pub evaluation: EvaluationConfig,
}

impl NeatConfig {
    /// Load and validate a configuration from a JSON file.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    /// Parse and validate a configuration from JSON text.
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate every section.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.population.validate()?;
        self.novelty.validate()?;
        self.genome.validate()?;
        self.species.validate()?;
        self.reproduction.validate(self.population.pop_size)?;
        self.evaluation.validate()?;
        Ok(())
    }
}

// ============================================================================
// Population
// ============================================================================

/// Population size and run limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PopulationConfig {
    /// Number of genomes per generation.
    #[serde(default = "default_pop_size")]
    pub pop_size: usize,
    /// Generation limit used by the binary when none is given.
    #[serde(default = "default_max_generations")]
    pub max_generations: usize,
    /// Stop once a generation's best reward reaches this value.
    #[serde(default)]
    pub reward_threshold: Option<f32>,
    /// Reseed a random population when every species is excluded.
    #[serde(default = "default_true")]
    pub reset_on_extinction: bool,
    /// Random seed for reproducibility.
    #[serde(default)]
    pub random_seed: Option<u64>,
}

impl Default for PopulationConfig {
    fn default() -> Self {
        Self {
            pop_size: default_pop_size(),
            max_generations: default_max_generations(),
            reward_threshold: None,
            reset_on_extinction: true,
            random_seed: None,
        }
    }
}

impl PopulationConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.pop_size < 2 {
            return Err(ConfigError::PopulationTooSmall(self.pop_size));
        }
        if let Some(threshold) = self.reward_threshold
            && !threshold.is_finite()
        {
            return Err(ConfigError::InvalidValue {
                option: "population.reward_threshold",
                reason: format!("{threshold} is not finite"),
            });
        }
        Ok(())
    }
}

fn default_pop_size() -> usize {
    150
}
fn default_max_generations() -> usize {
    100
}
fn default_true() -> bool {
    true
}

// ============================================================================
// Novelty
// ============================================================================

/// Behavior distance function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BehaviorMetric {
    #[default]
    Manhattan,
    Euclidean,
    Chebyshev,
}

impl BehaviorMetric {
    /// Distance between two descriptors of equal length.
    #[inline]
    pub fn distance(self, a: &[f32], b: &[f32]) -> f32 {
        let pairs = a.iter().zip(b.iter());
        match self {
            BehaviorMetric::Manhattan => pairs.map(|(x, y)| (x - y).abs()).sum(),
            BehaviorMetric::Euclidean => pairs.map(|(x, y)| (x - y) * (x - y)).sum::<f32>().sqrt(),
            BehaviorMetric::Chebyshev => pairs.map(|(x, y)| (x - y).abs()).fold(0.0, f32::max),
        }
    }
}

/// Which quantity drives selection and speciation bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SelectionScore {
    /// Pure novelty search.
    #[default]
    Novelty,
    /// Task reward only (plain NEAT).
    Reward,
    /// `novelty_weight * novelty + (1 - novelty_weight) * reward`.
    Blend { novelty_weight: f32 },
}

/// Novelty archive configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoveltyConfig {
    /// Behavior distance function.
    #[serde(default)]
    pub metric: BehaviorMetric,
    /// Initial archive admission threshold.
    #[serde(default = "default_threshold_init")]
    pub threshold_init: f32,
    /// Lowest value the threshold may decay to.
    #[serde(default = "default_threshold_floor")]
    pub threshold_floor: f32,
    /// Number of nearest neighbors averaged into the novelty score.
    #[serde(default = "default_neighbors")]
    pub neighbors: usize,
    /// Minimal criterion on reward for archive admission. `None` disables it.
    #[serde(default)]
    pub mcns: Option<f32>,
    /// More admissions than this in one generation raises the threshold.
    #[serde(default = "default_add_upper")]
    pub add_upper: usize,
    /// Fewer admissions than this in one generation lowers the threshold.
    #[serde(default = "default_add_lower")]
    pub add_lower: usize,
    /// Multiplier applied when raising the threshold.
    #[serde(default = "default_threshold_increase")]
    pub threshold_increase: f32,
    /// Multiplier applied when lowering the threshold.
    #[serde(default = "default_threshold_decrease")]
    pub threshold_decrease: f32,
    /// Score used for selection.
    #[serde(default)]
    pub selection_score: SelectionScore,
}

impl Default for NoveltyConfig {
    fn default() -> Self {
        Self {
            metric: BehaviorMetric::default(),
            threshold_init: default_threshold_init(),
            threshold_floor: default_threshold_floor(),
            neighbors: default_neighbors(),
            mcns: None,
            add_upper: default_add_upper(),
            add_lower: default_add_lower(),
            threshold_increase: default_threshold_increase(),
            threshold_decrease: default_threshold_decrease(),
            selection_score: SelectionScore::default(),
        }
    }
}

impl NoveltyConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.neighbors == 0 {
            return Err(ConfigError::InvalidValue {
                option: "novelty.neighbors",
                reason: "must be at least 1".to_string(),
            });
        }
        if !(self.threshold_floor >= 0.0 && self.threshold_floor.is_finite()) {
            return Err(ConfigError::InvalidValue {
                option: "novelty.threshold_floor",
                reason: format!("{} must be a non-negative number", self.threshold_floor),
            });
        }
        if !(self.threshold_init >= self.threshold_floor && self.threshold_init.is_finite()) {
            return Err(ConfigError::InvalidValue {
                option: "novelty.threshold_init",
                reason: format!(
                    "{} must be finite and at least threshold_floor ({})",
                    self.threshold_init, self.threshold_floor
                ),
            });
        }
        if self.add_lower > self.add_upper {
            return Err(ConfigError::InvalidValue {
                option: "novelty.add_lower",
                reason: format!("{} exceeds add_upper ({})", self.add_lower, self.add_upper),
            });
        }
        if self.threshold_increase < 1.0 {
            return Err(ConfigError::InvalidValue {
                option: "novelty.threshold_increase",
                reason: format!("{} must be >= 1", self.threshold_increase),
            });
        }
        if !(self.threshold_decrease > 0.0 && self.threshold_decrease <= 1.0) {
            return Err(ConfigError::InvalidValue {
                option: "novelty.threshold_decrease",
                reason: format!("{} must be in (0, 1]", self.threshold_decrease),
            });
        }
        if let Some(mcns) = self.mcns
            && !mcns.is_finite()
        {
            return Err(ConfigError::InvalidValue {
                option: "novelty.mcns",
                reason: format!("{mcns} is not finite"),
            });
        }
        if let SelectionScore::Blend { novelty_weight } = self.selection_score
            && !(0.0..=1.0).contains(&novelty_weight)
        {
            return Err(ConfigError::InvalidValue {
                option: "novelty.selection_score",
                reason: format!("novelty_weight {novelty_weight} must be in [0, 1]"),
            });
        }
        Ok(())
    }
}

fn default_threshold_init() -> f32 {
    1.0
}
fn default_threshold_floor() -> f32 {
    0.25
}
fn default_neighbors() -> usize {
    15
}
fn default_add_upper() -> usize {
    4
}
fn default_add_lower() -> usize {
    1
}
fn default_threshold_increase() -> f32 {
    1.2
}
fn default_threshold_decrease() -> f32 {
    0.95
}

// ============================================================================
// Genome
// ============================================================================

/// How a float gene draws its initial value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitType {
    #[default]
    Gaussian,
    Uniform,
}

/// Initialization and mutation settings for one float-valued gene attribute.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FloatGeneConfig {
    pub init_mean: f32,
    pub init_stdev: f32,
    #[serde(default)]
    pub init_type: InitType,
    pub min_value: f32,
    pub max_value: f32,
    /// Probability of a Gaussian perturbation.
    pub mutate_rate: f32,
    /// Standard deviation of the perturbation.
    pub mutate_power: f32,
    /// Probability of redrawing from the init distribution.
    pub replace_rate: f32,
}

impl FloatGeneConfig {
    /// Standard NEAT connection-weight settings.
    pub fn weight() -> Self {
        Self {
            init_mean: 0.0,
            init_stdev: 1.0,
            init_type: InitType::Gaussian,
            min_value: -30.0,
            max_value: 30.0,
            mutate_rate: 0.8,
            mutate_power: 0.5,
            replace_rate: 0.1,
        }
    }

    /// Standard NEAT node-bias settings.
    pub fn bias() -> Self {
        Self {
            init_mean: 0.0,
            init_stdev: 1.0,
            init_type: InitType::Gaussian,
            min_value: -30.0,
            max_value: 30.0,
            mutate_rate: 0.7,
            mutate_power: 0.5,
            replace_rate: 0.1,
        }
    }

    /// Fixed response of 1.0.
    pub fn response() -> Self {
        Self {
            init_mean: 1.0,
            init_stdev: 0.0,
            init_type: InitType::Gaussian,
            min_value: -30.0,
            max_value: 30.0,
            mutate_rate: 0.0,
            mutate_power: 0.0,
            replace_rate: 0.0,
        }
    }

    fn validate(&self, name: &'static str) -> Result<(), ConfigError> {
        if self.min_value > self.max_value {
            return Err(ConfigError::InvalidBounds(format!(
                "{} min ({}) > max ({})",
                name, self.min_value, self.max_value
            )));
        }
        if self.init_stdev < 0.0 || self.mutate_power < 0.0 {
            return Err(ConfigError::InvalidValue {
                option: name,
                reason: "standard deviations must be non-negative".to_string(),
            });
        }
        check_probability(name, self.mutate_rate)?;
        check_probability(name, self.replace_rate)?;
        if self.mutate_rate + self.replace_rate > 1.0 {
            return Err(ConfigError::InvalidValue {
                option: name,
                reason: "mutate_rate + replace_rate exceeds 1".to_string(),
            });
        }
        Ok(())
    }
}

/// Settings for a gene attribute chosen from a finite set of options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChoiceGeneConfig<T> {
    pub default: T,
    pub options: Vec<T>,
    pub mutate_rate: f32,
}

/// Initial connectivity of freshly seeded genomes.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum InitialConnection {
    /// No connections at all.
    Unconnected,
    /// One random input connected to every output.
    FsNeatNoHidden,
    /// One random input connected to every hidden and output node.
    FsNeatHidden,
    /// Inputs to hidden, hidden to outputs (inputs to outputs if no hidden).
    #[default]
    FullNoDirect,
    /// Like `FullNoDirect` plus direct input to output connections.
    FullDirect,
    /// Each `FullNoDirect` connection kept with probability `fraction`.
    PartialNoDirect { fraction: f32 },
    /// Each `FullDirect` connection kept with probability `fraction`.
    PartialDirect { fraction: f32 },
}

/// Genome encoding and mutation parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenomeConfig {
    pub num_inputs: usize,
    pub num_outputs: usize,
    #[serde(default)]
    pub num_hidden: usize,
    #[serde(default)]
    pub initial_connection: InitialConnection,
    #[serde(default = "default_disjoint_coefficient")]
    pub compatibility_disjoint_coefficient: f32,
    #[serde(default = "default_weight_coefficient")]
    pub compatibility_weight_coefficient: f32,
    #[serde(default = "default_conn_add_prob")]
    pub conn_add_prob: f32,
    #[serde(default = "default_conn_delete_prob")]
    pub conn_delete_prob: f32,
    #[serde(default = "default_node_add_prob")]
    pub node_add_prob: f32,
    #[serde(default = "default_node_delete_prob")]
    pub node_delete_prob: f32,
    /// Apply at most one structural mutation per call.
    #[serde(default)]
    pub single_structural_mutation: bool,
    /// Structural mutations fall back to an alternative instead of doing nothing.
    #[serde(default)]
    pub structural_mutation_surer: bool,
    #[serde(default = "default_true")]
    pub enabled_default: bool,
    #[serde(default = "default_enabled_mutate_rate")]
    pub enabled_mutate_rate: f32,
    #[serde(default = "FloatGeneConfig::weight")]
    pub weight: FloatGeneConfig,
    #[serde(default = "FloatGeneConfig::bias")]
    pub bias: FloatGeneConfig,
    #[serde(default = "FloatGeneConfig::response")]
    pub response: FloatGeneConfig,
    #[serde(default = "default_activation")]
    pub activation: ChoiceGeneConfig<Activation>,
    #[serde(default = "default_aggregation")]
    pub aggregation: ChoiceGeneConfig<Aggregation>,
}

impl Default for GenomeConfig {
    fn default() -> Self {
        Self {
            num_inputs: 2,
            num_outputs: 2,
            num_hidden: 0,
            initial_connection: InitialConnection::default(),
            compatibility_disjoint_coefficient: default_disjoint_coefficient(),
            compatibility_weight_coefficient: default_weight_coefficient(),
            conn_add_prob: default_conn_add_prob(),
            conn_delete_prob: default_conn_delete_prob(),
            node_add_prob: default_node_add_prob(),
            node_delete_prob: default_node_delete_prob(),
            single_structural_mutation: false,
            structural_mutation_surer: false,
            enabled_default: true,
            enabled_mutate_rate: default_enabled_mutate_rate(),
            weight: FloatGeneConfig::weight(),
            bias: FloatGeneConfig::bias(),
            response: FloatGeneConfig::response(),
            activation: default_activation(),
            aggregation: default_aggregation(),
        }
    }
}

impl GenomeConfig {
    /// Keys of the input pins: `-1, -2, ..., -num_inputs`.
    pub fn input_keys(&self) -> Vec<i64> {
        (1..=self.num_inputs as i64).map(|i| -i).collect()
    }

    /// Keys of the output nodes: `0, 1, ..., num_outputs - 1`.
    pub fn output_keys(&self) -> Vec<i64> {
        (0..self.num_outputs as i64).collect()
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.num_inputs == 0 {
            return Err(ConfigError::InvalidValue {
                option: "genome.num_inputs",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.num_outputs == 0 {
            return Err(ConfigError::InvalidValue {
                option: "genome.num_outputs",
                reason: "must be at least 1".to_string(),
            });
        }
        for (name, p) in [
            ("genome.conn_add_prob", self.conn_add_prob),
            ("genome.conn_delete_prob", self.conn_delete_prob),
            ("genome.node_add_prob", self.node_add_prob),
            ("genome.node_delete_prob", self.node_delete_prob),
            ("genome.enabled_mutate_rate", self.enabled_mutate_rate),
            ("genome.activation.mutate_rate", self.activation.mutate_rate),
            ("genome.aggregation.mutate_rate", self.aggregation.mutate_rate),
        ] {
            check_probability(name, p)?;
        }
        if self.compatibility_disjoint_coefficient < 0.0
            || self.compatibility_weight_coefficient < 0.0
        {
            return Err(ConfigError::InvalidValue {
                option: "genome.compatibility_*_coefficient",
                reason: "coefficients must be non-negative".to_string(),
            });
        }
        match self.initial_connection {
            InitialConnection::PartialNoDirect { fraction }
            | InitialConnection::PartialDirect { fraction } => {
                check_probability("genome.initial_connection.fraction", fraction)?;
            }
            _ => {}
        }
        self.weight.validate("genome.weight")?;
        self.bias.validate("genome.bias")?;
        self.response.validate("genome.response")?;
        if self.activation.options.is_empty() {
            return Err(ConfigError::InvalidValue {
                option: "genome.activation.options",
                reason: "at least one activation function is required".to_string(),
            });
        }
        if self.aggregation.options.is_empty() {
            return Err(ConfigError::InvalidValue {
                option: "genome.aggregation.options",
                reason: "at least one aggregation function is required".to_string(),
            });
        }
        Ok(())
    }
}

fn default_disjoint_coefficient() -> f32 {
    1.0
}
fn default_weight_coefficient() -> f32 {
    0.5
}
fn default_conn_add_prob() -> f32 {
    0.5
}
fn default_conn_delete_prob() -> f32 {
    0.5
}
fn default_node_add_prob() -> f32 {
    0.2
}
fn default_node_delete_prob() -> f32 {
    0.2
}
fn default_enabled_mutate_rate() -> f32 {
    0.01
}
fn default_activation() -> ChoiceGeneConfig<Activation> {
    ChoiceGeneConfig {
        default: Activation::Sigmoid,
        options: vec![Activation::Sigmoid],
        mutate_rate: 0.0,
    }
}
fn default_aggregation() -> ChoiceGeneConfig<Aggregation> {
    ChoiceGeneConfig {
        default: Aggregation::Sum,
        options: vec![Aggregation::Sum],
        mutate_rate: 0.0,
    }
}

// ============================================================================
// Species
// ============================================================================

/// Summary statistic turning member scores into a species score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeciesFitnessFunc {
    #[default]
    Max,
    Min,
    Mean,
    Median,
}

impl SpeciesFitnessFunc {
    /// Apply to a non-empty slice of scores.
    pub fn apply(self, scores: &[f32]) -> f32 {
        match self {
            SpeciesFitnessFunc::Max => scores.iter().copied().fold(f32::NEG_INFINITY, f32::max),
            SpeciesFitnessFunc::Min => scores.iter().copied().fold(f32::INFINITY, f32::min),
            SpeciesFitnessFunc::Mean => scores.iter().sum::<f32>() / scores.len().max(1) as f32,
            SpeciesFitnessFunc::Median => Aggregation::Median.apply(scores),
        }
    }
}

/// What happens to species that stopped improving.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StagnationPolicy {
    /// Stagnant species receive no offspring.
    #[default]
    Exclude,
    /// Stagnant species keep reproducing with their adjusted score scaled by `penalty`.
    Deprioritize { penalty: f32 },
}

/// Speciation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeciesConfig {
    /// Maximum genetic distance to a species representative.
    #[serde(default = "default_compatibility_threshold")]
    pub compatibility_threshold: f32,
    #[serde(default)]
    pub species_fitness_func: SpeciesFitnessFunc,
    /// Generations without improvement before a species is stagnant.
    #[serde(default = "default_max_stagnation")]
    pub max_stagnation: usize,
    /// Number of best species protected from stagnation.
    #[serde(default = "default_species_elitism")]
    pub species_elitism: usize,
    #[serde(default)]
    pub stagnation_policy: StagnationPolicy,
}

impl Default for SpeciesConfig {
    fn default() -> Self {
        Self {
            compatibility_threshold: default_compatibility_threshold(),
            species_fitness_func: SpeciesFitnessFunc::default(),
            max_stagnation: default_max_stagnation(),
            species_elitism: default_species_elitism(),
            stagnation_policy: StagnationPolicy::default(),
        }
    }
}

impl SpeciesConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if !(self.compatibility_threshold > 0.0) {
            return Err(ConfigError::InvalidValue {
                option: "species.compatibility_threshold",
                reason: format!("{} must be positive", self.compatibility_threshold),
            });
        }
        if self.max_stagnation == 0 {
            return Err(ConfigError::InvalidValue {
                option: "species.max_stagnation",
                reason: "must be at least 1".to_string(),
            });
        }
        if let StagnationPolicy::Deprioritize { penalty } = self.stagnation_policy {
            check_probability("species.stagnation_policy.penalty", penalty)?;
        }
        Ok(())
    }
}

fn default_compatibility_threshold() -> f32 {
    3.0
}
fn default_max_stagnation() -> usize {
    20
}
fn default_species_elitism() -> usize {
    2
}

// ============================================================================
// Reproduction
// ============================================================================

/// Parent selection method within a species.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method")]
pub enum SelectionMethod {
    /// Tournament selection with configurable size.
    Tournament {
        #[serde(default = "default_tournament_size")]
        size: usize,
    },
    /// Rank-based selection.
    RankBased,
    /// Roulette wheel (fitness-proportionate) selection.
    RouletteWheel,
}

impl Default for SelectionMethod {
    fn default() -> Self {
        Self::Tournament {
            size: default_tournament_size(),
        }
    }
}

fn default_tournament_size() -> usize {
    3
}

/// Offspring allocation and parent selection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReproductionConfig {
    /// Best members of each species copied unchanged (at least one is always kept).
    #[serde(default = "default_elitism")]
    pub elitism: usize,
    /// Fraction of each species eligible to be a parent.
    #[serde(default = "default_survival_threshold")]
    pub survival_threshold: f32,
    /// Smallest offspring quota a reproducing species receives.
    #[serde(default = "default_min_species_size")]
    pub min_species_size: usize,
    /// Share of non-elite offspring produced by crossover; the rest are pure mutants.
    #[serde(default = "default_crossover_rate")]
    pub crossover_rate: f32,
    /// Probability that a matching gene is inherited from the fitter parent.
    #[serde(default = "default_fitter_parent_bias")]
    pub fitter_parent_bias: f32,
    #[serde(default)]
    pub selection: SelectionMethod,
}

impl Default for ReproductionConfig {
    fn default() -> Self {
        Self {
            elitism: default_elitism(),
            survival_threshold: default_survival_threshold(),
            min_species_size: default_min_species_size(),
            crossover_rate: default_crossover_rate(),
            fitter_parent_bias: default_fitter_parent_bias(),
            selection: SelectionMethod::default(),
        }
    }
}

impl ReproductionConfig {
    /// Elite count actually used: never below one.
    pub fn effective_elitism(&self) -> usize {
        self.elitism.max(1)
    }

    /// Smallest quota of a reproducing species.
    pub fn min_quota(&self) -> usize {
        self.min_species_size.max(self.effective_elitism())
    }

    fn validate(&self, pop_size: usize) -> Result<(), ConfigError> {
        if !(self.survival_threshold > 0.0 && self.survival_threshold <= 1.0) {
            return Err(ConfigError::InvalidValue {
                option: "reproduction.survival_threshold",
                reason: format!("{} must be in (0, 1]", self.survival_threshold),
            });
        }
        if self.min_quota() > pop_size {
            return Err(ConfigError::InvalidValue {
                option: "reproduction.min_species_size",
                reason: format!(
                    "minimum species quota {} exceeds pop_size {}",
                    self.min_quota(),
                    pop_size
                ),
            });
        }
        check_probability("reproduction.crossover_rate", self.crossover_rate)?;
        check_probability("reproduction.fitter_parent_bias", self.fitter_parent_bias)?;
        if let SelectionMethod::Tournament { size } = self.selection
            && size == 0
        {
            return Err(ConfigError::InvalidValue {
                option: "reproduction.selection.size",
                reason: "tournament size must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

fn default_elitism() -> usize {
    1
}
fn default_survival_threshold() -> f32 {
    0.2
}
fn default_min_species_size() -> usize {
    2
}
fn default_crossover_rate() -> f32 {
    0.75
}
fn default_fitter_parent_bias() -> f32 {
    0.5
}

// ============================================================================
// Evaluation
// ============================================================================

/// Worker pool settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EvaluationConfig {
    /// Number of parallel workers (0 = one per CPU).
    #[serde(default)]
    pub num_workers: usize,
    /// Per-evaluation wall-clock limit in seconds.
    #[serde(default)]
    pub timeout_secs: Option<f64>,
}

impl EvaluationConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if let Some(timeout) = self.timeout_secs
            && !(timeout > 0.0 && timeout.is_finite())
        {
            return Err(ConfigError::InvalidValue {
                option: "evaluation.timeout_secs",
                reason: format!("{timeout} must be a positive number of seconds"),
            });
        }
        Ok(())
    }
}

fn check_probability(option: &'static str, p: f32) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&p) {
        Ok(())
    } else {
        Err(ConfigError::InvalidValue {
            option,
            reason: format!("probability {p} outside [0, 1]"),
        })
    }
}

/// Configuration validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Population size must be at least 2 (got {0})")]
    PopulationTooSmall(usize),
    #[error("Invalid value for {option}: {reason}")]
    InvalidValue { option: &'static str, reason: String },
    #[error("Invalid parameter bounds: {0}")]
    InvalidBounds(String),
    #[error("Generation count must be positive")]
    NoGenerations,
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}
