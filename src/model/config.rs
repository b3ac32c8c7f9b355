//! High-level configuration with builder pattern.
//!
//! [`NodeGamConfig`] collects everything needed to train a model and uses the
//! `bon` crate for builder generation with validation at build time.
//!
//! # Example
//!
//! ```
//! use nodegam::model::NodeGamConfig;
//! use nodegam::repr::ModelMode;
//! use nodegam::soft::AnnealingSchedule;
//! use nodegam::training::{Metric, Objective};
//!
//! // All defaults: GAM regression
//! let config = NodeGamConfig::builder().build().unwrap();
//! assert_eq!(config.depth, 3);
//!
//! // GA2M classifier with one interaction and early stopping
//! let config = NodeGamConfig::builder()
//!     .objective(Objective::logistic())
//!     .metric(Metric::Auc)
//!     .mode(ModelMode::Ga2m { pairs: vec![[0, 1]] })
//!     .depth(4)
//!     .annealing(AnnealingSchedule::exponential(2.0, 0.01, 5_000))
//!     .early_stopping_rounds(10)
//!     .build()
//!     .unwrap();
//! ```

use std::collections::HashSet;

use bon::Builder;

use crate::data::{BinningParams, DataError};
use crate::repr::{ModelMode, MAX_DEPTH};
use crate::soft::{AnnealingSchedule, ScheduleError, SelectionFn};
use crate::training::{Metric, NodeGamParams, Objective, Verbosity};

// =============================================================================
// ConfigError
// =============================================================================

/// Errors that can occur during configuration validation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("depth must be in 1..={max}, got {depth}")]
    InvalidDepth { depth: usize, max: usize },
    #[error("n_trees must be at least 1")]
    InvalidNTrees,
    #[error("learning_rate must be positive and finite, got {0}")]
    InvalidLearningRate(f32),
    #[error("{field} must be finite and >= 0, got {value}")]
    InvalidTemperature { field: &'static str, value: f32 },
    #[error("invalid annealing schedule: {0}")]
    InvalidAnnealing(ScheduleError),
    #[error("batch_size must be at least 1")]
    InvalidBatchSize,
    #[error("max_epochs must be at least 1")]
    InvalidMaxEpochs,
    #[error("pair [{0}, {1}] must name two distinct features")]
    InvalidPair(usize, usize),
    #[error("pair [{0}, {1}] is listed more than once")]
    DuplicatePair(usize, usize),
    #[error("{field} must be finite and >= 0, got {value}")]
    InvalidPenalty { field: &'static str, value: f32 },
    #[error("lr_decay must be in (0, 1], got {0}")]
    InvalidDecay(f32),
    #[error("group_dropout must be in [0, 1), got {0}")]
    InvalidDropout(f32),
    #[error("invalid objective: {0}")]
    InvalidObjective(&'static str),
    #[error("invalid binning parameter {field} = {value}")]
    InvalidBinning { field: &'static str, value: usize },
}

impl From<ScheduleError> for ConfigError {
    fn from(e: ScheduleError) -> Self {
        match e {
            ScheduleError::InvalidTemperature { field, value } => Self::InvalidTemperature { field, value },
            other => Self::InvalidAnnealing(other),
        }
    }
}

// =============================================================================
// NodeGamConfig
// =============================================================================

/// High-level configuration for model training.
///
/// # Structure
///
/// - **Objective & Metric**: what to optimize and how to measure progress
/// - **Structure**: GAM or GA2M mode, tree depth and count, routing transform
/// - **Optimization**: annealing, learning rate, batches, epochs, penalties
/// - **Early Stopping**: patience on the monitored metric
/// - **Resources**: threading
#[derive(Debug, Clone, Builder)]
#[builder(
    derive(Clone, Debug),
    finish_fn(vis = "", name = __build_internal)
)]
pub struct NodeGamConfig {
    // === Objective & Metric ===
    /// Loss function for training. Default: `SquaredLoss` (regression).
    #[builder(default)]
    pub objective: Objective,

    /// Evaluation metric. If `None`, the objective's default metric is used.
    pub metric: Option<Metric>,

    // === Structure ===
    /// GAM (singletons) or GA2M (singletons plus explicit pairs). Default: GAM.
    #[builder(default)]
    pub mode: ModelMode,

    /// Levels per tree. Default: 3.
    #[builder(default = 3)]
    pub depth: usize,

    /// Total number of trees, distributed round-robin over groups.
    /// `None` trains one tree per group.
    pub n_trees: Option<usize>,

    /// Feature-selection transform. Default: softmax.
    #[builder(default)]
    pub selection: SelectionFn,

    // === Optimization ===
    /// Temperature schedule over optimizer steps. Default: linear 1.0 to 0.0
    /// over 1000 steps.
    #[builder(default)]
    pub annealing: AnnealingSchedule,

    /// Adam learning rate. Default: 0.01.
    #[builder(default = 0.01)]
    pub learning_rate: f32,

    /// Per-epoch multiplicative learning-rate decay. Default: 1.0 (none).
    #[builder(default = 1.0)]
    pub lr_decay: f32,

    /// Decoupled weight decay. Default: 0.0.
    #[builder(default = 0.0)]
    pub weight_decay: f32,

    /// Rows per optimizer step. Default: 256.
    #[builder(default = 256)]
    pub batch_size: usize,

    /// Maximum passes over the training data. Default: 100.
    #[builder(default = 100)]
    pub max_epochs: usize,

    /// Weight of the `mean(contribution²)` penalty. Default: 0.0.
    #[builder(default = 0.0)]
    pub output_penalty: f32,

    /// Leaves start uniform in `±init_scale`. Default: 0.01.
    #[builder(default = 0.01)]
    pub init_scale: f32,

    /// Probability of dropping each group's contribution per training row.
    /// Kept groups are rescaled by `1 / (1 - p)`. Default: 0.0.
    #[builder(default = 0.0)]
    pub group_dropout: f32,

    // === Shape extraction ===
    /// Grid derivation for the feature schema recorded at training time.
    #[builder(default)]
    pub binning: BinningParams,

    // === Early stopping ===
    /// Stop training if no improvement for this many epochs.
    /// `None` disables early stopping.
    pub early_stopping_rounds: Option<usize>,

    // === Resource control ===
    /// Number of threads. 0 = auto, 1 = sequential.
    #[builder(default = 0)]
    pub n_threads: usize,

    // === Reproducibility ===
    /// Random seed. Default: 42.
    #[builder(default = 42)]
    pub seed: u64,

    // === Logging ===
    /// Verbosity level. Default: `Silent`.
    #[builder(default)]
    pub verbosity: Verbosity,
}

/// Custom finishing function that validates the config.
impl<S: node_gam_config_builder::IsComplete> NodeGamConfigBuilder<S> {
    /// Build and validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for the first invalid parameter found.
    pub fn build(self) -> Result<NodeGamConfig, ConfigError> {
        let config = self.__build_internal();
        config.validate()?;
        Ok(config)
    }
}

impl NodeGamConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.depth == 0 || self.depth > MAX_DEPTH {
            return Err(ConfigError::InvalidDepth { depth: self.depth, max: MAX_DEPTH });
        }
        if self.n_trees == Some(0) {
            return Err(ConfigError::InvalidNTrees);
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(ConfigError::InvalidLearningRate(self.learning_rate));
        }
        if !(self.lr_decay.is_finite() && self.lr_decay > 0.0 && self.lr_decay <= 1.0) {
            return Err(ConfigError::InvalidDecay(self.lr_decay));
        }
        self.annealing.validate()?;
        if self.batch_size == 0 {
            return Err(ConfigError::InvalidBatchSize);
        }
        if self.max_epochs == 0 {
            return Err(ConfigError::InvalidMaxEpochs);
        }
        for (field, value) in [
            ("output_penalty", self.output_penalty),
            ("weight_decay", self.weight_decay),
            ("init_scale", self.init_scale),
        ] {
            if !(value.is_finite() && value >= 0.0) {
                return Err(ConfigError::InvalidPenalty { field, value });
            }
        }
        if !(0.0..1.0).contains(&self.group_dropout) {
            return Err(ConfigError::InvalidDropout(self.group_dropout));
        }
        self.validate_objective()?;
        self.validate_pairs()?;
        self.binning.validate().map_err(|e| match e {
            DataError::InvalidBinning { field, value } => ConfigError::InvalidBinning { field, value },
            _ => ConfigError::InvalidBinning { field: "binning", value: 0 },
        })?;
        Ok(())
    }

    fn validate_objective(&self) -> Result<(), ConfigError> {
        match self.objective {
            Objective::SquaredLoss { n_outputs: 0 } => {
                Err(ConfigError::InvalidObjective("squared loss needs at least one output"))
            }
            Objective::SoftmaxLoss { n_classes } if n_classes < 2 => {
                Err(ConfigError::InvalidObjective("softmax loss needs at least two classes"))
            }
            _ => Ok(()),
        }
    }

    /// Pairs are unordered: `[0, 1]` and `[1, 0]` are the same pair.
    fn validate_pairs(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for &[a, b] in self.mode.pairs() {
            if a == b {
                return Err(ConfigError::InvalidPair(a, b));
            }
            if !seen.insert((a.min(b), a.max(b))) {
                return Err(ConfigError::DuplicatePair(a, b));
            }
        }
        Ok(())
    }

    /// Metric used for evaluation: the configured one, or the objective's default.
    pub fn effective_metric(&self) -> Metric {
        use crate::training::ObjectiveFn;
        self.metric.unwrap_or_else(|| self.objective.default_metric())
    }

    /// Convert to trainer parameters.
    pub fn to_trainer_params(&self) -> NodeGamParams {
        NodeGamParams {
            mode: self.mode.clone(),
            depth: self.depth,
            n_trees: self.n_trees,
            selection: self.selection,
            annealing: self.annealing,
            learning_rate: self.learning_rate,
            lr_decay: self.lr_decay,
            weight_decay: self.weight_decay,
            batch_size: self.batch_size,
            max_epochs: self.max_epochs,
            output_penalty: self.output_penalty,
            init_scale: self.init_scale,
            group_dropout: self.group_dropout,
            early_stopping_rounds: self.early_stopping_rounds.unwrap_or(0),
            verbosity: self.verbosity,
            seed: self.seed,
        }
    }
}

impl Default for NodeGamConfig {
    fn default() -> Self {
        Self::builder().__build_internal()
    }
}

// =============================================================================
// Tests
// =============================================================================
