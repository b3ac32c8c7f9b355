//! Mini-batch trainer for constrained soft-tree ensembles.
//!
//! Orchestrates initialization, annealed forward/backward passes, Adam
//! updates, per-epoch evaluation and early stopping. Use
//! [`NodeGamTrainer::train`] to fit an [`Ensemble`] to a feature matrix.

use ndarray::ArrayView2;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;

use super::backward::{NonFinite, RowGradient};
use super::callback::{EarlyStopAction, EarlyStopping};
use super::dropout::GroupMask;
use super::eval::{self, EvalSet, MetricValue};
use super::init::{init_ensemble, InitParams};
use super::logger::{TrainingLogger, Verbosity};
use super::metrics::{Metric, MetricFn};
use super::objectives::{Objective, ObjectiveFn};
use super::optimizer::Adam;
use super::report::{EpochRecord, TrainingReport};
use super::session::TrainingSession;
use crate::data::{validate_features, validate_targets, DataError};
use crate::inference::Predictor;
use crate::repr::{Ensemble, EnsembleError, GroupError, GroupId, ModelMode, MAX_DEPTH};
use crate::soft::{AnnealingSchedule, ScheduleError, SelectionFn};
use crate::utils::Parallelism;

// =============================================================================
// TrainError
// =============================================================================

/// Errors raised while training.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TrainError {
    #[error(transparent)]
    Data(#[from] DataError),
    #[error(transparent)]
    Group(#[from] GroupError),
    #[error(transparent)]
    Structure(#[from] EnsembleError),
    #[error(transparent)]
    Schedule(#[from] ScheduleError),
    #[error("depth must be in 1..={max}, got {depth}")]
    InvalidDepth { depth: usize, max: usize },
    #[error("invalid {field}: {value}")]
    InvalidParameter { field: &'static str, value: f32 },
    #[error("{n_trees} trees cannot cover {n_groups} feature groups")]
    TooFewTrees { n_trees: usize, n_groups: usize },
    #[error("eval set '{name}': {source}")]
    EvalSet { name: String, source: DataError },
    #[error(
        "non-finite {stage} at epoch {epoch}, step {step}{}; update rejected",
        location(.tree, .group)
    )]
    NumericalInstability {
        epoch: usize,
        step: u64,
        stage: &'static str,
        tree: Option<usize>,
        group: Option<GroupId>,
    },
}

fn location(tree: &Option<usize>, group: &Option<GroupId>) -> String {
    match (tree, group) {
        (Some(t), Some(g)) => format!(" (tree {t}, group {g})"),
        (Some(t), None) => format!(" (tree {t})"),
        (None, Some(g)) => format!(" (group {g})"),
        (None, None) => String::new(),
    }
}

impl TrainError {
    fn numerical(epoch: usize, step: u64, at: NonFinite) -> Self {
        Self::NumericalInstability { epoch, step, stage: at.stage, tree: at.tree, group: at.group }
    }
}

// =============================================================================
// NodeGamParams
// =============================================================================

/// Parameters for soft-tree training.
#[derive(Clone, Debug)]
pub struct NodeGamParams {
    // --- Structure ---
    pub mode: ModelMode,
    pub depth: usize,
    /// Total trees, distributed round-robin over groups. `None` = one per group.
    pub n_trees: Option<usize>,
    pub selection: SelectionFn,

    // --- Optimization ---
    pub annealing: AnnealingSchedule,
    pub learning_rate: f32,
    /// Per-epoch multiplicative learning-rate decay.
    pub lr_decay: f32,
    /// Decoupled weight decay applied by Adam.
    pub weight_decay: f32,
    pub batch_size: usize,
    pub max_epochs: usize,
    /// `λ` in `λ · mean(contribution²)`.
    pub output_penalty: f32,
    /// Leaves start uniform in `±init_scale`.
    pub init_scale: f32,
    /// Probability of dropping a group's contribution per training row.
    pub group_dropout: f32,

    // --- Early stopping ---
    /// Epochs without improvement before stopping. 0 disables.
    pub early_stopping_rounds: usize,

    // --- Logging ---
    pub verbosity: Verbosity,

    // --- Reproducibility ---
    pub seed: u64,
}

impl Default for NodeGamParams {
    fn default() -> Self {
        Self {
            mode: ModelMode::Gam,
            depth: 3,
            n_trees: None,
            selection: SelectionFn::Softmax,
            annealing: AnnealingSchedule::default(),
            learning_rate: 0.01,
            lr_decay: 1.0,
            weight_decay: 0.0,
            batch_size: 256,
            max_epochs: 100,
            output_penalty: 0.0,
            init_scale: 0.01,
            group_dropout: 0.0,
            early_stopping_rounds: 0,
            verbosity: Verbosity::default(),
            seed: 42,
        }
    }
}

impl NodeGamParams {
    /// Check every scalar parameter and the annealing schedule.
    pub fn validate(&self) -> Result<(), TrainError> {
        if self.depth == 0 || self.depth > MAX_DEPTH {
            return Err(TrainError::InvalidDepth { depth: self.depth, max: MAX_DEPTH });
        }
        self.annealing.validate()?;
        let checks = [
            ("learning_rate", self.learning_rate, self.learning_rate > 0.0),
            ("lr_decay", self.lr_decay, self.lr_decay > 0.0 && self.lr_decay <= 1.0),
            ("weight_decay", self.weight_decay, self.weight_decay >= 0.0),
            ("output_penalty", self.output_penalty, self.output_penalty >= 0.0),
            ("init_scale", self.init_scale, self.init_scale >= 0.0),
            ("group_dropout", self.group_dropout, (0.0..1.0).contains(&self.group_dropout)),
        ];
        for (field, value, ok) in checks {
            if !(value.is_finite() && ok) {
                return Err(TrainError::InvalidParameter { field, value });
            }
        }
        Ok(())
    }
}

// =============================================================================
// NodeGamTrainer
// =============================================================================

/// Trainer for constrained soft-tree ensembles.
#[derive(Debug, Clone)]
pub struct NodeGamTrainer {
    objective: Objective,
    metric: Metric,
    params: NodeGamParams,
}

/// Snapshot retained for early stopping.
struct Best {
    epoch: usize,
    ensemble: Ensemble,
    metrics: Vec<MetricValue>,
}

impl NodeGamTrainer {
    pub fn new(objective: Objective, metric: Metric, params: NodeGamParams) -> Self {
        Self { objective, metric, params }
    }

    pub fn params(&self) -> &NodeGamParams {
        &self.params
    }

    pub fn objective(&self) -> &Objective {
        &self.objective
    }

    pub fn metric(&self) -> &Metric {
        &self.metric
    }

    /// Train an ensemble.
    ///
    /// **Note:** this does not create a thread pool; wrap the call in
    /// [`run_with_threads`](crate::utils::run_with_threads) to control it.
    ///
    /// * `features` - `[n_rows, n_features]`
    /// * `targets` - `[n_rows, n_targets]`, see [`Objective`]
    /// * `eval_sets` - validation sets; the first one drives early stopping
    pub fn train(
        &self,
        features: ArrayView2<'_, f32>,
        targets: ArrayView2<'_, f32>,
        eval_sets: &[EvalSet<'_>],
        parallelism: Parallelism,
    ) -> Result<(Ensemble, TrainingReport), TrainError> {
        let p = &self.params;
        p.validate()?;
        let n_features = features.ncols();
        validate_features(features, n_features)?;
        validate_targets(features, targets)?;
        self.objective.validate_targets(targets)?;
        for set in eval_sets {
            let checked = validate_features(set.features, n_features)
                .and_then(|_| validate_targets(set.features, set.targets))
                .and_then(|_| self.objective.validate_targets(set.targets));
            checked.map_err(|source| TrainError::EvalSet { name: set.name.to_string(), source })?;
        }
        let groups = p.mode.groups(n_features)?;
        let n_groups = groups.len();
        let n_trees = p.n_trees.unwrap_or(n_groups);
        if n_trees < n_groups {
            return Err(TrainError::TooFewTrees { n_trees, n_groups });
        }

        let init = InitParams {
            groups,
            n_trees,
            depth: p.depth,
            selection: p.selection,
            init_scale: p.init_scale,
            seed: p.seed,
        };
        let mut ensemble = init_ensemble(&init, &self.objective, features, targets)?;
        ensemble.seal();

        let mut session = TrainingSession::new(p.annealing);
        ensemble.set_temperature(session.temperature());
        let mut adam = Adam::new(ensemble.n_params()).with_weight_decay(p.weight_decay);
        let logger = TrainingLogger::new(p.verbosity);
        logger.start_training(p.max_epochs, ensemble.n_trees(), ensemble.n_groups(), ensemble.n_params());
        if p.early_stopping_rounds > 0 && eval_sets.is_empty() {
            logger.warn_early_stopping_on_train();
        }

        let higher_is_better = self.metric.is_enabled() && self.metric.higher_is_better();
        let mut early_stopping = EarlyStopping::new(p.early_stopping_rounds, higher_is_better);
        let mut best: Option<Best> = None;
        let mut report = TrainingReport::default();

        let mut order: Vec<usize> = (0..features.nrows()).collect();
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(p.seed.wrapping_add(1));
        let batch_size = p.batch_size.max(1);

        for epoch in 0..p.max_epochs {
            order.shuffle(&mut rng);
            let learning_rate = p.learning_rate * p.lr_decay.powi(epoch as i32);
            let mut loss_sum = 0.0f64;

            for batch in order.chunks(batch_size) {
                let temperature = session.temperature();
                // drawn only when enabled so the shuffle stream is unchanged otherwise
                let mask = (p.group_dropout > 0.0)
                    .then(|| GroupMask::sample(&mut rng, batch.len(), n_groups, p.group_dropout));
                let gradient = RowGradient {
                    ensemble: &ensemble,
                    objective: &self.objective,
                    temperature,
                    output_penalty: p.output_penalty,
                    group_mask: mask.as_ref(),
                };
                let (loss, grad) = gradient
                    .batch(features, targets, batch, parallelism)
                    .map_err(|at| TrainError::numerical(epoch, session.step(), at))?;
                if let Some(at) = grad.find_non_finite(&ensemble) {
                    return Err(TrainError::numerical(epoch, session.step(), at));
                }
                adam.step(ensemble.params_mut(), grad.params(), learning_rate);
                logger.log_step(session.step(), temperature, loss);
                session.advance();
                loss_sum += loss * batch.len() as f64;
            }

            let train_loss = loss_sum / order.len() as f64;
            let temperature = session.temperature();
            ensemble.set_temperature(temperature);
            let metrics = self.evaluate_epoch(&ensemble, features, targets, eval_sets, parallelism);
            logger.log_epoch(epoch, temperature, learning_rate, train_loss, &metrics);

            // first eval set when present, otherwise the training set
            let (monitored_name, monitored_value) = metrics
                .get(1)
                .or(metrics.first())
                .map_or_else(|| (String::from("loss"), f64::NAN), |m| (m.metric.clone(), m.value));
            let action = early_stopping.update(monitored_value);
            report.history.push(EpochRecord {
                epoch,
                step: session.step(),
                temperature: temperature.value(),
                learning_rate,
                train_loss,
                metrics: metrics.clone(),
            });
            report.n_epochs = epoch + 1;

            match action {
                EarlyStopAction::Improved if early_stopping.is_enabled() => {
                    best = Some(Best { epoch, ensemble: ensemble.clone(), metrics });
                }
                EarlyStopAction::Stop => {
                    logger.log_early_stopping(epoch, early_stopping.best_round(), &monitored_name);
                    report.stopped_early = true;
                    break;
                }
                EarlyStopAction::Improved | EarlyStopAction::Continue => {}
            }
        }

        report.n_steps = session.step();
        let ensemble = match best {
            Some(best) => {
                report.best_epoch = Some(best.epoch);
                report.final_metrics = best.metrics;
                best.ensemble
            }
            None => {
                report.final_metrics = report.history.last().map(|r| r.metrics.clone()).unwrap_or_default();
                ensemble
            }
        };
        let final_temperature = p.annealing.final_temperature();
        if ensemble.temperature() != final_temperature {
            logger.warn_not_annealed(ensemble.temperature(), final_temperature, report.n_steps, p.annealing.n_steps);
        }
        logger.finish_training(report.n_epochs, report.best_epoch);
        Ok((ensemble, report))
    }

    /// Metrics of the current ensemble: training set first, then each eval set.
    fn evaluate_epoch(
        &self,
        ensemble: &Ensemble,
        features: ArrayView2<'_, f32>,
        targets: ArrayView2<'_, f32>,
        eval_sets: &[EvalSet<'_>],
        parallelism: Parallelism,
    ) -> Vec<MetricValue> {
        let predictor = Predictor::new(ensemble);
        std::iter::once(("train", features.view(), targets.view()))
            .chain(eval_sets.iter().map(|s| (s.name, s.features.view(), s.targets.view())))
            .map(|(name, x, y)| {
                let raw = predictor.predict_raw(x, parallelism);
                eval::evaluate(&self.objective, &self.metric, name, raw, y)
            })
            .collect()
    }
}

// =============================================================================
// Tests
// =============================================================================
