//! Training infrastructure for constrained soft-tree ensembles.
//!
//! - [`NodeGamTrainer`]: mini-batch training loop with annealing and early stopping
//! - [`TrainingSession`]: global step counter driving the temperature schedule
//! - [`Objective`]: squared, logistic and softmax losses
//! - [`Metric`]: evaluation metrics for early stopping and reports
//! - [`Adam`]: optimizer applied once per mini-batch
//! - [`EnsembleGrad`]: gradient buffers shaped like an ensemble
//! - [`EarlyStopping`]: patience counter on a monitored metric
//! - [`GroupMask`]: per-row group dropout during training
//! - [`TrainingLogger`]: structured logging with verbosity levels
//!
//! Gradients are exact (no autodiff): see [`backward`] for the derivation.

pub mod backward;
mod callback;
mod dropout;
mod eval;
pub mod init;
mod logger;
mod metrics;
mod objectives;
mod optimizer;
mod report;
mod session;
mod trainer;

pub use backward::{EnsembleGrad, RowGradient, GRADIENT_CHUNK_ROWS};
pub use callback::{EarlyStopAction, EarlyStopping};
pub use dropout::GroupMask;
pub use eval::{evaluate, mean_loss, EvalSet, MetricValue};
pub use logger::{TrainingLogger, Verbosity};
pub use metrics::{Metric, MetricFn, PredictionKind};
pub use objectives::{Objective, ObjectiveFn, TaskKind};
pub use optimizer::Adam;
pub use report::{EpochRecord, TrainingReport};
pub use session::TrainingSession;
pub use trainer::{NodeGamParams, NodeGamTrainer, TrainError};
