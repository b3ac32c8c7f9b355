//! nodegam: differentiable generalized additive models built from soft
//! oblivious trees.
//!
//! Every tree is bound to one feature group (a single feature, or a pair
//! for GA2M) and can only ever read features of that group. The model
//! output is therefore a bias plus a sum of per-group shape functions,
//! which can be extracted exactly on a grid.
//!
//! # Key Types
//!
//! - [`NodeGamModel`] - High-level model with train/predict/shape extraction
//! - [`NodeGamConfig`] - Configuration builder
//! - [`Ensemble`] - Tree arena bound to [`FeatureGroup`]s
//! - [`Objective`] / [`Metric`] - Training objectives and evaluation metrics
//! - [`ShapeExtractor`] / [`ShapeTable`] - Per-group shape functions
//!
//! # Training
//!
//! Use `NodeGamConfig::builder()` to configure, then `NodeGamModel::train()`.
//! See the [`model`] module for details.

// Re-export approx traits for users who want to compare predictions
pub use approx;

pub mod data;
pub mod error;
pub mod explainability;
pub mod inference;
pub mod model;
pub mod persist;
pub mod repr;
pub mod soft;
pub mod testing;
pub mod training;
pub mod utils;

// =============================================================================
// Convenience Re-exports
// =============================================================================

pub use error::{Error, Result};

// High-level model types
pub use model::{ModelMeta, NodeGamConfig, NodeGamModel, TaskKind};

// Training types (objectives, metrics)
pub use training::{Metric, MetricFn, Objective, ObjectiveFn};

// Model structure
pub use repr::{Ensemble, FeatureGroup, GroupId, ModelMode, ObliviousTree};
pub use soft::{AnnealingSchedule, SelectionFn, Temperature};

// Shape functions
pub use explainability::{ShapeExtractor, ShapeTable};

// Shared utilities
pub use utils::{run_with_threads, Parallelism};
