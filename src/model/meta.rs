//! Model metadata.
//!
//! Everything needed to interpret a trained ensemble's outputs, kept next to
//! the ensemble in snapshots.

use serde::{Deserialize, Serialize};

use crate::repr::{Ensemble, ModelMode};
use crate::training::{Metric, Objective, ObjectiveFn, TaskKind};

/// Shared metadata for a trained model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMeta {
    /// Feature names (optional).
    pub feature_names: Option<Vec<String>>,
    /// Number of input features.
    pub n_features: usize,
    /// Number of raw outputs.
    pub n_outputs: usize,
    pub task: TaskKind,
    /// Objective the model was trained with; drives the output transform.
    pub objective: Objective,
    /// Metric used during training.
    pub metric: Metric,
    pub mode: ModelMode,
    pub depth: usize,
    pub n_trees: usize,
    /// Epoch of the retained snapshot (from early stopping).
    pub best_epoch: Option<usize>,
    /// Bias at the end of training.
    pub base_scores: Vec<f32>,
}

impl ModelMeta {
    /// Describe `ensemble` trained with `objective`.
    pub fn for_ensemble(ensemble: &Ensemble, objective: Objective, metric: Metric, mode: ModelMode) -> Self {
        Self {
            feature_names: None,
            n_features: ensemble.n_features(),
            n_outputs: ensemble.n_outputs(),
            task: objective.task_kind(),
            objective,
            metric,
            mode,
            depth: ensemble.trees().iter().map(|t| t.depth()).max().unwrap_or(0),
            n_trees: ensemble.n_trees(),
            best_epoch: None,
            base_scores: ensemble.bias().to_vec(),
        }
    }

    pub fn is_classification(&self) -> bool {
        matches!(self.task, TaskKind::BinaryClassification | TaskKind::MulticlassClassification)
    }
}
