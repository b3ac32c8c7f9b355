//! Training history and final metrics record.

use serde::{Deserialize, Serialize};

use super::eval::MetricValue;

/// Everything recorded at the end of one epoch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochRecord {
    pub epoch: usize,
    /// Optimizer steps taken once the epoch finished.
    pub step: u64,
    /// Temperature the epoch's metrics were evaluated at.
    pub temperature: f32,
    pub learning_rate: f32,
    /// Mean training loss over the epoch's mini-batches, penalty included.
    pub train_loss: f64,
    pub metrics: Vec<MetricValue>,
}

/// Summary of a training run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingReport {
    pub history: Vec<EpochRecord>,
    /// Epoch of the returned snapshot, when one was selected.
    pub best_epoch: Option<usize>,
    pub stopped_early: bool,
    pub n_epochs: usize,
    pub n_steps: u64,
    /// Metrics of the returned model, one entry per dataset.
    pub final_metrics: Vec<MetricValue>,
}

impl TrainingReport {
    /// Final value of `metric` on `dataset`, if it was recorded.
    pub fn final_metric(&self, dataset: &str) -> Option<f64> {
        self.final_metrics.iter().find(|m| m.dataset == dataset).map(|m| m.value)
    }

    /// Training loss per epoch.
    pub fn loss_curve(&self) -> Vec<f64> {
        self.history.iter().map(|r| r.train_loss).collect()
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
