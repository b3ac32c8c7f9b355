//! Evaluation metrics.
//!
//! Metrics are separate from objectives: a model may be trained with one
//! loss but monitored with another. Predictions are `[n_rows, n_outputs]`
//! in the space named by [`MetricFn::expected_prediction_kind`]; targets are
//! the same `[n_rows, n_targets]` matrix the objective consumes.

use ndarray::ArrayView2;
use serde::{Deserialize, Serialize};

/// What prediction values represent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictionKind {
    /// Raw scores: `bias + Σ contributions`.
    Margin,
    /// Regression values (identity transform).
    Value,
    /// Probabilities in `[0, 1]`, or rows summing to 1 for multiclass.
    Probability,
}

/// A metric for evaluating model quality.
pub trait MetricFn: Send + Sync {
    fn compute(&self, predictions: ArrayView2<'_, f32>, targets: ArrayView2<'_, f32>) -> f64;

    /// What prediction space does this metric expect?
    fn expected_prediction_kind(&self) -> PredictionKind;

    fn higher_is_better(&self) -> bool;

    fn name(&self) -> &'static str;
}

/// Evaluation metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    /// No metric; the training loss is monitored instead.
    #[default]
    None,
    Rmse,
    Mae,
    LogLoss,
    Accuracy,
    Auc,
    MulticlassAccuracy,
}

impl Metric {
    #[inline]
    pub fn is_enabled(&self) -> bool {
        !matches!(self, Self::None)
    }
}

impl MetricFn for Metric {
    fn compute(&self, predictions: ArrayView2<'_, f32>, targets: ArrayView2<'_, f32>) -> f64 {
        debug_assert_eq!(predictions.nrows(), targets.nrows());
        let n_rows = predictions.nrows();
        if n_rows == 0 {
            return f64::NAN;
        }
        match self {
            Self::None => f64::NAN,
            Self::Rmse => {
                let sse: f64 = predictions
                    .iter()
                    .zip(targets.iter())
                    .map(|(&p, &y)| ((p - y) as f64).powi(2))
                    .sum();
                (sse / predictions.len() as f64).sqrt()
            }
            Self::Mae => {
                let sae: f64 = predictions
                    .iter()
                    .zip(targets.iter())
                    .map(|(&p, &y)| ((p - y) as f64).abs())
                    .sum();
                sae / predictions.len() as f64
            }
            Self::LogLoss => {
                const EPS: f64 = 1e-15;
                let total: f64 = predictions
                    .outer_iter()
                    .zip(targets.column(0))
                    .map(|(p, &y)| {
                        if p.len() == 1 {
                            let p = (p[0] as f64).clamp(EPS, 1.0 - EPS);
                            let y = y as f64;
                            -(y * p.ln() + (1.0 - y) * (1.0 - p).ln())
                        } else {
                            -(p[y as usize] as f64).clamp(EPS, 1.0).ln()
                        }
                    })
                    .sum();
                total / n_rows as f64
            }
            Self::Accuracy => {
                let correct = predictions
                    .column(0)
                    .iter()
                    .zip(targets.column(0))
                    .filter(|(&p, &y)| (p >= 0.5) == (y > 0.5))
                    .count();
                correct as f64 / n_rows as f64
            }
            Self::Auc => auc(predictions.column(0).iter().copied(), targets.column(0).iter().copied()),
            Self::MulticlassAccuracy => {
                let correct = predictions
                    .outer_iter()
                    .zip(targets.column(0))
                    .filter(|(p, &y)| {
                        let (best, _) = crate::soft::argmax(&p.to_vec());
                        best == y as usize
                    })
                    .count();
                correct as f64 / n_rows as f64
            }
        }
    }

    fn expected_prediction_kind(&self) -> PredictionKind {
        match self {
            Self::None => PredictionKind::Margin,
            Self::Rmse | Self::Mae => PredictionKind::Value,
            Self::LogLoss | Self::Accuracy | Self::Auc | Self::MulticlassAccuracy => PredictionKind::Probability,
        }
    }

    fn higher_is_better(&self) -> bool {
        matches!(self, Self::Accuracy | Self::Auc | Self::MulticlassAccuracy)
    }

    fn name(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Rmse => "rmse",
            Self::Mae => "mae",
            Self::LogLoss => "logloss",
            Self::Accuracy => "accuracy",
            Self::Auc => "auc",
            Self::MulticlassAccuracy => "multiclass_accuracy",
        }
    }
}

/// ROC AUC via the rank-sum statistic, with tied scores sharing their
/// average rank. Returns 0.5 when only one class is present.
fn auc(scores: impl Iterator<Item = f32>, labels: impl Iterator<Item = f32>) -> f64 {
    let mut pairs: Vec<(f32, bool)> = scores.zip(labels.map(|y| y > 0.5)).collect();
    let n_pos = pairs.iter().filter(|(_, pos)| *pos).count();
    let n_neg = pairs.len() - n_pos;
    if n_pos == 0 || n_neg == 0 {
        return 0.5;
    }
    pairs.sort_by(|a, b| a.0.total_cmp(&b.0));

    let mut pos_rank_sum = 0.0f64;
    let mut start = 0;
    while start < pairs.len() {
        let mut end = start + 1;
        while end < pairs.len() && pairs[end].0 == pairs[start].0 {
            end += 1;
        }
        // ranks are 1-based; the tie block [start, end) shares the mean rank
        let mean_rank = (start + end + 1) as f64 / 2.0;
        let n_pos_in_block = pairs[start..end].iter().filter(|(_, pos)| *pos).count();
        pos_rank_sum += mean_rank * n_pos_in_block as f64;
        start = end;
    }

    let n_pos = n_pos as f64;
    (pos_rank_sum - n_pos * (n_pos + 1.0) / 2.0) / (n_pos * n_neg as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn rmse_and_mae() {
        let p = array![[1.0f32], [2.0]];
        let y = array![[0.0f32], [0.0]];
        assert_abs_diff_eq!(Metric::Rmse.compute(p.view(), y.view()), 2.5f64.sqrt(), epsilon = 1e-12);
        assert_abs_diff_eq!(Metric::Mae.compute(p.view(), y.view()), 1.5, epsilon = 1e-12);
    }

    #[test]
    fn auc_perfect_and_ties() {
        let y = array![[0.0f32], [0.0], [1.0], [1.0]];
        let p = array![[0.1f32], [0.2], [0.8], [0.9]];
        assert_eq!(Metric::Auc.compute(p.view(), y.view()), 1.0);
        let p = array![[0.5f32], [0.5], [0.5], [0.5]];
        assert_eq!(Metric::Auc.compute(p.view(), y.view()), 0.5);
        // one positive tied with one negative, the other positive above all
        let p = array![[0.1f32], [0.5], [0.5], [0.9]];
        assert_abs_diff_eq!(Metric::Auc.compute(p.view(), y.view()), 0.875, epsilon = 1e-12);
    }

    #[test]
    fn classification_metrics() {
        let y = array![[0.0f32], [1.0], [1.0]];
        let p = array![[0.2f32], [0.7], [0.4]];
        assert_abs_diff_eq!(Metric::Accuracy.compute(p.view(), y.view()), 2.0 / 3.0, epsilon = 1e-12);
        let expected = -((0.8f64).ln() + (0.7f64).ln() + (0.4f64).ln()) / 3.0;
        assert_abs_diff_eq!(Metric::LogLoss.compute(p.view(), y.view()), expected, epsilon = 1e-6);

        let y = array![[2.0f32], [0.0]];
        let p = array![[0.1f32, 0.2, 0.7], [0.3, 0.6, 0.1]];
        assert_eq!(Metric::MulticlassAccuracy.compute(p.view(), y.view()), 0.5);
    }

    #[test]
    fn direction() {
        assert!(Metric::Auc.higher_is_better());
        assert!(!Metric::Rmse.higher_is_better());
        assert!(!Metric::None.is_enabled());
    }
}
