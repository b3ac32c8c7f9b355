//! Differentiable objectives.
//!
//! Objectives work on one row at a time: given the raw outputs
//! (`bias + Σ contributions`) and the row's targets they return the loss and
//! write `d loss / d raw` into a gradient buffer. The trainer averages these
//! over a mini-batch.
//!
//! Targets are a `[n_rows, n_targets]` matrix:
//! - [`Objective::SquaredLoss`]: one target column per output
//! - [`Objective::LogisticLoss`]: one column of {0, 1} labels
//! - [`Objective::SoftmaxLoss`]: one column of class indices in `[0, K)`

use ndarray::{ArrayView1, ArrayView2, ArrayViewMut1};
use serde::{Deserialize, Serialize};

use super::metrics::{Metric, PredictionKind};
use crate::data::DataError;
use crate::soft::stable_sigmoid;

/// High-level task implied by an objective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Regression,
    BinaryClassification,
    MulticlassClassification,
}

/// Probabilities are clamped to `[EPS, 1 - EPS]` before taking logs.
const EPS: f64 = 1e-7;

/// Behavior shared by all objectives.
pub trait ObjectiveFn: Send + Sync {
    /// Number of raw model outputs.
    fn n_outputs(&self) -> usize;

    /// Number of target columns expected.
    fn n_targets(&self) -> usize;

    /// Loss of one row. Writes `d loss / d raw` into `grad`.
    fn loss_and_grad(&self, raw: &[f32], target: ArrayView1<'_, f32>, grad: &mut [f32]) -> f64;

    /// Constant raw output minimizing the loss on `targets`.
    fn base_score(&self, targets: ArrayView2<'_, f32>) -> Vec<f32>;

    /// Transform one row of raw outputs in place.
    fn transform_inplace(&self, raw: ArrayViewMut1<'_, f32>) -> PredictionKind;

    /// Check target shape and label semantics.
    fn validate_targets(&self, targets: ArrayView2<'_, f32>) -> Result<(), DataError>;

    fn task_kind(&self) -> TaskKind;

    fn default_metric(&self) -> Metric;

    fn name(&self) -> &'static str;
}

/// Training objective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Objective {
    /// `½ Σ (raw - y)²` over `n_outputs` independent targets.
    SquaredLoss { n_outputs: usize },
    /// Binary cross-entropy on one logit.
    LogisticLoss,
    /// Softmax cross-entropy over `n_classes` logits.
    SoftmaxLoss { n_classes: usize },
}

impl Default for Objective {
    fn default() -> Self {
        Self::SquaredLoss { n_outputs: 1 }
    }
}

impl Objective {
    pub fn squared() -> Self {
        Self::SquaredLoss { n_outputs: 1 }
    }

    pub fn logistic() -> Self {
        Self::LogisticLoss
    }

    pub fn softmax(n_classes: usize) -> Self {
        Self::SoftmaxLoss { n_classes }
    }

    fn check_target_width(&self, targets: ArrayView2<'_, f32>) -> Result<(), DataError> {
        if targets.ncols() != self.n_targets() {
            return Err(DataError::OutputDimMismatch {
                n_outputs: self.n_outputs(),
                n_targets: targets.ncols(),
                expected: self.n_targets(),
            });
        }
        Ok(())
    }
}

impl ObjectiveFn for Objective {
    fn n_outputs(&self) -> usize {
        match *self {
            Self::SquaredLoss { n_outputs } => n_outputs,
            Self::LogisticLoss => 1,
            Self::SoftmaxLoss { n_classes } => n_classes,
        }
    }

    fn n_targets(&self) -> usize {
        match *self {
            Self::SquaredLoss { n_outputs } => n_outputs,
            Self::LogisticLoss | Self::SoftmaxLoss { .. } => 1,
        }
    }

    fn loss_and_grad(&self, raw: &[f32], target: ArrayView1<'_, f32>, grad: &mut [f32]) -> f64 {
        debug_assert_eq!(raw.len(), self.n_outputs());
        debug_assert_eq!(grad.len(), raw.len());
        match *self {
            Self::SquaredLoss { .. } => {
                let mut loss = 0.0f64;
                for ((g, &p), &y) in grad.iter_mut().zip(raw).zip(target) {
                    let diff = p - y;
                    *g = diff;
                    loss += 0.5 * (diff as f64) * (diff as f64);
                }
                loss
            }
            Self::LogisticLoss => {
                let x = raw[0];
                let y = target[0];
                grad[0] = stable_sigmoid(x) - y;
                // softplus(x) - x*y, written to avoid overflow
                let x = x as f64;
                x.max(0.0) - x * y as f64 + (-x.abs()).exp().ln_1p()
            }
            Self::SoftmaxLoss { .. } => {
                let label = target[0] as usize;
                let max = raw.iter().copied().fold(f32::NEG_INFINITY, f32::max);
                let sum: f64 = raw.iter().map(|&x| ((x - max) as f64).exp()).sum();
                for (c, (g, &x)) in grad.iter_mut().zip(raw).enumerate() {
                    let p = (((x - max) as f64).exp() / sum) as f32;
                    *g = if c == label { p - 1.0 } else { p };
                }
                sum.ln() - (raw[label] - max) as f64
            }
        }
    }

    fn base_score(&self, targets: ArrayView2<'_, f32>) -> Vec<f32> {
        let n_rows = targets.nrows();
        if n_rows == 0 {
            return vec![0.0; self.n_outputs()];
        }
        match *self {
            Self::SquaredLoss { .. } => targets
                .columns()
                .into_iter()
                .map(|c| (c.iter().map(|&y| y as f64).sum::<f64>() / n_rows as f64) as f32)
                .collect(),
            Self::LogisticLoss => {
                let pos = targets.column(0).iter().filter(|&&y| y > 0.5).count();
                let p = (pos as f64 / n_rows as f64).clamp(EPS, 1.0 - EPS);
                vec![(p / (1.0 - p)).ln() as f32]
            }
            Self::SoftmaxLoss { n_classes } => {
                let mut counts = vec![0usize; n_classes];
                for &y in targets.column(0) {
                    if let Some(c) = counts.get_mut(y as usize) {
                        *c += 1;
                    }
                }
                let logs: Vec<f64> = counts
                    .iter()
                    .map(|&c| (c as f64 / n_rows as f64).clamp(EPS, 1.0).ln())
                    .collect();
                let mean = logs.iter().sum::<f64>() / n_classes as f64;
                logs.iter().map(|l| (l - mean) as f32).collect()
            }
        }
    }

    fn transform_inplace(&self, mut raw: ArrayViewMut1<'_, f32>) -> PredictionKind {
        match self {
            Self::SquaredLoss { .. } => PredictionKind::Value,
            Self::LogisticLoss => {
                raw.mapv_inplace(stable_sigmoid);
                PredictionKind::Probability
            }
            Self::SoftmaxLoss { .. } => {
                let max = raw.iter().copied().fold(f32::NEG_INFINITY, f32::max);
                raw.mapv_inplace(|x| (x - max).exp());
                let sum: f32 = raw.sum();
                raw.mapv_inplace(|x| x / sum);
                PredictionKind::Probability
            }
        }
    }

    fn validate_targets(&self, targets: ArrayView2<'_, f32>) -> Result<(), DataError> {
        self.check_target_width(targets)?;
        match *self {
            Self::SquaredLoss { .. } => Ok(()),
            Self::LogisticLoss => {
                for (row, &value) in targets.column(0).iter().enumerate() {
                    if value != 0.0 && value != 1.0 {
                        return Err(DataError::InvalidLabel { row, value, reason: "binary labels must be 0 or 1" });
                    }
                }
                Ok(())
            }
            Self::SoftmaxLoss { n_classes } => {
                for (row, &value) in targets.column(0).iter().enumerate() {
                    if value < 0.0 || value.fract() != 0.0 || value as usize >= n_classes {
                        return Err(DataError::InvalidLabel {
                            row,
                            value,
                            reason: "class labels must be integers in [0, n_classes)",
                        });
                    }
                }
                Ok(())
            }
        }
    }

    fn task_kind(&self) -> TaskKind {
        match self {
            Self::SquaredLoss { .. } => TaskKind::Regression,
            Self::LogisticLoss => TaskKind::BinaryClassification,
            Self::SoftmaxLoss { .. } => TaskKind::MulticlassClassification,
        }
    }

    fn default_metric(&self) -> Metric {
        match self {
            Self::SquaredLoss { .. } => Metric::Rmse,
            Self::LogisticLoss => Metric::LogLoss,
            Self::SoftmaxLoss { .. } => Metric::MulticlassAccuracy,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::SquaredLoss { .. } => "squared",
            Self::LogisticLoss => "logistic",
            Self::SoftmaxLoss { .. } => "softmax",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{array, Array1};
    use rstest::rstest;

    fn fd_check(obj: Objective, raw: &[f32], target: &[f32]) {
        let target = Array1::from(target.to_vec());
        let mut grad = vec![0.0; raw.len()];
        obj.loss_and_grad(raw, target.view(), &mut grad);
        let eps = 1e-3f32;
        let mut scratch = vec![0.0; raw.len()];
        for k in 0..raw.len() {
            let mut plus = raw.to_vec();
            plus[k] += eps;
            let mut minus = raw.to_vec();
            minus[k] -= eps;
            let fd = (obj.loss_and_grad(&plus, target.view(), &mut scratch)
                - obj.loss_and_grad(&minus, target.view(), &mut scratch))
                / (2.0 * eps as f64);
            assert_abs_diff_eq!(grad[k] as f64, fd, epsilon = 1e-3);
        }
    }

    #[rstest]
    #[case::squared(Objective::SquaredLoss { n_outputs: 2 }, vec![0.3, -1.2], vec![1.0, 0.5])]
    #[case::logistic_pos(Objective::LogisticLoss, vec![0.7], vec![1.0])]
    #[case::logistic_neg(Objective::LogisticLoss, vec![-2.0], vec![0.0])]
    #[case::softmax(Objective::SoftmaxLoss { n_classes: 3 }, vec![0.2, 1.1, -0.4], vec![2.0])]
    fn gradients_match_finite_differences(#[case] obj: Objective, #[case] raw: Vec<f32>, #[case] target: Vec<f32>) {
        fd_check(obj, &raw, &target);
    }

    #[test]
    fn logistic_loss_is_stable() {
        let mut grad = [0.0];
        let loss = Objective::LogisticLoss.loss_and_grad(&[1000.0], array![0.0f32].view(), &mut grad);
        assert!(loss.is_finite());
        assert_abs_diff_eq!(loss, 1000.0, epsilon = 1e-6);
        assert_eq!(grad[0], 1.0);
    }

    #[test]
    fn base_scores() {
        let y = array![[1.0f32], [3.0]];
        assert_eq!(Objective::squared().base_score(y.view()), vec![2.0]);
        let y = array![[1.0f32], [0.0], [0.0], [0.0]];
        assert_abs_diff_eq!(Objective::logistic().base_score(y.view())[0], (1.0f32 / 3.0).ln(), epsilon = 1e-6);
        let y = array![[0.0f32], [1.0], [1.0], [1.0]];
        let b = Objective::softmax(2).base_score(y.view());
        assert_abs_diff_eq!(b[1] - b[0], 3.0f32.ln(), epsilon = 1e-5);
    }

    #[test]
    fn label_validation() {
        let bad = array![[0.0f32], [0.5]];
        assert!(matches!(
            Objective::logistic().validate_targets(bad.view()),
            Err(DataError::InvalidLabel { row: 1, .. })
        ));
        let bad = array![[0.0f32], [3.0]];
        assert!(matches!(
            Objective::softmax(3).validate_targets(bad.view()),
            Err(DataError::InvalidLabel { row: 1, .. })
        ));
        let wide = array![[0.0f32, 1.0]];
        assert!(matches!(
            Objective::squared().validate_targets(wide.view()),
            Err(DataError::OutputDimMismatch { n_outputs: 1, n_targets: 2, expected: 1 })
        ));
    }

    #[test]
    fn softmax_transform_sums_to_one() {
        let mut raw = array![1.0f32, 2.0, 3.0];
        let kind = Objective::softmax(3).transform_inplace(raw.view_mut());
        assert_eq!(kind, PredictionKind::Probability);
        assert_abs_diff_eq!(raw.sum(), 1.0, epsilon = 1e-6);
        assert!(raw[2] > raw[1] && raw[1] > raw[0]);
    }
}
