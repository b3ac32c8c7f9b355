//! Evaluation sets and per-epoch metric values.

use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};

use super::metrics::{Metric, MetricFn, PredictionKind};
use super::objectives::{Objective, ObjectiveFn};

/// Named evaluation dataset.
#[derive(Debug, Clone, Copy)]
pub struct EvalSet<'a> {
    pub name: &'a str,
    pub features: ArrayView2<'a, f32>,
    pub targets: ArrayView2<'a, f32>,
}

impl<'a> EvalSet<'a> {
    pub fn new(name: &'a str, features: ArrayView2<'a, f32>, targets: ArrayView2<'a, f32>) -> Self {
        Self { name, features, targets }
    }
}

/// One metric value computed on one dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricValue {
    pub dataset: String,
    pub metric: String,
    pub value: f64,
    pub higher_is_better: bool,
}

/// Transform raw scores into the space `metric` expects.
pub fn to_metric_space(objective: &Objective, metric: &Metric, mut raw: Array2<f32>) -> Array2<f32> {
    if metric.expected_prediction_kind() != PredictionKind::Margin {
        for row in raw.outer_iter_mut() {
            objective.transform_inplace(row);
        }
    }
    raw
}

/// Mean objective loss of raw scores against targets.
pub fn mean_loss(objective: &Objective, raw: ArrayView2<'_, f32>, targets: ArrayView2<'_, f32>) -> f64 {
    let mut grad = vec![0.0; raw.ncols()];
    let total: f64 = raw
        .outer_iter()
        .zip(targets.outer_iter())
        .map(|(r, t)| objective.loss_and_grad(&r.to_vec(), t, &mut grad))
        .sum();
    total / raw.nrows().max(1) as f64
}

/// Evaluate `metric` on raw scores, or the objective loss when no metric is
/// configured.
pub fn evaluate(
    objective: &Objective,
    metric: &Metric,
    dataset: &str,
    raw: Array2<f32>,
    targets: ArrayView2<'_, f32>,
) -> MetricValue {
    if metric.is_enabled() {
        let predictions = to_metric_space(objective, metric, raw);
        MetricValue {
            dataset: dataset.to_string(),
            metric: metric.name().to_string(),
            value: metric.compute(predictions.view(), targets),
            higher_is_better: metric.higher_is_better(),
        }
    } else {
        MetricValue {
            dataset: dataset.to_string(),
            metric: objective.name().to_string(),
            value: mean_loss(objective, raw.view(), targets),
            higher_is_better: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn falls_back_to_loss() {
        let raw = array![[1.0f32], [3.0]];
        let y = array![[1.0f32], [1.0]];
        let v = evaluate(&Objective::squared(), &Metric::None, "train", raw, y.view());
        assert_eq!(v.metric, "squared");
        assert_eq!(v.value, 1.0);
        assert!(!v.higher_is_better);
    }

    #[test]
    fn transforms_for_probability_metrics() {
        let raw = array![[-10.0f32], [10.0]];
        let y = array![[0.0f32], [1.0]];
        let v = evaluate(&Objective::logistic(), &Metric::Accuracy, "valid", raw, y.view());
        assert_eq!(v.value, 1.0);
        assert!(v.higher_is_better);
    }
}
