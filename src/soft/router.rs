//! Differentiable feature selection over a fixed index set.
//!
//! A level of an oblivious tree holds one logit per feature it is allowed to
//! read. [`route_into`] turns those logits into a probability distribution
//! (temperature-scaled softmax or sparsemax) and [`gather`] reads the
//! probability-weighted feature value. At [`Temperature::HARD`] the
//! distribution is one-hot at the argmax logit (lowest index wins ties).

use serde::{Deserialize, Serialize};

use super::Temperature;

/// Scaled logit differences are floored here so `exp` and sums stay finite.
const MIN_SCALED_LOGIT: f32 = -1.0e6;

/// Transform mapping logits to selection probabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionFn {
    /// Temperature-scaled softmax. Dense at any positive temperature.
    #[default]
    Softmax,
    /// Euclidean projection onto the simplex. Becomes exactly one-hot once
    /// the scaled gap between the two largest logits exceeds 1.
    Sparsemax,
}

/// Compute selection probabilities for `logits` into `out`.
///
/// # Panics
///
/// Panics if `logits` is empty or `out.len() != logits.len()`.
pub fn route_into(selection: SelectionFn, logits: &[f32], temperature: Temperature, out: &mut [f32]) {
    assert!(!logits.is_empty(), "router needs at least one feature");
    assert_eq!(logits.len(), out.len());

    if logits.len() == 1 {
        out[0] = 1.0;
        return;
    }

    let (argmax, max) = argmax(logits);
    if temperature.is_hard() {
        out.fill(0.0);
        out[argmax] = 1.0;
        return;
    }

    let t = temperature.value();
    for (o, &l) in out.iter_mut().zip(logits) {
        *o = ((l - max) / t).max(MIN_SCALED_LOGIT);
    }

    match selection {
        SelectionFn::Softmax => softmax_inplace(out),
        SelectionFn::Sparsemax => sparsemax_inplace(out),
    }
}

/// Allocating convenience wrapper around [`route_into`].
pub fn route(selection: SelectionFn, logits: &[f32], temperature: Temperature) -> Vec<f32> {
    let mut out = vec![0.0; logits.len()];
    route_into(selection, logits, temperature, &mut out);
    out
}

/// Probability-weighted gather: `Σ weights[j] * values[j]`.
#[inline]
pub fn gather(weights: &[f32], values: &[f32]) -> f32 {
    debug_assert_eq!(weights.len(), values.len());
    weights.iter().zip(values).map(|(w, v)| w * v).sum()
}

/// Backpropagate through [`route_into`].
///
/// `weights` are the forward outputs and `grad_weights` the loss gradient
/// with respect to them. The logit gradient is added to `grad_logits`.
/// Hard routing and single-feature routing have zero gradient.
pub fn route_backward(
    selection: SelectionFn,
    weights: &[f32],
    grad_weights: &[f32],
    temperature: Temperature,
    grad_logits: &mut [f32],
) {
    debug_assert_eq!(weights.len(), grad_weights.len());
    debug_assert_eq!(weights.len(), grad_logits.len());
    if temperature.is_hard() || weights.len() == 1 {
        return;
    }
    let inv_t = 1.0 / temperature.value();

    match selection {
        SelectionFn::Softmax => {
            let dot: f32 = gather(weights, grad_weights);
            for ((g, &w), &gw) in grad_logits.iter_mut().zip(weights).zip(grad_weights) {
                *g += w * (gw - dot) * inv_t;
            }
        }
        SelectionFn::Sparsemax => {
            let (sum, count) = weights
                .iter()
                .zip(grad_weights)
                .filter(|(&w, _)| w > 0.0)
                .fold((0.0f32, 0usize), |(s, c), (_, &gw)| (s + gw, c + 1));
            if count == 0 {
                return;
            }
            let mean = sum / count as f32;
            for ((g, &w), &gw) in grad_logits.iter_mut().zip(weights).zip(grad_weights) {
                if w > 0.0 {
                    *g += (gw - mean) * inv_t;
                }
            }
        }
    }
}

/// Index and value of the largest logit. Ties resolve to the lowest index.
#[inline]
pub fn argmax(logits: &[f32]) -> (usize, f32) {
    logits
        .iter()
        .copied()
        .enumerate()
        .fold((0, f32::NEG_INFINITY), |(bi, bv), (i, v)| if v > bv { (i, v) } else { (bi, bv) })
}

fn softmax_inplace(z: &mut [f32]) {
    let mut sum = 0.0f32;
    for v in z.iter_mut() {
        *v = v.exp();
        sum += *v;
    }
    // The max entry is exp(0) = 1, so sum >= 1.
    for v in z.iter_mut() {
        *v /= sum;
    }
}

fn sparsemax_inplace(z: &mut [f32]) {
    let mut sorted = z.to_vec();
    sorted.sort_by(|a, b| b.total_cmp(a));

    let mut cumsum = 0.0f32;
    let mut support = 0usize;
    let mut support_sum = 0.0f32;
    for (k, &v) in sorted.iter().enumerate() {
        cumsum += v;
        let kk = (k + 1) as f32;
        if 1.0 + kk * v > cumsum {
            support = k + 1;
            support_sum = cumsum;
        }
    }
    let tau = (support_sum - 1.0) / support.max(1) as f32;
    for v in z.iter_mut() {
        *v = (*v - tau).max(0.0);
    }
}
