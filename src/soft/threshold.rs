//! Soft binary split against a learned threshold.
//!
//! The probability of going right is `σ((value - threshold) · sharpness / T)`.
//! Sharpness is parameterized in log space so it stays positive. The logit is
//! clamped to `±MAX_SPLIT_LOGIT` and the effective scale to `MAX_SPLIT_SCALE`,
//! so the output is always a finite probability however large the sharpness
//! grows or however small the temperature gets. At [`Temperature::HARD`] the
//! split is the exact comparison `value >= threshold`.

use super::Temperature;

/// Split logits are clamped to this magnitude.
pub const MAX_SPLIT_LOGIT: f32 = 30.0;

/// Log-sharpness is clamped to `±MAX_LOG_SHARPNESS` before exponentiation.
pub const MAX_LOG_SHARPNESS: f32 = 12.0;

/// Upper bound on `sharpness / temperature`.
pub const MAX_SPLIT_SCALE: f32 = 1.0e12;

/// Result of a soft split evaluation, kept for the backward pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SplitEval {
    /// Probability of taking the right branch.
    pub right: f32,
    /// Clamped split logit `z`.
    pub logit: f32,
    /// Effective scale `sharpness / T` (0 when hard).
    pub scale: f32,
    /// True when the logit was clamped or the split is hard; such splits
    /// carry no gradient to threshold or sharpness.
    pub saturated: bool,
}

impl SplitEval {
    #[inline]
    pub fn left(&self) -> f32 {
        1.0 - self.right
    }
}

/// Positive sharpness from its log-space parameter.
#[inline]
pub fn sharpness(log_sharpness: f32) -> f32 {
    log_sharpness.clamp(-MAX_LOG_SHARPNESS, MAX_LOG_SHARPNESS).exp()
}

/// Numerically stable logistic function.
#[inline]
pub fn stable_sigmoid(x: f32) -> f32 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

/// Evaluate one soft split.
#[inline]
pub fn soft_split(value: f32, threshold: f32, log_sharpness: f32, temperature: Temperature) -> SplitEval {
    if temperature.is_hard() {
        let right = if value >= threshold { 1.0 } else { 0.0 };
        return SplitEval { right, logit: 0.0, scale: 0.0, saturated: true };
    }

    let scale = (sharpness(log_sharpness) / temperature.value()).min(MAX_SPLIT_SCALE);
    let raw = (value - threshold) * scale;
    let logit = raw.clamp(-MAX_SPLIT_LOGIT, MAX_SPLIT_LOGIT);
    SplitEval {
        right: stable_sigmoid(logit),
        logit,
        scale,
        saturated: raw != logit,
    }
}

/// Partial derivatives of `right` with respect to the split inputs.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SplitGrad {
    pub value: f32,
    pub threshold: f32,
    pub log_sharpness: f32,
}

/// Chain `d loss / d right` through a split evaluated by [`soft_split`].
#[inline]
pub fn soft_split_grad(eval: &SplitEval, log_sharpness: f32, grad_right: f32) -> SplitGrad {
    if eval.saturated {
        return SplitGrad::default();
    }
    let dz = grad_right * eval.right * (1.0 - eval.right);
    let sharpness_clamped = log_sharpness.abs() >= MAX_LOG_SHARPNESS || eval.scale >= MAX_SPLIT_SCALE;
    SplitGrad {
        value: dz * eval.scale,
        threshold: -dz * eval.scale,
        // d z / d log_sharpness = z because sharpness = exp(log_sharpness)
        log_sharpness: if sharpness_clamped { 0.0 } else { dz * eval.logit },
    }
}
