//! Temperature and annealing schedules.
//!
//! A [`Temperature`] controls how sharply routing and splitting approximate
//! hard decisions. Zero is the fully hardened setting: routing becomes an
//! argmax and splitting becomes an exact comparison.

use serde::{Deserialize, Serialize};

/// Non-negative temperature. `0.0` means hard (discrete) evaluation.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "f32", into = "f32")]
pub struct Temperature(f32);

impl Temperature {
    /// Fully hardened evaluation.
    pub const HARD: Self = Self(0.0);

    /// Create a temperature. Returns `None` for negative or non-finite values.
    pub fn new(value: f32) -> Option<Self> {
        (value.is_finite() && value >= 0.0).then_some(Self(value))
    }

    #[inline]
    pub fn value(self) -> f32 {
        self.0
    }

    #[inline]
    pub fn is_hard(self) -> bool {
        self.0 == 0.0
    }
}

impl Default for Temperature {
    fn default() -> Self {
        Self(1.0)
    }
}

impl TryFrom<f32> for Temperature {
    type Error = String;

    fn try_from(value: f32) -> Result<Self, Self::Error> {
        Self::new(value).ok_or_else(|| format!("temperature must be finite and >= 0, got {value}"))
    }
}

impl From<Temperature> for f32 {
    fn from(t: Temperature) -> f32 {
        t.0
    }
}

impl std::fmt::Display for Temperature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_hard() {
            write!(f, "hard")
        } else {
            write!(f, "{:.4}", self.0)
        }
    }
}

// =============================================================================
// AnnealingSchedule
// =============================================================================

/// Interpolation shape between the initial and final temperature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleKind {
    /// `t0 + (t1 - t0) * progress`
    #[default]
    Linear,
    /// `t0 * (t1 / t0) ^ progress`. Requires a strictly positive final temperature.
    Exponential,
}

/// Errors for malformed schedules.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ScheduleError {
    #[error("{field} must be finite and >= 0, got {value}")]
    InvalidTemperature { field: &'static str, value: f32 },
    #[error("initial temperature {initial} must be >= final temperature {final_temperature}")]
    NotMonotone { initial: f32, final_temperature: f32 },
    #[error("exponential schedule needs positive temperatures, got {initial} -> {final_temperature}")]
    NonPositiveExponential { initial: f32, final_temperature: f32 },
}

/// Monotone non-increasing temperature as a function of the global step.
///
/// After `n_steps` the temperature stays at `final_temperature`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnnealingSchedule {
    pub initial_temperature: f32,
    pub final_temperature: f32,
    pub n_steps: u64,
    #[serde(default)]
    pub kind: ScheduleKind,
}

impl Default for AnnealingSchedule {
    fn default() -> Self {
        Self {
            initial_temperature: 1.0,
            final_temperature: 0.0,
            n_steps: 1000,
            kind: ScheduleKind::Linear,
        }
    }
}

impl AnnealingSchedule {
    /// Linear schedule from `initial` to `final_temperature` over `n_steps`.
    pub fn linear(initial: f32, final_temperature: f32, n_steps: u64) -> Self {
        Self { initial_temperature: initial, final_temperature, n_steps, kind: ScheduleKind::Linear }
    }

    /// Exponential schedule from `initial` to `final_temperature` over `n_steps`.
    pub fn exponential(initial: f32, final_temperature: f32, n_steps: u64) -> Self {
        Self {
            initial_temperature: initial,
            final_temperature,
            n_steps,
            kind: ScheduleKind::Exponential,
        }
    }

    /// Constant temperature (no annealing).
    pub fn constant(temperature: f32) -> Self {
        Self::linear(temperature, temperature, 0)
    }

    pub fn validate(&self) -> Result<(), ScheduleError> {
        for (field, value) in [
            ("initial_temperature", self.initial_temperature),
            ("final_temperature", self.final_temperature),
        ] {
            if Temperature::new(value).is_none() {
                return Err(ScheduleError::InvalidTemperature { field, value });
            }
        }
        if self.initial_temperature < self.final_temperature {
            return Err(ScheduleError::NotMonotone {
                initial: self.initial_temperature,
                final_temperature: self.final_temperature,
            });
        }
        if self.kind == ScheduleKind::Exponential && self.final_temperature <= 0.0 {
            return Err(ScheduleError::NonPositiveExponential {
                initial: self.initial_temperature,
                final_temperature: self.final_temperature,
            });
        }
        Ok(())
    }

    /// Temperature at a global step.
    ///
    /// Assumes a validated schedule; out-of-range intermediate values are
    /// clamped into `[final, initial]` so the result is always monotone.
    pub fn temperature_at(&self, step: u64) -> Temperature {
        let (t0, t1) = (self.initial_temperature, self.final_temperature);
        if self.n_steps == 0 || step >= self.n_steps {
            return Temperature::new(t1).unwrap_or(Temperature::HARD);
        }
        let progress = (step as f64 / self.n_steps as f64) as f32;
        let t = match self.kind {
            ScheduleKind::Linear => t0 + (t1 - t0) * progress,
            ScheduleKind::Exponential => t0 * (t1 / t0).powf(progress),
        };
        Temperature::new(t.clamp(t1, t0)).unwrap_or(Temperature::HARD)
    }

    /// Temperature the schedule settles at once annealing is complete.
    pub fn final_temperature(&self) -> Temperature {
        Temperature::new(self.final_temperature).unwrap_or(Temperature::HARD)
    }
}
