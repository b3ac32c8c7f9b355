//! Training session: owns the global step counter.
//!
//! The temperature of every training forward call is a pure function of the
//! session's step. It is read once per optimizer step and shared by all
//! workers evaluating that step's batch.

use crate::soft::{AnnealingSchedule, Temperature};

/// Step counter plus the annealing schedule that maps steps to temperatures.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingSession {
    schedule: AnnealingSchedule,
    step: u64,
}

impl TrainingSession {
    pub fn new(schedule: AnnealingSchedule) -> Self {
        Self { schedule, step: 0 }
    }

    /// Number of optimizer steps taken so far.
    #[inline]
    pub fn step(&self) -> u64 {
        self.step
    }

    /// Temperature for the current step.
    #[inline]
    pub fn temperature(&self) -> Temperature {
        self.schedule.temperature_at(self.step)
    }

    /// Advance by one optimizer step and return the next step's temperature.
    pub fn advance(&mut self) -> Temperature {
        self.step += 1;
        self.temperature()
    }

    #[inline]
    pub fn schedule(&self) -> &AnnealingSchedule {
        &self.schedule
    }
}
