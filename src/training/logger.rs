//! Training progress logging.
//!
//! Events go through `tracing`; the library never installs a subscriber.
//! [`Verbosity`] gates which events are emitted at all.

use serde::{Deserialize, Serialize};

use super::eval::MetricValue;
use crate::soft::Temperature;

/// How much the trainer reports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verbosity {
    #[default]
    Silent,
    Warning,
    Info,
    Debug,
}

/// Emits structured training events at the configured verbosity.
#[derive(Debug, Clone)]
pub struct TrainingLogger {
    verbosity: Verbosity,
}

impl TrainingLogger {
    pub fn new(verbosity: Verbosity) -> Self {
        Self { verbosity }
    }

    #[inline]
    pub fn verbosity(&self) -> Verbosity {
        self.verbosity
    }

    pub fn start_training(&self, max_epochs: usize, n_trees: usize, n_groups: usize, n_params: usize) {
        if self.verbosity >= Verbosity::Info {
            tracing::info!(max_epochs, n_trees, n_groups, n_params, "starting training");
        }
    }

    pub fn log_epoch(
        &self,
        epoch: usize,
        temperature: Temperature,
        learning_rate: f32,
        train_loss: f64,
        metrics: &[MetricValue],
    ) {
        if self.verbosity < Verbosity::Info {
            return;
        }
        let summary = metrics
            .iter()
            .map(|m| format!("{}-{}={:.6}", m.dataset, m.metric, m.value))
            .collect::<Vec<_>>()
            .join(" ");
        tracing::info!(
            epoch,
            temperature = temperature.value(),
            learning_rate,
            train_loss,
            "[{epoch}] {summary}"
        );
    }

    pub fn log_step(&self, step: u64, temperature: Temperature, batch_loss: f64) {
        if self.verbosity >= Verbosity::Debug {
            tracing::debug!(step, temperature = temperature.value(), batch_loss, "optimizer step");
        }
    }

    pub fn log_early_stopping(&self, epoch: usize, best_epoch: usize, metric: &str) {
        if self.verbosity >= Verbosity::Info {
            tracing::info!(epoch, best_epoch, metric, "early stopping");
        }
    }

    /// The returned model still evaluates softly: the schedule did not
    /// finish, or an earlier snapshot was kept.
    pub fn warn_not_annealed(
        &self,
        temperature: Temperature,
        final_temperature: Temperature,
        n_steps: u64,
        schedule_steps: u64,
    ) {
        if self.verbosity >= Verbosity::Warning {
            tracing::warn!(
                temperature = temperature.value(),
                final_temperature = final_temperature.value(),
                n_steps,
                schedule_steps,
                "model is not fully annealed; inference stays soft"
            );
        }
    }

    pub fn warn_early_stopping_on_train(&self) {
        if self.verbosity >= Verbosity::Warning {
            tracing::warn!("early stopping without eval sets monitors the training metric");
        }
    }

    pub fn finish_training(&self, epochs: usize, best_epoch: Option<usize>) {
        if self.verbosity >= Verbosity::Info {
            tracing::info!(epochs, ?best_epoch, "training finished");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_is_ordered() {
        assert!(Verbosity::Debug > Verbosity::Info);
        assert!(Verbosity::Info > Verbosity::Warning);
        assert!(Verbosity::Warning > Verbosity::Silent);
        assert_eq!(Verbosity::default(), Verbosity::Silent);
    }

    #[test]
    fn silent_logger_emits_nothing() {
        let logger = TrainingLogger::new(Verbosity::Silent);
        logger.start_training(1, 1, 1, 1);
        logger.log_epoch(0, Temperature::HARD, 0.1, 0.0, &[]);
        logger.finish_training(1, None);
    }

    #[test]
    fn warnings_respect_verbosity() {
        for verbosity in [Verbosity::Silent, Verbosity::Warning] {
            let logger = TrainingLogger::new(verbosity);
            logger.warn_not_annealed(Temperature::new(0.4).unwrap(), Temperature::HARD, 10, 100);
            logger.warn_early_stopping_on_train();
        }
    }
}
