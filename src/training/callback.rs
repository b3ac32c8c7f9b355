//! Early stopping for training.
//!
//! Monitors a validation metric once per epoch and signals when no
//! improvement has been seen for `patience` epochs.

/// Outcome of [`EarlyStopping::update`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EarlyStopAction {
    /// New best value; the caller should snapshot the model.
    Improved,
    Continue,
    Stop,
}

/// Early stopping configuration and state.
///
/// ```
/// use nodegam::training::{EarlyStopAction, EarlyStopping};
///
/// let mut early_stop = EarlyStopping::new(2, false);
/// assert_eq!(early_stop.update(1.0), EarlyStopAction::Improved);
/// assert_eq!(early_stop.update(1.1), EarlyStopAction::Continue);
/// assert_eq!(early_stop.update(1.2), EarlyStopAction::Stop);
/// assert_eq!(early_stop.best_round(), 0);
/// ```
#[derive(Debug, Clone)]
pub struct EarlyStopping {
    /// Epochs without improvement before stopping. 0 disables.
    patience: usize,
    best_value: Option<f64>,
    best_round: usize,
    current_round: usize,
    higher_is_better: bool,
}

impl EarlyStopping {
    pub fn new(patience: usize, higher_is_better: bool) -> Self {
        Self {
            patience,
            best_value: None,
            best_round: 0,
            current_round: 0,
            higher_is_better,
        }
    }

    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.patience > 0
    }

    /// Record this round's value.
    ///
    /// Non-finite values never count as improvements.
    pub fn update(&mut self, value: f64) -> EarlyStopAction {
        let is_improvement = value.is_finite()
            && match self.best_value {
                None => true,
                Some(best) if self.higher_is_better => value > best,
                Some(best) => value < best,
            };

        if is_improvement {
            self.best_value = Some(value);
            self.best_round = self.current_round;
        }
        self.current_round += 1;

        if is_improvement {
            EarlyStopAction::Improved
        } else if self.is_enabled() && self.current_round - self.best_round > self.patience {
            EarlyStopAction::Stop
        } else {
            EarlyStopAction::Continue
        }
    }

    /// Best metric value observed.
    pub fn best_value(&self) -> Option<f64> {
        self.best_value
    }

    /// Round at which the best value was observed.
    pub fn best_round(&self) -> usize {
        self.best_round
    }

    pub fn current_round(&self) -> usize {
        self.current_round
    }

    pub fn reset(&mut self) {
        self.best_value = None;
        self.best_round = 0;
        self.current_round = 0;
    }
}
