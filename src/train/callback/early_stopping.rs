//! Early stopping callback to halt training when a monitored metric plateaus

use super::monitor::{monitored_value, MonitorMode};
use super::traits::{CallbackAction, CallbackContext, RunHandle, TrainerCallback};
use crate::error::Result;

/// Stops training when a monitored metric stops improving
///
/// Checked after every validation pass. The first check sets the baseline;
/// every later check that does not beat the best value by more than
/// `|min_delta|` increments a wait counter, and training stops once the
/// counter reaches `patience`.
///
/// # Example
///
/// ```rust
/// use decathlon_train::train::callback::{EarlyStopping, MonitorMode};
///
/// // Stop if val_loss has not improved for 10 validation checks
/// let early_stop = EarlyStopping::new("val_loss", MonitorMode::Min, 10);
/// ```
#[derive(Clone, Debug)]
pub struct EarlyStopping {
    monitor: String,
    mode: MonitorMode,
    /// Checks without improvement before stopping
    patience: usize,
    /// Minimum improvement to reset patience
    min_delta: f64,
    /// Log the stop reason at info level
    verbose: bool,
    /// Stop immediately on NaN or infinite values
    check_finite: bool,
    best_score: f64,
    pub(crate) wait_count: usize,
    stopped_epoch: Option<usize>,
}

impl EarlyStopping {
    /// Create new early stopping callback
    pub fn new(monitor: impl Into<String>, mode: MonitorMode, patience: usize) -> Self {
        Self {
            monitor: monitor.into(),
            mode,
            patience,
            min_delta: 0.0,
            verbose: false,
            check_finite: true,
            best_score: mode.worst(),
            wait_count: 0,
            stopped_epoch: None,
        }
    }

    pub fn with_min_delta(mut self, min_delta: f64) -> Self {
        self.min_delta = min_delta;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn with_check_finite(mut self, check_finite: bool) -> Self {
        self.check_finite = check_finite;
        self
    }

    pub fn best_score(&self) -> f64 {
        self.best_score
    }

    /// Epoch at which a stop was requested.
    pub fn stopped_epoch(&self) -> Option<usize> {
        self.stopped_epoch
    }

    /// Reset internal state
    pub fn reset(&mut self) {
        self.best_score = self.mode.worst();
        self.wait_count = 0;
        self.stopped_epoch = None;
    }

    /// Update state with `current`; returns the stop reason when training should end.
    fn evaluate(&mut self, current: f64) -> Option<String> {
        if self.check_finite && !current.is_finite() {
            return Some(format!(
                "Monitored metric {} = {current} is not finite. Previous best value was {:.3}. Signaling Trainer to stop.",
                self.monitor, self.best_score
            ));
        }

        if self.mode.improves(current, self.best_score, self.min_delta) {
            if self.best_score.is_finite() {
                tracing::debug!(
                    "Metric {} improved by {:.3} >= min_delta = {}. New best score: {current:.3}",
                    self.monitor,
                    (self.best_score - current).abs(),
                    self.min_delta.abs()
                );
            }
            self.best_score = current;
            self.wait_count = 0;
            return None;
        }

        self.wait_count += 1;
        (self.wait_count >= self.patience).then(|| {
            format!(
                "Monitored metric {} did not improve in the last {} records. Best score: {:.3}. Signaling Trainer to stop.",
                self.monitor, self.wait_count, self.best_score
            )
        })
    }
}

impl TrainerCallback for EarlyStopping {
    fn on_validation_end(&mut self, ctx: &CallbackContext, _run: &mut RunHandle<'_>) -> Result<CallbackAction> {
        let current = monitored_value(ctx, &self.monitor, self.name())?;
        match self.evaluate(current) {
            Some(reason) => {
                self.stopped_epoch = Some(ctx.epoch);
                if self.verbose {
                    tracing::info!("{reason}");
                } else {
                    tracing::debug!("{reason}");
                }
                Ok(CallbackAction::Stop)
            }
            None => Ok(CallbackAction::Continue),
        }
    }

    fn name(&self) -> &'static str {
        "EarlyStopping"
    }
}
