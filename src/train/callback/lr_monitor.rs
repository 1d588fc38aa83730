//! Learning rate logging

use super::traits::{CallbackAction, CallbackContext, RunHandle, TrainerCallback};
use crate::error::Result;
use crate::model::Metrics;

/// When [`LearningRateMonitor`] records
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum LoggingInterval {
    /// Before every optimization step
    #[default]
    Step,
    /// At the start of every epoch
    Epoch,
}

/// Logs every learning rate the model reports, e.g. `lr-Adam`
#[derive(Clone, Debug, Default)]
pub struct LearningRateMonitor {
    interval: LoggingInterval,
}

impl LearningRateMonitor {
    pub fn new(interval: LoggingInterval) -> Self {
        Self { interval }
    }

    pub fn interval(&self) -> LoggingInterval {
        self.interval
    }

    fn log(&self, ctx: &CallbackContext, run: &mut RunHandle<'_>) -> Result<CallbackAction> {
        let rates: Metrics = run.model.learning_rates().into_iter().collect();
        if !rates.is_empty() {
            run.logger.log_metrics(&rates, ctx.global_step)?;
        }
        Ok(CallbackAction::Continue)
    }
}

impl TrainerCallback for LearningRateMonitor {
    fn on_epoch_begin(&mut self, ctx: &CallbackContext, run: &mut RunHandle<'_>) -> Result<CallbackAction> {
        match self.interval {
            LoggingInterval::Epoch => self.log(ctx, run),
            LoggingInterval::Step => Ok(CallbackAction::Continue),
        }
    }

    fn on_train_batch_start(&mut self, ctx: &CallbackContext, run: &mut RunHandle<'_>) -> Result<CallbackAction> {
        match self.interval {
            LoggingInterval::Step => self.log(ctx, run),
            LoggingInterval::Epoch => Ok(CallbackAction::Continue),
        }
    }

    fn name(&self) -> &'static str {
        "LearningRateMonitor"
    }
}
