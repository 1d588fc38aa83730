//! Core traits and types for the callback system
//!
//! - `CallbackContext` - State passed to callbacks
//! - `RunHandle` - Logger and read access to the model
//! - `CallbackAction` - Actions a callback can request
//! - `TrainerCallback` - The trait all callbacks implement

use std::path::Path;

use crate::error::Result;
use crate::model::{Metrics, TrainableModel};
use crate::train::logger::Logger;

/// Context passed to callbacks with current training state
#[derive(Clone, Debug, Default)]
pub struct CallbackContext {
    /// Current epoch (0-indexed)
    pub epoch: usize,
    /// Total epochs planned
    pub max_epochs: usize,
    /// Current batch within the epoch
    pub step: usize,
    /// Training batches per epoch
    pub steps_per_epoch: usize,
    /// Optimizer steps taken so far
    pub global_step: usize,
    /// Most recent training loss
    pub loss: Option<f64>,
    /// Latest value of every logged metric
    pub metrics: Metrics,
    /// Current learning rates keyed by monitor name
    pub learning_rates: Vec<(String, f64)>,
    /// Training duration in seconds
    pub elapsed_secs: f64,
}

/// What a callback may touch while handling an event
pub struct RunHandle<'a> {
    pub logger: &'a mut dyn Logger,
    pub model: &'a dyn TrainableModel,
}

impl<'a> RunHandle<'a> {
    pub fn new(logger: &'a mut dyn Logger, model: &'a dyn TrainableModel) -> Self {
        Self { logger, model }
    }
}

/// Action to take after a callback
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum CallbackAction {
    /// Continue training normally
    #[default]
    Continue,
    /// Stop once the current epoch completes
    Stop,
}

/// Trait for training callbacks
///
/// All methods have default no-op implementations, so you only need to
/// implement the events you care about. Errors abort the run.
pub trait TrainerCallback: Send {
    /// Called before the first epoch
    fn on_train_begin(&mut self, _ctx: &CallbackContext, _run: &mut RunHandle<'_>) -> Result<CallbackAction> {
        Ok(CallbackAction::Continue)
    }

    /// Called after the last epoch
    fn on_train_end(&mut self, _ctx: &CallbackContext, _run: &mut RunHandle<'_>) -> Result<()> {
        Ok(())
    }

    /// Called before each epoch
    fn on_epoch_begin(&mut self, _ctx: &CallbackContext, _run: &mut RunHandle<'_>) -> Result<CallbackAction> {
        Ok(CallbackAction::Continue)
    }

    /// Called after each epoch, once validation and scheduler updates are done
    fn on_epoch_end(&mut self, _ctx: &CallbackContext, _run: &mut RunHandle<'_>) -> Result<CallbackAction> {
        Ok(CallbackAction::Continue)
    }

    /// Called before each training step
    fn on_train_batch_start(&mut self, _ctx: &CallbackContext, _run: &mut RunHandle<'_>) -> Result<CallbackAction> {
        Ok(CallbackAction::Continue)
    }

    /// Called after each training step
    fn on_train_batch_end(&mut self, _ctx: &CallbackContext, _run: &mut RunHandle<'_>) -> Result<CallbackAction> {
        Ok(CallbackAction::Continue)
    }

    /// Called after a full validation pass; `ctx.metrics` holds its results
    fn on_validation_end(&mut self, _ctx: &CallbackContext, _run: &mut RunHandle<'_>) -> Result<CallbackAction> {
        Ok(CallbackAction::Continue)
    }

    /// Best checkpoint written so far, with its score
    fn best_model(&self) -> Option<(&Path, f64)> {
        None
    }

    /// Get callback name for logging
    fn name(&self) -> &'static str {
        "TrainerCallback"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DecathlonModel;
    use crate::train::logger::MemoryLogger;

    #[test]
    fn test_callback_context_default() {
        let ctx = CallbackContext::default();
        assert_eq!(ctx.epoch, 0);
        assert!(ctx.loss.is_none());
        assert!(ctx.metrics.is_empty());
    }

    #[test]
    fn test_default_trainer_callback_impl() {
        struct MinimalCallback;
        impl TrainerCallback for MinimalCallback {
            fn name(&self) -> &'static str {
                "MinimalCallback"
            }
        }

        let mut cb = MinimalCallback;
        let ctx = CallbackContext::default();
        let mut logger = MemoryLogger::new();
        let model = DecathlonModel::new(0.01, false);
        let mut run = RunHandle::new(&mut logger, &model);
        assert_eq!(cb.on_train_begin(&ctx, &mut run).unwrap(), CallbackAction::Continue);
        assert_eq!(cb.on_epoch_begin(&ctx, &mut run).unwrap(), CallbackAction::Continue);
        assert_eq!(cb.on_train_batch_end(&ctx, &mut run).unwrap(), CallbackAction::Continue);
        assert_eq!(cb.on_validation_end(&ctx, &mut run).unwrap(), CallbackAction::Continue);
        assert_eq!(cb.on_epoch_end(&ctx, &mut run).unwrap(), CallbackAction::Continue);
        cb.on_train_end(&ctx, &mut run).unwrap();
        assert!(cb.best_model().is_none());
    }
}
