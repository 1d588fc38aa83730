//! Progress callback for logging training progress

use super::traits::{CallbackAction, CallbackContext, RunHandle, TrainerCallback};
use crate::error::Result;

/// Logs a summary line per epoch and the training loss every N steps
#[derive(Clone, Debug)]
pub struct ProgressCallback {
    /// Log every N steps
    log_interval: usize,
}

impl ProgressCallback {
    /// Create progress callback
    pub fn new(log_interval: usize) -> Self {
        Self { log_interval }
    }

    /// Summary line for the end of an epoch.
    pub fn epoch_summary(ctx: &CallbackContext) -> String {
        let metrics: Vec<String> = ctx
            .metrics
            .iter()
            .map(|(name, value)| format!("{name}: {value:.4}"))
            .collect();
        format!(
            "Epoch {}/{}: {} ({:.1}s)",
            ctx.epoch + 1,
            ctx.max_epochs,
            metrics.join(", "),
            ctx.elapsed_secs
        )
    }
}

impl Default for ProgressCallback {
    fn default() -> Self {
        Self { log_interval: 50 }
    }
}

impl TrainerCallback for ProgressCallback {
    fn on_epoch_end(&mut self, ctx: &CallbackContext, _run: &mut RunHandle<'_>) -> Result<CallbackAction> {
        tracing::info!("{}", Self::epoch_summary(ctx));
        Ok(CallbackAction::Continue)
    }

    fn on_train_batch_end(&mut self, ctx: &CallbackContext, _run: &mut RunHandle<'_>) -> Result<CallbackAction> {
        if self.log_interval > 0 && ctx.global_step % self.log_interval == 0 {
            if let Some(loss) = ctx.loss {
                tracing::debug!(
                    "  Step {}/{}: loss: {loss:.4}",
                    ctx.step + 1,
                    ctx.steps_per_epoch
                );
            }
        }
        Ok(CallbackAction::Continue)
    }

    fn name(&self) -> &'static str {
        "ProgressCallback"
    }
}
