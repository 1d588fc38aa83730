//! Callback manager for dispatching events to multiple callbacks

use std::path::Path;

use super::traits::{CallbackAction, CallbackContext, RunHandle, TrainerCallback};
use crate::error::Result;

/// Manages multiple callbacks and dispatches events
///
/// Every callback sees every event, in registration order; a `Stop` from
/// any of them is reported once all have run. The first error aborts the
/// dispatch.
#[derive(Default)]
pub struct CallbackManager {
    callbacks: Vec<Box<dyn TrainerCallback>>,
}

fn merge(a: CallbackAction, b: CallbackAction) -> CallbackAction {
    if a == CallbackAction::Stop || b == CallbackAction::Stop {
        CallbackAction::Stop
    } else {
        CallbackAction::Continue
    }
}

macro_rules! dispatch {
    ($(#[$doc:meta] $name:ident),* $(,)?) => {
        $(
            #[$doc]
            pub fn $name(&mut self, ctx: &CallbackContext, run: &mut RunHandle<'_>) -> Result<CallbackAction> {
                let mut action = CallbackAction::Continue;
                for cb in &mut self.callbacks {
                    action = merge(action, cb.$name(ctx, run)?);
                }
                Ok(action)
            }
        )*
    };
}

impl CallbackManager {
    /// Create new callback manager
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a callback
    pub fn add<C: TrainerCallback + 'static>(&mut self, callback: C) {
        self.callbacks.push(Box::new(callback));
    }

    /// Add an already boxed callback
    pub fn add_boxed(&mut self, callback: Box<dyn TrainerCallback>) {
        self.callbacks.push(callback);
    }

    /// Check if no callbacks are registered
    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }

    /// Get number of callbacks
    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    /// Callback names in registration order
    pub fn names(&self) -> Vec<&'static str> {
        self.callbacks.iter().map(|cb| cb.name()).collect()
    }

    /// Best checkpoint reported by any callback
    pub fn best_model(&self) -> Option<(&Path, f64)> {
        self.callbacks.iter().find_map(|cb| cb.best_model())
    }

    dispatch! {
        /// Fire train begin event
        on_train_begin,
        /// Fire epoch begin event
        on_epoch_begin,
        /// Fire train batch start event
        on_train_batch_start,
        /// Fire train batch end event
        on_train_batch_end,
        /// Fire validation end event
        on_validation_end,
        /// Fire epoch end event
        on_epoch_end,
    }

    /// Fire train end event
    pub fn on_train_end(&mut self, ctx: &CallbackContext, run: &mut RunHandle<'_>) -> Result<()> {
        for cb in &mut self.callbacks {
            cb.on_train_end(ctx, run)?;
        }
        Ok(())
    }
}

impl FromIterator<Box<dyn TrainerCallback>> for CallbackManager {
    fn from_iter<I: IntoIterator<Item = Box<dyn TrainerCallback>>>(iter: I) -> Self {
        Self {
            callbacks: iter.into_iter().collect(),
        }
    }
}
