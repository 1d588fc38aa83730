//! Callback system for training events
//!
//! Provides hooks for training loop events:
//! - `on_train_begin` / `on_train_end`
//! - `on_epoch_begin` / `on_epoch_end`
//! - `on_train_batch_start` / `on_train_batch_end`
//! - `on_validation_end`
//!
//! # Example
//!
//! ```rust
//! use decathlon_train::train::callback::{CallbackAction, CallbackContext, RunHandle, TrainerCallback};
//! use decathlon_train::Result;
//!
//! struct PrintCallback;
//!
//! impl TrainerCallback for PrintCallback {
//!     fn on_epoch_end(&mut self, ctx: &CallbackContext, _run: &mut RunHandle<'_>) -> Result<CallbackAction> {
//!         println!("Epoch {} finished with metrics {:?}", ctx.epoch, ctx.metrics);
//!         Ok(CallbackAction::Continue)
//!     }
//! }
//! ```

mod checkpoint;
mod early_stopping;
mod lr_monitor;
mod manager;
mod monitor;
mod progress;
mod traits;

pub use checkpoint::{CheckpointPayload, ModelCheckpoint, CHECKPOINT_EXTENSION};
pub use early_stopping::EarlyStopping;
pub use lr_monitor::{LearningRateMonitor, LoggingInterval};
pub use manager::CallbackManager;
pub use monitor::MonitorMode;
pub use progress::ProgressCallback;
pub use traits::{CallbackAction, CallbackContext, RunHandle, TrainerCallback};
