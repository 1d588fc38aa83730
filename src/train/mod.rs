//! Training engine, callbacks and run logging
//!
//! # Example
//!
//! ```no_run
//! use decathlon_train::train::callback::{EarlyStopping, MonitorMode};
//! use decathlon_train::train::{RunLogger, Trainer, TrainerConfig};
//! use decathlon_train::run_id::generate_run_id;
//!
//! let run_id = generate_run_id();
//! let logger = RunLogger::new("logs", &run_id);
//! let mut trainer = Trainer::new(TrainerConfig::new(10), Box::new(logger))?;
//! trainer.add_callback(EarlyStopping::new("val_loss", MonitorMode::Min, 10));
//! # Ok::<(), decathlon_train::Error>(())
//! ```

pub mod callback;
pub mod logger;
mod trainer;

pub use callback::{
    CallbackAction, CallbackContext, CallbackManager, EarlyStopping, LearningRateMonitor,
    LoggingInterval, ModelCheckpoint, MonitorMode, ProgressCallback, RunHandle, TrainerCallback,
};
pub use logger::{Logger, MemoryLogger, RunLogger, RunStatus};
pub use trainer::{TrainResult, Trainer, TrainerConfig};
