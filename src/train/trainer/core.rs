//! Core Trainer struct and basic methods

use std::time::Instant;

use crate::device::{select_device, Accelerator, Device, Devices};
use crate::error::Result;
use crate::model::{Metrics, TrainableModel};
use crate::train::callback::{CallbackContext, CallbackManager, TrainerCallback};
use crate::train::logger::Logger;

/// Engine settings
#[derive(Clone, Debug, PartialEq)]
pub struct TrainerConfig {
    pub max_epochs: usize,
    pub accelerator: Accelerator,
    pub devices: Devices,
    /// Log `train_loss` every N optimizer steps
    pub log_every_n_steps: usize,
    /// Validation batches run before training as a smoke check
    pub num_sanity_val_steps: usize,
}

impl TrainerConfig {
    pub fn new(max_epochs: usize) -> Self {
        Self {
            max_epochs,
            ..Self::default()
        }
    }
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            max_epochs: 10,
            accelerator: Accelerator::Auto,
            devices: Devices::Auto,
            log_every_n_steps: 50,
            num_sanity_val_steps: 2,
        }
    }
}

/// Drives the epoch/step loop for a [`TrainableModel`]
///
/// # Example
///
/// ```no_run
/// use decathlon_train::data::{DataModuleConfig, DataProvider, DecathlonDataModule};
/// use decathlon_train::model::DecathlonModel;
/// use decathlon_train::train::{MemoryLogger, Trainer, TrainerConfig};
///
/// let mut data = DecathlonDataModule::new(DataModuleConfig::new("data", "Task09_Spleen", 2, 0, 42));
/// data.setup()?;
/// let mut model = DecathlonModel::new(1e-3, true);
///
/// let mut trainer = Trainer::new(TrainerConfig::new(10), Box::new(MemoryLogger::new()))?;
/// let result = trainer.fit(&mut model, &data)?;
/// println!("Trained {} epochs", result.epochs_completed);
/// # Ok::<(), decathlon_train::Error>(())
/// ```
pub struct Trainer {
    pub(crate) config: TrainerConfig,
    pub(crate) device: Device,
    pub(crate) logger: Box<dyn Logger>,
    pub(crate) callbacks: CallbackManager,
    pub(crate) global_step: usize,
    /// Latest value of every logged metric
    pub(crate) callback_metrics: Metrics,
    pub(crate) start_time: Option<Instant>,
}

impl Trainer {
    /// Create a trainer, resolving the compute device.
    pub fn new(config: TrainerConfig, logger: Box<dyn Logger>) -> Result<Self> {
        let device = select_device(config.accelerator, config.devices)?;
        tracing::info!("Using device: {device}");
        Ok(Self {
            config,
            device,
            logger,
            callbacks: CallbackManager::new(),
            global_step: 0,
            callback_metrics: Metrics::new(),
            start_time: None,
        })
    }

    /// Add a callback to the trainer
    pub fn add_callback<C: TrainerCallback + 'static>(&mut self, callback: C) {
        self.callbacks.add(callback);
    }

    /// Replace the callbacks
    pub fn with_callbacks(mut self, callbacks: CallbackManager) -> Self {
        self.callbacks = callbacks;
        self
    }

    pub fn config(&self) -> &TrainerConfig {
        &self.config
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn logger(&self) -> &dyn Logger {
        self.logger.as_ref()
    }

    pub fn callbacks(&self) -> &CallbackManager {
        &self.callbacks
    }

    /// Optimizer steps taken so far
    pub fn global_step(&self) -> usize {
        self.global_step
    }

    /// Latest value of every logged metric
    pub fn callback_metrics(&self) -> &Metrics {
        &self.callback_metrics
    }

    /// Build callback context from current state
    pub(crate) fn build_context(
        &self,
        model: &dyn TrainableModel,
        epoch: usize,
        step: usize,
        steps_per_epoch: usize,
        loss: Option<f64>,
    ) -> CallbackContext {
        CallbackContext {
            epoch,
            max_epochs: self.config.max_epochs,
            step,
            steps_per_epoch,
            global_step: self.global_step,
            loss,
            metrics: self.callback_metrics.clone(),
            learning_rates: model.learning_rates(),
            elapsed_secs: self.start_time.map_or(0.0, |t| t.elapsed().as_secs_f64()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::train::callback::ProgressCallback;
    use crate::train::logger::MemoryLogger;

    #[test]
    fn test_trainer_creation() {
        let trainer = Trainer::new(TrainerConfig::new(3), Box::new(MemoryLogger::new())).unwrap();
        assert_eq!(trainer.config().max_epochs, 3);
        assert!(!trainer.device().is_accelerated());
        assert_eq!(trainer.global_step(), 0);
        assert!(trainer.callbacks().is_empty());
    }

    #[test]
    fn test_gpu_request_fails() {
        let config = TrainerConfig {
            accelerator: Accelerator::Gpu,
            ..TrainerConfig::default()
        };
        let err = Trainer::new(config, Box::new(MemoryLogger::new())).err().unwrap();
        assert_eq!(err.code(), "E020");
    }

    #[test]
    fn test_add_callback() {
        let mut trainer = Trainer::new(TrainerConfig::default(), Box::new(MemoryLogger::new())).unwrap();
        trainer.add_callback(ProgressCallback::new(5));
        assert_eq!(trainer.callbacks().len(), 1);
    }
}
