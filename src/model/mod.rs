//! Trainable models
//!
//! The trainer drives any [`TrainableModel`]. [`DecathlonModel`] is the
//! shipped per-voxel segmentation classifier.

mod decathlon;
pub mod loss;

pub use decathlon::{DecathlonModel, DEFAULT_NUM_CLASSES};
pub use loss::{DiceCELoss, DiceCEOutput};

use std::collections::BTreeMap;

use crate::data::Batch;
use crate::error::Result;

/// Named scalar metrics, ordered by name
pub type Metrics = BTreeMap<String, f64>;

/// Parameters plus training and validation step logic
///
/// Hooks are called by the trainer in this order per epoch:
/// `training_step`… → `validation_step`… → `on_validation_epoch_end` →
/// `on_train_epoch_end`.
pub trait TrainableModel {
    /// Build optimizer and learning rate schedule for a run of `max_epochs`.
    fn configure_optimizers(&mut self, max_epochs: usize) -> Result<()>;

    /// One optimization step on `batch`; returns the training loss.
    fn training_step(&mut self, batch: &Batch, global_step: usize) -> Result<f64>;

    /// Accumulate validation outputs for `batch`.
    fn validation_step(&mut self, batch: &Batch) -> Result<()>;

    /// Reduce accumulated validation outputs into metrics and reset them.
    fn on_validation_epoch_end(&mut self) -> Result<Metrics>;

    /// End-of-epoch bookkeeping such as stepping the LR schedule.
    fn on_train_epoch_end(&mut self, _epoch: usize) -> Result<()> {
        Ok(())
    }

    /// Current learning rates keyed by monitor name, e.g. `lr-Adam`.
    fn learning_rates(&self) -> Vec<(String, f64)>;

    /// Hyperparameters recorded by loggers and checkpoints.
    fn hyperparameters(&self) -> BTreeMap<String, serde_json::Value>;

    /// Serializable snapshot of all trainable state.
    fn state_dict(&self) -> Result<serde_json::Value>;

    /// Restore a snapshot produced by [`TrainableModel::state_dict`].
    fn load_state_dict(&mut self, state: serde_json::Value) -> Result<()>;
}
