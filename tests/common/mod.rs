//! Shared fixtures for integration tests

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::Path;

use decathlon_train::config::RunConfig;
use decathlon_train::data::{generate_task, Batch, BatchIter, DataProvider, DecathlonTask, SyntheticSpec};
use decathlon_train::model::{Metrics, TrainableModel};
use decathlon_train::{Error, Result};

/// Write a synthetic task under `<root>/data` and return a small, fast config for it.
pub fn synthetic_config(root: &Path, task: DecathlonTask, cases: usize) -> RunConfig {
    let data_dir = root.join("data");
    generate_task(&data_dir, &SyntheticSpec::new(task, cases, 8, 3))
        .expect("synthetic task should be written");

    let mut config = RunConfig::new(data_dir, task.dir_name());
    config.seed = 11;
    config.batch_size = 2;
    config.num_workers = 0;
    config.learning_rate = 0.05;
    config.use_scheduler = true;
    config.logs_dir = root.join("logs");
    config.checkpoint_dirpath = root.join("checkpoints");
    config.max_epochs = 3;
    config.patch_size = 6;
    config.log_every_n_steps = 1;
    config
}

/// Config pointing at a root that need not exist
pub fn bare_config(root: &Path) -> RunConfig {
    let mut config = RunConfig::new(root.join("data"), "Task09_Spleen");
    config.logs_dir = root.join("logs");
    config.checkpoint_dirpath = root.join("checkpoints");
    config
}

/// Provider yielding `train` empty batches per epoch and `val` empty validation batches
pub struct EmptyBatches {
    pub train: usize,
    pub val: usize,
}

impl DataProvider for EmptyBatches {
    fn setup(&mut self) -> Result<()> {
        Ok(())
    }

    fn train_batches(&self, _epoch: usize) -> Result<BatchIter<'_>> {
        Ok(Box::new((0..self.train).map(|i| Ok::<_, Error>(Batch::new(i, Vec::new())))))
    }

    fn val_batches(&self) -> Result<BatchIter<'_>> {
        Ok(Box::new((0..self.val).map(|i| Ok::<_, Error>(Batch::new(i, Vec::new())))))
    }

    fn num_train_batches(&self) -> usize {
        self.train
    }

    fn num_val_batches(&self) -> usize {
        self.val
    }
}

/// Model reporting scripted `(val_loss, val_dice)` pairs, one per validation pass.
/// The last pair repeats once the script runs out.
pub struct ScriptedModel {
    pub script: Vec<(f64, f64)>,
    pub checks: usize,
    pub steps: usize,
}

impl ScriptedModel {
    pub fn new(script: Vec<(f64, f64)>) -> Self {
        Self {
            script,
            checks: 0,
            steps: 0,
        }
    }

    /// Constant validation loss.
    pub fn constant(val_loss: f64) -> Self {
        Self::new(vec![(val_loss, 0.5)])
    }
}

impl TrainableModel for ScriptedModel {
    fn configure_optimizers(&mut self, _max_epochs: usize) -> Result<()> {
        Ok(())
    }

    fn training_step(&mut self, _batch: &Batch, _global_step: usize) -> Result<f64> {
        self.steps += 1;
        Ok(1.0)
    }

    fn validation_step(&mut self, _batch: &Batch) -> Result<()> {
        Ok(())
    }

    fn on_validation_epoch_end(&mut self) -> Result<Metrics> {
        let (loss, dice) = self
            .script
            .get(self.checks)
            .or(self.script.last())
            .copied()
            .unwrap_or((1.0, 0.0));
        self.checks += 1;
        Ok(Metrics::from([
            ("val_loss".to_string(), loss),
            ("val_dice".to_string(), dice),
        ]))
    }

    fn learning_rates(&self) -> Vec<(String, f64)> {
        vec![("lr-Adam".to_string(), 1e-3)]
    }

    fn hyperparameters(&self) -> BTreeMap<String, serde_json::Value> {
        BTreeMap::from([("learning_rate".to_string(), serde_json::json!(1e-3))])
    }

    fn state_dict(&self) -> Result<serde_json::Value> {
        Ok(serde_json::json!({ "checks": self.checks }))
    }

    fn load_state_dict(&mut self, _state: serde_json::Value) -> Result<()> {
        Ok(())
    }
}
