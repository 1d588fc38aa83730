//! YAML schema for one training run
//!
//! The required keys come first; everything after `max_epochs` is optional
//! and falls back to the defaults below.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::device::{Accelerator, Devices};
use crate::reproducibility::MatmulPrecision;

/// Deserialize a bool from either a YAML boolean (`true`) or a quoted string (`"true"`).
fn deserialize_bool_lenient<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum BoolOrString {
        Bool(bool),
        Str(String),
    }

    match BoolOrString::deserialize(deserializer)? {
        BoolOrString::Bool(b) => Ok(b),
        BoolOrString::Str(s) => match s.to_lowercase().as_str() {
            "true" => Ok(true),
            "false" => Ok(false),
            other => Err(serde::de::Error::custom(format!(
                "expected 'true' or 'false', got '{other}'"
            ))),
        },
    }
}

pub(crate) const DEFAULT_VAL_FRACTION: f64 = 0.2;
pub(crate) const DEFAULT_PATCH_SIZE: usize = 64;
pub(crate) const DEFAULT_LOG_EVERY_N_STEPS: usize = 50;
pub(crate) const DEFAULT_NUM_SANITY_VAL_STEPS: usize = 2;

fn default_val_fraction() -> f32 {
    DEFAULT_VAL_FRACTION as f32
}

fn default_patch_size() -> usize {
    DEFAULT_PATCH_SIZE
}

fn default_log_every_n_steps() -> usize {
    DEFAULT_LOG_EVERY_N_STEPS
}

fn default_num_sanity_val_steps() -> usize {
    DEFAULT_NUM_SANITY_VAL_STEPS
}

/// Immutable settings for one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Global seed
    pub seed: u64,
    /// Directory containing the `TaskNN_Name` dataset folders
    pub root_dir: PathBuf,
    /// Decathlon task identifier, e.g. `Task09_Spleen`
    pub task: String,
    /// Samples per batch
    pub batch_size: usize,
    /// Data-loading worker threads (0 = load in the training thread)
    pub num_workers: usize,
    /// Initial learning rate
    pub learning_rate: f32,
    /// Enable cosine learning-rate annealing over `max_epochs`
    #[serde(deserialize_with = "deserialize_bool_lenient")]
    pub use_scheduler: bool,
    /// Logger root; each run writes to `<logs_dir>/<run_id>`
    pub logs_dir: PathBuf,
    /// Checkpoint root; each run writes to `<checkpoint_dirpath>/<run_id>`
    pub checkpoint_dirpath: PathBuf,
    /// Upper bound on training epochs
    pub max_epochs: usize,

    /// Segmentation classes including background (model default when unset)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_classes: Option<usize>,
    /// Fraction of training cases held out for validation
    #[serde(default = "default_val_fraction")]
    pub val_fraction: f32,
    /// Edge length of the random training crop
    #[serde(default = "default_patch_size")]
    pub patch_size: usize,
    /// Accelerator family
    #[serde(default)]
    pub accelerator: Accelerator,
    /// Number of devices
    #[serde(default)]
    pub devices: Devices,
    /// Float32 matmul precision preference
    #[serde(default)]
    pub float32_matmul_precision: MatmulPrecision,
    /// Log training loss every N optimizer steps
    #[serde(default = "default_log_every_n_steps")]
    pub log_every_n_steps: usize,
    /// Validation batches run before the first epoch
    #[serde(default = "default_num_sanity_val_steps")]
    pub num_sanity_val_steps: usize,
    /// Minimum improvement of `val_loss` that resets early-stopping patience
    #[serde(default)]
    pub min_delta: f32,

    /// Keys not consumed by the run (helpers for interpolation, notes)
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

impl RunConfig {
    /// Minimal configuration with every optional key at its default.
    pub fn new(root_dir: impl Into<PathBuf>, task: impl Into<String>) -> Self {
        Self {
            seed: 42,
            root_dir: root_dir.into(),
            task: task.into(),
            batch_size: 2,
            num_workers: 0,
            learning_rate: 1e-3,
            use_scheduler: false,
            logs_dir: PathBuf::from("logs"),
            checkpoint_dirpath: PathBuf::from("checkpoints"),
            max_epochs: 10,
            num_classes: None,
            val_fraction: default_val_fraction(),
            patch_size: default_patch_size(),
            accelerator: Accelerator::default(),
            devices: Devices::default(),
            float32_matmul_precision: MatmulPrecision::default(),
            log_every_n_steps: default_log_every_n_steps(),
            num_sanity_val_steps: default_num_sanity_val_steps(),
            min_delta: 0.0,
            extra: BTreeMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r"
seed: 7
root_dir: /data/msd
task: Task09_Spleen
batch_size: 4
num_workers: 2
learning_rate: 0.0003
use_scheduler: 'true'
logs_dir: logs
checkpoint_dirpath: ckpt
max_epochs: 100
";

    #[test]
    fn test_minimal_config_uses_defaults() {
        let cfg: RunConfig = serde_yaml::from_str(MINIMAL).expect("valid yaml");
        assert_eq!(cfg.seed, 7);
        assert!(cfg.use_scheduler);
        assert_eq!(cfg.val_fraction, 0.2);
        assert_eq!(cfg.patch_size, 64);
        assert_eq!(cfg.accelerator, Accelerator::Auto);
        assert_eq!(cfg.devices, Devices::Auto);
        assert_eq!(cfg.float32_matmul_precision, MatmulPrecision::High);
        assert_eq!(cfg.num_classes, None);
        assert!(cfg.extra.is_empty());
    }

    #[test]
    fn test_missing_required_key_fails() {
        let yaml = MINIMAL.replace("max_epochs: 100\n", "");
        let err = serde_yaml::from_str::<RunConfig>(&yaml).unwrap_err();
        assert!(err.to_string().contains("max_epochs"));
    }

    #[test]
    fn test_extra_keys_are_kept() {
        let yaml = format!("{MINIMAL}data_home: /srv\n");
        let cfg: RunConfig = serde_yaml::from_str(&yaml).expect("valid yaml");
        assert!(cfg.extra.contains_key("data_home"));
    }

    #[test]
    fn test_lenient_bool_rejects_garbage() {
        let yaml = MINIMAL.replace("'true'", "'maybe'");
        assert!(serde_yaml::from_str::<RunConfig>(&yaml).is_err());
    }
}
