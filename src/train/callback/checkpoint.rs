//! Top-k model checkpointing on a monitored metric

use regex::Regex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use super::monitor::{monitored_value, MonitorMode};
use super::traits::{CallbackAction, CallbackContext, RunHandle, TrainerCallback};
use crate::error::{Error, Result};
use crate::model::Metrics;

/// Checkpoint file extension
pub const CHECKPOINT_EXTENSION: &str = "ckpt";

/// `{name}` or `{name:.2f}`
static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{([A-Za-z_][A-Za-z0-9_./-]*)(?::([^}]*))?\}").expect("Invalid placeholder regex")
});

/// `.Nf` precision spec
static PRECISION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\.(\d+)f$").expect("Invalid precision regex"));

/// Contents of a checkpoint file
#[derive(Debug, Serialize)]
pub struct CheckpointPayload<'a> {
    pub epoch: usize,
    pub global_step: usize,
    pub metrics: &'a Metrics,
    pub hyper_parameters: BTreeMap<String, serde_json::Value>,
    pub state_dict: serde_json::Value,
}

/// Keeps the `save_top_k` best checkpoints by a monitored metric
///
/// Evaluated after every validation pass. While fewer than `save_top_k`
/// checkpoints exist every validation result is saved; afterwards a result
/// is saved only when it is strictly better than the current worst, which
/// is then deleted. NaN scores rank as the worst possible value.
#[derive(Clone, Debug)]
pub struct ModelCheckpoint {
    dirpath: PathBuf,
    filename: String,
    monitor: String,
    mode: MonitorMode,
    save_top_k: usize,
    best_k_models: BTreeMap<PathBuf, f64>,
    best_model_path: Option<PathBuf>,
    best_model_score: Option<f64>,
}

impl ModelCheckpoint {
    /// Checkpoint into `dirpath`, keeping the best by minimum `val_loss`.
    pub fn new(dirpath: impl Into<PathBuf>) -> Self {
        Self {
            dirpath: dirpath.into(),
            filename: "{epoch}-{step}".to_string(),
            monitor: "val_loss".to_string(),
            mode: MonitorMode::Min,
            save_top_k: 1,
            best_k_models: BTreeMap::new(),
            best_model_path: None,
            best_model_score: None,
        }
    }

    /// Metric to rank checkpoints by.
    pub fn with_monitor(mut self, monitor: impl Into<String>, mode: MonitorMode) -> Self {
        self.monitor = monitor.into();
        self.mode = mode;
        self
    }

    /// Number of checkpoints to keep; 0 disables saving.
    pub fn with_save_top_k(mut self, k: usize) -> Self {
        self.save_top_k = k;
        self
    }

    /// Filename template without extension, e.g. `{epoch}-{step}-{val_loss:.2f}`.
    pub fn with_filename(mut self, template: impl Into<String>) -> Self {
        self.filename = template.into();
        self
    }

    pub fn dirpath(&self) -> &Path {
        &self.dirpath
    }

    /// Retained checkpoints and their scores.
    pub fn best_k_models(&self) -> &BTreeMap<PathBuf, f64> {
        &self.best_k_models
    }

    pub fn best_model_path(&self) -> Option<&Path> {
        self.best_model_path.as_deref()
    }

    pub fn best_model_score(&self) -> Option<f64> {
        self.best_model_score
    }

    /// Render the filename template, e.g. `epoch=3-step=120-val_loss=0.46`.
    pub fn format_checkpoint_name(&self, epoch: usize, step: usize, metrics: &Metrics) -> Result<String> {
        let mut missing = None;
        let name = PLACEHOLDER.replace_all(&self.filename, |caps: &regex::Captures<'_>| {
            let key = &caps[1];
            let spec = caps.get(2).map(|m| m.as_str());
            let value = match key {
                "epoch" => Some(epoch.to_string()),
                "step" => Some(step.to_string()),
                _ => metrics.get(key).map(|&v| format_value(v, spec)),
            };
            match value {
                Some(v) => format!("{key}={v}"),
                None => {
                    missing.get_or_insert_with(|| key.to_string());
                    String::new()
                }
            }
        });
        match missing {
            Some(key) => Err(Error::training(format!(
                "checkpoint filename '{}' references metric '{key}' which was not logged",
                self.filename
            ))),
            None => Ok(name.into_owned()),
        }
    }

    /// First free `<name>[-vN].ckpt` in the checkpoint directory.
    fn unique_path(&self, name: &str) -> PathBuf {
        let mut path = self.dirpath.join(format!("{name}.{CHECKPOINT_EXTENSION}"));
        let mut version = 1;
        while path.exists() || self.best_k_models.contains_key(&path) {
            path = self
                .dirpath
                .join(format!("{name}-v{version}.{CHECKPOINT_EXTENSION}"));
            version += 1;
        }
        path
    }

    /// Retained checkpoint with the worst score.
    fn worst(&self) -> Option<(&PathBuf, f64)> {
        let rank = |v: f64| self.mode.rank_value(v);
        self.best_k_models
            .iter()
            .map(|(p, &v)| (p, v))
            .reduce(|a, b| {
                if self.mode.improves(rank(a.1), rank(b.1), 0.0) {
                    b
                } else {
                    a
                }
            })
    }

    fn should_save(&self, current: f64) -> bool {
        if self.best_k_models.len() < self.save_top_k {
            return true;
        }
        self.worst().is_some_and(|(_, worst)| {
            self.mode
                .improves(self.mode.rank_value(current), self.mode.rank_value(worst), 0.0)
        })
    }

    fn save(&self, path: &Path, ctx: &CallbackContext, run: &RunHandle<'_>) -> Result<()> {
        fs::create_dir_all(&self.dirpath).map_err(|e| {
            Error::io(format!("creating checkpoint directory {}", self.dirpath.display()), e)
        })?;
        let payload = CheckpointPayload {
            epoch: ctx.epoch,
            global_step: ctx.global_step,
            metrics: &ctx.metrics,
            hyper_parameters: run.model.hyperparameters(),
            state_dict: run.model.state_dict()?,
        };
        let json = serde_json::to_vec(&payload)?;
        fs::write(path, json)
            .map_err(|e| Error::io(format!("writing checkpoint {}", path.display()), e))
    }

    fn update_best(&mut self) {
        let rank = |v: f64| self.mode.rank_value(v);
        let best = self
            .best_k_models
            .iter()
            .map(|(p, &v)| (p, v))
            .reduce(|a, b| if self.mode.improves(rank(b.1), rank(a.1), 0.0) { b } else { a })
            .map(|(p, v)| (p.clone(), v));
        (self.best_model_path, self.best_model_score) = match best {
            Some((p, v)) => (Some(p), Some(v)),
            None => (None, None),
        };
    }
}

fn format_value(value: f64, spec: Option<&str>) -> String {
    let precision = spec
        .and_then(|s| PRECISION.captures(s))
        .and_then(|c| c[1].parse::<usize>().ok());
    match precision {
        Some(p) => format!("{value:.p$}"),
        None => value.to_string(),
    }
}

impl TrainerCallback for ModelCheckpoint {
    fn on_validation_end(&mut self, ctx: &CallbackContext, run: &mut RunHandle<'_>) -> Result<CallbackAction> {
        if self.save_top_k == 0 {
            return Ok(CallbackAction::Continue);
        }
        let current = monitored_value(ctx, &self.monitor, self.name())?;

        if !self.should_save(current) {
            tracing::info!(
                "Epoch {}, global step {}: '{}' was not in top {}",
                ctx.epoch,
                ctx.global_step,
                self.monitor,
                self.save_top_k
            );
            return Ok(CallbackAction::Continue);
        }

        let name = self.format_checkpoint_name(ctx.epoch, ctx.global_step, &ctx.metrics)?;
        let path = self.unique_path(&name);
        self.save(&path, ctx, run)?;

        if self.best_k_models.len() >= self.save_top_k {
            if let Some(worst) = self.worst().map(|(p, _)| p.clone()) {
                self.best_k_models.remove(&worst);
                if worst != path {
                    fs::remove_file(&worst).map_err(|e| {
                        Error::io(format!("removing checkpoint {}", worst.display()), e)
                    })?;
                    tracing::debug!("Removed checkpoint {}", worst.display());
                }
            }
        }
        self.best_k_models.insert(path.clone(), current);
        self.update_best();

        tracing::info!(
            "Epoch {}, global step {}: '{}' reached {:.5} (best {:.5}), saving model to '{}' as top {}",
            ctx.epoch,
            ctx.global_step,
            self.monitor,
            current,
            self.best_model_score.unwrap_or(current),
            path.display(),
            self.save_top_k
        );
        Ok(CallbackAction::Continue)
    }

    fn best_model(&self) -> Option<(&Path, f64)> {
        self.best_model_path().zip(self.best_model_score)
    }

    fn name(&self) -> &'static str {
        "ModelCheckpoint"
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use crate::model::DecathlonModel;
    use crate::train::logger::MemoryLogger;
    use proptest::prelude::*;
    use tempfile::TempDir;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        /// Retained scores are exactly the k lowest seen
        #[test]
        fn retains_k_lowest(
            losses in prop::collection::vec(0.0f64..10.0, 1..12),
            k in 1usize..4,
        ) {
            let dir = TempDir::new().unwrap();
            let mut cb = ModelCheckpoint::new(dir.path()).with_save_top_k(k);
            let model = DecathlonModel::new(0.01, false);
            for (epoch, &loss) in losses.iter().enumerate() {
                let ctx = CallbackContext {
                    epoch,
                    global_step: epoch,
                    metrics: Metrics::from([("val_loss".to_string(), loss)]),
                    ..Default::default()
                };
                let mut logger = MemoryLogger::new();
                cb.on_validation_end(&ctx, &mut RunHandle::new(&mut logger, &model)).unwrap();
            }

            let mut kept: Vec<f64> = cb.best_k_models().values().copied().collect();
            kept.sort_by(f64::total_cmp);
            let mut sorted = losses.clone();
            sorted.sort_by(f64::total_cmp);
            sorted.truncate(k);
            prop_assert_eq!(kept, sorted);
            prop_assert_eq!(fs::read_dir(dir.path()).unwrap().count(), k.min(losses.len()));
        }
    }
}
