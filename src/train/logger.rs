//! Run loggers
//!
//! [`RunLogger`] writes one directory per run:
//!
//! ```text
//! <logs_dir>/<run_id>/
//!   hparams.yaml    hyperparameters
//!   metrics.jsonl   one {"step": S, <name>: value, …} object per call,
//!                   non-finite values as "NaN", "inf" or "-inf"
//!   status          success | failed
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::model::Metrics;
use crate::run_id::RunId;

pub const HPARAMS_FILE: &str = "hparams.yaml";
pub const METRICS_FILE: &str = "metrics.jsonl";
pub const STATUS_FILE: &str = "status";

/// Terminal state of a run
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunStatus {
    Success,
    Failed,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Success => "success",
            Self::Failed => "failed",
        })
    }
}

/// Sink for hyperparameters and metrics
pub trait Logger {
    /// Directory the logger writes to, if any.
    fn log_dir(&self) -> Option<&Path> {
        None
    }

    /// Record hyperparameters once per run.
    fn log_hyperparams(&mut self, params: &BTreeMap<String, serde_json::Value>) -> Result<()>;

    /// Record metrics at `step`.
    fn log_metrics(&mut self, metrics: &Metrics, step: usize) -> Result<()>;

    /// Flush and record the final status.
    fn finalize(&mut self, status: RunStatus) -> Result<()>;
}

/// File-backed logger under `<logs_dir>/<run_id>/`
pub struct RunLogger {
    dir: PathBuf,
    metrics: Option<BufWriter<File>>,
}

impl RunLogger {
    /// Logger for `run_id` below `logs_dir`. Nothing is written until the first call.
    pub fn new(logs_dir: impl AsRef<Path>, run_id: &RunId) -> Self {
        Self {
            dir: logs_dir.as_ref().join(run_id),
            metrics: None,
        }
    }

    fn ensure_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .map_err(|e| Error::io(format!("creating log directory {}", self.dir.display()), e))
    }

    fn metrics_writer(&mut self) -> Result<&mut BufWriter<File>> {
        if self.metrics.is_none() {
            self.ensure_dir()?;
            let path = self.dir.join(METRICS_FILE);
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .map_err(|e| Error::io(format!("opening {}", path.display()), e))?;
            self.metrics = Some(BufWriter::new(file));
        }
        self.metrics
            .as_mut()
            .ok_or_else(|| Error::training("metrics writer unavailable"))
    }
}

impl Logger for RunLogger {
    fn log_dir(&self) -> Option<&Path> {
        Some(&self.dir)
    }

    fn log_hyperparams(&mut self, params: &BTreeMap<String, serde_json::Value>) -> Result<()> {
        self.ensure_dir()?;
        let path = self.dir.join(HPARAMS_FILE);
        let yaml = serde_yaml::to_string(params)?;
        fs::write(&path, yaml).map_err(|e| Error::io(format!("writing {}", path.display()), e))
    }

    fn log_metrics(&mut self, metrics: &Metrics, step: usize) -> Result<()> {
        let mut record = serde_json::Map::new();
        record.insert("step".into(), step.into());
        for (name, value) in metrics {
            record.insert(name.clone(), metric_value(*value));
        }
        let line = serde_json::to_string(&record)?;
        let writer = self.metrics_writer()?;
        writeln!(writer, "{line}").map_err(|e| Error::io("writing metrics", e))
    }

    fn finalize(&mut self, status: RunStatus) -> Result<()> {
        if let Some(mut writer) = self.metrics.take() {
            writer.flush().map_err(|e| Error::io("flushing metrics", e))?;
        }
        self.ensure_dir()?;
        let path = self.dir.join(STATUS_FILE);
        fs::write(&path, format!("{status}\n"))
            .map_err(|e| Error::io(format!("writing {}", path.display()), e))
    }
}

/// JSON has no NaN or infinity, so those are written as strings.
fn metric_value(value: f64) -> serde_json::Value {
    if value.is_nan() {
        "NaN".into()
    } else if value.is_infinite() {
        if value > 0.0 { "inf" } else { "-inf" }.into()
    } else {
        value.into()
    }
}

/// Logger that keeps everything in memory
#[derive(Clone, Debug, Default)]
pub struct MemoryLogger {
    pub hyperparams: BTreeMap<String, serde_json::Value>,
    pub metrics: Vec<(usize, Metrics)>,
    pub status: Option<RunStatus>,
}

impl MemoryLogger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every value logged for `name`, with its step.
    pub fn series(&self, name: &str) -> Vec<(usize, f64)> {
        self.metrics
            .iter()
            .filter_map(|(step, m)| m.get(name).map(|&v| (*step, v)))
            .collect()
    }
}

impl Logger for MemoryLogger {
    fn log_hyperparams(&mut self, params: &BTreeMap<String, serde_json::Value>) -> Result<()> {
        self.hyperparams = params.clone();
        Ok(())
    }

    fn log_metrics(&mut self, metrics: &Metrics, step: usize) -> Result<()> {
        self.metrics.push((step, metrics.clone()));
        Ok(())
    }

    fn finalize(&mut self, status: RunStatus) -> Result<()> {
        self.status = Some(status);
        Ok(())
    }
}
