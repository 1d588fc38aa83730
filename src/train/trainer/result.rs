//! Training result types

use std::path::PathBuf;

/// Result of a training run
#[derive(Debug, Clone, PartialEq)]
pub struct TrainResult {
    /// Epochs that ran to completion
    pub epochs_completed: usize,
    /// Optimizer steps taken
    pub global_step: usize,
    /// Whether a callback requested the stop
    pub stopped_early: bool,
    /// Best checkpoint written, if any
    pub best_model_path: Option<PathBuf>,
    /// Monitored score of the best checkpoint
    pub best_model_score: Option<f64>,
    /// Total training time in seconds
    pub elapsed_secs: f64,
}
