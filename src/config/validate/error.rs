//! Validation error types

/// Validation error type
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("Invalid batch_size: {0} (must be > 0)")]
    InvalidBatchSize(usize),

    #[error("Invalid learning_rate: {0} (must be > 0.0 and <= 1.0)")]
    InvalidLearningRate(f32),

    #[error("Invalid max_epochs: {0} (must be > 0)")]
    InvalidEpochs(usize),

    #[error("Invalid val_fraction: {0} (must be in (0.0, 1.0))")]
    InvalidValFraction(f32),

    #[error("Invalid patch_size: {0} (must be > 0)")]
    InvalidPatchSize(usize),

    #[error("Invalid log_every_n_steps: {0} (must be > 0)")]
    InvalidLogInterval(usize),

    #[error("Invalid min_delta: {0} (must be >= 0.0)")]
    InvalidMinDelta(f32),

    #[error("Invalid num_classes: {0} (must be >= 2)")]
    InvalidNumClasses(usize),

    #[error("Unknown task: '{0}' (expected a Decathlon task such as Task09_Spleen or spleen)")]
    UnknownTask(String),
}
