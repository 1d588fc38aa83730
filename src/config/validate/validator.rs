//! Configuration validation logic

use super::error::ValidationError;
use crate::config::schema::RunConfig;
use crate::data::DecathlonTask;

/// Validate a run configuration
///
/// Checks:
/// - Numeric values are in valid ranges
/// - The task names one of the Decathlon tasks
pub fn validate_config(config: &RunConfig) -> Result<(), ValidationError> {
    if config.batch_size == 0 {
        return Err(ValidationError::InvalidBatchSize(config.batch_size));
    }

    // NaN fails both comparisons, so test for the valid range instead
    if !(config.learning_rate > 0.0 && config.learning_rate <= 1.0) {
        return Err(ValidationError::InvalidLearningRate(config.learning_rate));
    }

    if config.max_epochs == 0 {
        return Err(ValidationError::InvalidEpochs(config.max_epochs));
    }

    if !(config.val_fraction > 0.0 && config.val_fraction < 1.0) {
        return Err(ValidationError::InvalidValFraction(config.val_fraction));
    }

    if config.patch_size == 0 {
        return Err(ValidationError::InvalidPatchSize(config.patch_size));
    }

    if config.log_every_n_steps == 0 {
        return Err(ValidationError::InvalidLogInterval(config.log_every_n_steps));
    }

    if config.min_delta < 0.0 || config.min_delta.is_nan() {
        return Err(ValidationError::InvalidMinDelta(config.min_delta));
    }

    if let Some(n) = config.num_classes {
        if n < 2 {
            return Err(ValidationError::InvalidNumClasses(n));
        }
    }

    if config.task.parse::<DecathlonTask>().is_err() {
        return Err(ValidationError::UnknownTask(config.task.clone()));
    }

    Ok(())
}
