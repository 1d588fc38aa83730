//! Property-based tests for configuration validation

use super::error::ValidationError;
use super::validator::validate_config;
use crate::config::schema::RunConfig;
use proptest::prelude::*;

const TASKS: [&str; 4] = ["Task09_Spleen", "Task04_Hippocampus", "liver", "PROSTATE"];

fn arb_valid_config() -> impl Strategy<Value = RunConfig> {
    (
        1usize..64,       // batch_size
        1e-6f32..1.0,     // learning_rate
        1usize..500,      // max_epochs
        0.01f32..0.99,    // val_fraction
        1usize..128,      // patch_size
        0f32..1.0,        // min_delta
        0usize..TASKS.len(),
    )
        .prop_map(
            |(batch_size, learning_rate, max_epochs, val_fraction, patch_size, min_delta, task)| {
                let mut config = RunConfig::new("/data", TASKS[task]);
                config.batch_size = batch_size;
                config.learning_rate = learning_rate;
                config.max_epochs = max_epochs;
                config.val_fraction = val_fraction;
                config.patch_size = patch_size;
                config.min_delta = min_delta;
                config
            },
        )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn prop_valid_config_passes(config in arb_valid_config()) {
        prop_assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn prop_learning_rate_above_one_fails(
        config in arb_valid_config(),
        lr in 1.0001f32..100.0,
    ) {
        let mut config = config;
        config.learning_rate = lr;
        prop_assert!(matches!(
            validate_config(&config),
            Err(ValidationError::InvalidLearningRate(_))
        ));
    }

    #[test]
    fn prop_val_fraction_outside_unit_interval_fails(
        config in arb_valid_config(),
        fraction in prop_oneof![-10.0f32..=0.0, 1.0f32..10.0],
    ) {
        let mut config = config;
        config.val_fraction = fraction;
        prop_assert!(matches!(
            validate_config(&config),
            Err(ValidationError::InvalidValFraction(_))
        ));
    }
}
