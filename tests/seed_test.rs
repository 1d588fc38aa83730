//! Global seeding. Kept in its own test binary because the seed is process-wide.

mod common;

use decathlon_train::data::{Batch, DataProvider, DecathlonTask};
use decathlon_train::model::TrainableModel;
use decathlon_train::orchestrator::{
    build_data_provider, build_model, reproducibility_settings, seed_all,
};
use decathlon_train::reproducibility::{float32_matmul_precision, global_seed, MatmulPrecision};
use tempfile::TempDir;

fn first_batch(provider: &dyn DataProvider) -> Batch {
    provider
        .train_batches(0)
        .expect("train batches")
        .next()
        .expect("at least one batch")
        .expect("batch")
}

fn initial_state(config: &decathlon_train::config::RunConfig, batch: &Batch, seed: u64) -> serde_json::Value {
    seed_all(seed);
    let mut model = build_model(config);
    model.configure_optimizers(config.max_epochs).expect("optimizer");
    model.training_step(batch, 0).expect("step");
    model.state_dict().expect("state")
}

#[test]
fn test_seeded_runs_start_from_identical_parameters() {
    let dir = TempDir::new().expect("temp dir");
    let config = common::synthetic_config(dir.path(), DecathlonTask::Spleen, 4);
    let data = build_data_provider(&config).expect("data");
    let batch = first_batch(&data);

    let a = initial_state(&config, &batch, 7);
    assert_eq!(global_seed(), Some(7));
    let b = initial_state(&config, &batch, 7);
    assert_eq!(a, b);

    let c = initial_state(&config, &batch, 8);
    assert_eq!(global_seed(), Some(8));
    assert_ne!(a, c);

    // run settings seed and set the precision in one go
    let mut config = config;
    config.seed = 7;
    config.float32_matmul_precision = MatmulPrecision::Medium;
    reproducibility_settings(&config).apply();
    assert_eq!(global_seed(), Some(7));
    assert_eq!(float32_matmul_precision(), MatmulPrecision::Medium);

    config.float32_matmul_precision = MatmulPrecision::High;
    reproducibility_settings(&config).apply();
    assert_eq!(float32_matmul_precision(), MatmulPrecision::High);
    assert_eq!(initial_state(&config, &batch, 7), a);
}
