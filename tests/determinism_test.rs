//! Batch order depends only on the seed, never on the worker count

mod common;

use decathlon_train::data::{Batch, DataProvider, DecathlonTask};
use decathlon_train::orchestrator::build_data_provider;
use tempfile::TempDir;

fn train_epochs(provider: &dyn DataProvider, epochs: usize) -> Vec<Batch> {
    (0..epochs)
        .flat_map(|epoch| {
            provider
                .train_batches(epoch)
                .expect("train batches")
                .map(|b| b.expect("batch"))
                .collect::<Vec<_>>()
        })
        .collect()
}

fn val_pass(provider: &dyn DataProvider) -> Vec<Batch> {
    provider
        .val_batches()
        .expect("val batches")
        .map(|b| b.expect("batch"))
        .collect()
}

#[test]
fn test_same_seed_same_batches() {
    let dir = TempDir::new().expect("temp dir");
    let config = common::synthetic_config(dir.path(), DecathlonTask::Spleen, 8);

    let first = build_data_provider(&config).expect("data");
    let second = build_data_provider(&config).expect("data");

    assert_eq!(first.train_cases(), second.train_cases());
    assert_eq!(first.val_cases(), second.val_cases());
    assert_eq!(train_epochs(&first, 3), train_epochs(&second, 3));
    assert_eq!(val_pass(&first), val_pass(&second));
}

#[test]
fn test_worker_count_does_not_change_batches() {
    let dir = TempDir::new().expect("temp dir");
    let mut config = common::synthetic_config(dir.path(), DecathlonTask::Spleen, 8);

    config.num_workers = 0;
    let inline = build_data_provider(&config).expect("data");
    let expected = train_epochs(&inline, 2);
    let expected_val = val_pass(&inline);

    for workers in [1, 3, 8] {
        config.num_workers = workers;
        let threaded = build_data_provider(&config).expect("data");
        assert_eq!(train_epochs(&threaded, 2), expected, "num_workers={workers}");
        assert_eq!(val_pass(&threaded), expected_val, "num_workers={workers}");
    }
}

#[test]
fn test_epochs_are_reshuffled() {
    let dir = TempDir::new().expect("temp dir");
    let mut config = common::synthetic_config(dir.path(), DecathlonTask::Spleen, 12);
    config.batch_size = 1;
    let data = build_data_provider(&config).expect("data");

    let orders: Vec<Vec<usize>> = (0..6).map(|e| data.train_order(e)).collect();
    assert!(orders.windows(2).any(|w| w[0] != w[1]));
    for order in &orders {
        let mut sorted = order.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, (0..data.train_cases().len()).collect::<Vec<_>>());
    }
}

#[test]
fn test_seed_changes_order() {
    let dir = TempDir::new().expect("temp dir");
    let mut config = common::synthetic_config(dir.path(), DecathlonTask::Spleen, 12);

    let orders: Vec<Vec<String>> = (0..5)
        .map(|seed| {
            config.seed = seed;
            let data = build_data_provider(&config).expect("data");
            let order = data.train_order(0);
            order
                .into_iter()
                .map(|i| data.train_cases()[i].id.clone())
                .collect()
        })
        .collect();
    assert!(orders.windows(2).any(|w| w[0] != w[1]));
}
