//! Run orchestration
//!
//! Assembles and executes exactly one training run from a resolved
//! [`RunConfig`]. The order is fixed:
//!
//! 1. generate the run id
//! 2. seed every random source
//! 3. set the float32 matmul precision
//! 4. build and set up the data provider
//! 5. build the model
//! 6. build the logger under `<logs_dir>/<run_id>`
//! 7. build the callbacks, checkpoints under `<checkpoint_dirpath>/<run_id>`
//! 8. build the trainer
//! 9. fit
//!
//! Nothing is recovered here. Every collaborator error is returned as is.
//!
//! ```no_run
//! use decathlon_train::config::{load_config, ConfigSource};
//! use decathlon_train::orchestrator::train;
//!
//! let config = load_config(&ConfigSource::default())?;
//! let outcome = train(&config)?;
//! println!("run {} finished after {} epochs", outcome.run_id, outcome.result.epochs_completed);
//! # Ok::<(), decathlon_train::Error>(())
//! ```

use std::path::PathBuf;

use crate::config::RunConfig;
use crate::data::{DataModuleConfig, DataProvider, DecathlonDataModule};
use crate::error::Result;
use crate::model::{DecathlonModel, TrainableModel};
use crate::reproducibility::{
    seed_everything, set_float32_matmul_precision, MatmulPrecision, ReproducibilitySettings,
};
use crate::run_id::{generate_run_id, RunId};
use crate::train::callback::{
    CallbackManager, EarlyStopping, LearningRateMonitor, LoggingInterval, ModelCheckpoint,
    MonitorMode, ProgressCallback,
};
use crate::train::{Logger, RunLogger, TrainResult, Trainer, TrainerConfig};

/// Metric watched by checkpointing and early stopping
pub const MONITOR: &str = "val_loss";
/// Checkpoint filename template
pub const CHECKPOINT_FILENAME: &str = "{epoch}-{step}-{val_loss:.2f}-{val_dice:.2f}";
/// Checkpoints kept per run
pub const SAVE_TOP_K: usize = 2;
/// Non-improving validation checks tolerated before stopping
pub const EARLY_STOPPING_PATIENCE: usize = 10;

/// What a finished run leaves behind
#[derive(Clone, Debug, PartialEq)]
pub struct RunOutcome {
    pub run_id: RunId,
    /// `<logs_dir>/<run_id>`
    pub log_dir: PathBuf,
    /// `<checkpoint_dirpath>/<run_id>`
    pub checkpoint_dir: PathBuf,
    pub result: TrainResult,
}

/// Identifier shared by every artifact of one run.
pub fn generate_run_identifier() -> RunId {
    generate_run_id()
}

/// Seed every random source collaborators consult.
///
/// Data-side randomness is derived from this seed per (epoch, sample), so
/// loader worker threads need no seeding of their own. Call once, before any
/// collaborator is built. First half of [`ReproducibilitySettings::apply`].
pub fn seed_all(seed: u64) {
    seed_everything(seed);
}

/// Process-wide, no rollback. Second half of [`ReproducibilitySettings::apply`].
pub fn configure_numeric_precision(precision: MatmulPrecision) {
    set_float32_matmul_precision(precision);
}

/// Seed and precision settings of a run, applied once before any collaborator is built.
pub fn reproducibility_settings(config: &RunConfig) -> ReproducibilitySettings {
    ReproducibilitySettings::new(config.seed).with_matmul_precision(config.float32_matmul_precision)
}

/// Build the Decathlon data module and prepare its splits.
pub fn build_data_provider(config: &RunConfig) -> Result<DecathlonDataModule> {
    let mut data_config = DataModuleConfig::new(
        &config.root_dir,
        &config.task,
        config.batch_size,
        config.num_workers,
        config.seed,
    );
    data_config.val_fraction = config.val_fraction;
    data_config.patch_size = config.patch_size;

    let mut data = DecathlonDataModule::new(data_config);
    data.setup()?;
    Ok(data)
}

/// Build the model from learning rate and scheduler flag.
///
/// The class count is not taken from the dataset. It is the model default
/// unless the configuration names one explicitly.
pub fn build_model(config: &RunConfig) -> DecathlonModel {
    let model = DecathlonModel::new(config.learning_rate, config.use_scheduler);
    match config.num_classes {
        Some(n) => model.with_num_classes(n),
        None => model,
    }
}

pub fn build_logger(config: &RunConfig, run_id: &RunId) -> RunLogger {
    RunLogger::new(&config.logs_dir, run_id)
}

/// Per-step learning rate logging, early stopping, a per-epoch progress line
/// and checkpointing.
pub fn build_callbacks(config: &RunConfig, run_id: &RunId) -> CallbackManager {
    let mut callbacks = CallbackManager::new();
    callbacks.add(LearningRateMonitor::new(LoggingInterval::Step));
    callbacks.add(
        EarlyStopping::new(MONITOR, MonitorMode::Min, EARLY_STOPPING_PATIENCE)
            .with_min_delta(f64::from(config.min_delta))
            .with_verbose(true),
    );
    callbacks.add(ProgressCallback::default());
    // last, so a checkpoint sees every metric the other hooks logged this step
    callbacks.add(
        ModelCheckpoint::new(config.checkpoint_dirpath.join(run_id))
            .with_monitor(MONITOR, MonitorMode::Min)
            .with_save_top_k(SAVE_TOP_K)
            .with_filename(CHECKPOINT_FILENAME),
    );
    callbacks
}

/// Build the trainer with automatic device selection unless configured.
pub fn build_engine(
    config: &RunConfig,
    logger: Box<dyn Logger>,
    callbacks: CallbackManager,
) -> Result<Trainer> {
    let trainer_config = TrainerConfig {
        max_epochs: config.max_epochs,
        accelerator: config.accelerator,
        devices: config.devices,
        log_every_n_steps: config.log_every_n_steps,
        num_sanity_val_steps: config.num_sanity_val_steps,
    };
    Ok(Trainer::new(trainer_config, logger)?.with_callbacks(callbacks))
}

/// Fit until `max_epochs` or an early stop.
pub fn run(
    trainer: &mut Trainer,
    model: &mut dyn TrainableModel,
    data: &dyn DataProvider,
) -> Result<TrainResult> {
    trainer.fit(model, data)
}

/// Orchestrate one complete run.
pub fn train(config: &RunConfig) -> Result<RunOutcome> {
    let run_id = generate_run_identifier();
    tracing::info!("Run id: {run_id}");

    // seeds first, then sets the precision
    reproducibility_settings(config).apply();

    let data = build_data_provider(config)?;
    let mut model = build_model(config);

    let logger = build_logger(config, &run_id);
    let log_dir = config.logs_dir.join(&run_id);
    let callbacks = build_callbacks(config, &run_id);
    let checkpoint_dir = config.checkpoint_dirpath.join(&run_id);

    let mut trainer = build_engine(config, Box::new(logger), callbacks)?;
    let result = run(&mut trainer, &mut model, &data)?;

    if let Some(path) = &result.best_model_path {
        tracing::info!("Best checkpoint: {}", path.display());
    }
    Ok(RunOutcome {
        run_id,
        log_dir,
        checkpoint_dir,
        result,
    })
}
