//! Train command implementation

use crate::cli::logging::log;
use crate::cli::LogLevel;
use crate::config::{load_config, TrainArgs};
use crate::error::Result;
use crate::orchestrator;

pub fn run_train(args: TrainArgs, level: LogLevel) -> Result<()> {
    let source = args.config.source();
    log(
        level,
        LogLevel::Normal,
        &format!("decathlon-train: training from {}", source.primary_path().display()),
    );

    let config = load_config(&source)?;

    if args.dry_run {
        log(level, LogLevel::Normal, "Dry run - config validated successfully");
        log(level, LogLevel::Verbose, &format!("  Task: {}", config.task));
        log(
            level,
            LogLevel::Verbose,
            &format!(
                "  Learning rate: {} (scheduler: {})",
                config.learning_rate, config.use_scheduler
            ),
        );
        log(level, LogLevel::Verbose, &format!("  Epochs: {}", config.max_epochs));
        log(level, LogLevel::Verbose, &format!("  Batch size: {}", config.batch_size));
        return Ok(());
    }

    let outcome = orchestrator::train(&config)?;
    let result = &outcome.result;

    log(level, LogLevel::Normal, "Training complete!");
    log(
        level,
        LogLevel::Normal,
        &format!(
            "  Epochs: {}{}",
            result.epochs_completed,
            if result.stopped_early { " (stopped early)" } else { "" }
        ),
    );
    log(level, LogLevel::Normal, &format!("  Logs: {}", outcome.log_dir.display()));
    if let (Some(path), Some(score)) = (&result.best_model_path, result.best_model_score) {
        log(
            level,
            LogLevel::Normal,
            &format!("  Best checkpoint: {} (val_loss={score:.4})", path.display()),
        );
    }
    log(
        level,
        LogLevel::Verbose,
        &format!("  Steps: {} in {:.1}s", result.global_step, result.elapsed_secs),
    );
    Ok(())
}
