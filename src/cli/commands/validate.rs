//! Validate command implementation

use crate::cli::logging::log;
use crate::cli::LogLevel;
use crate::config::{load_config, RunConfig, ValidateArgs};
use crate::error::Result;

/// Format the data settings as a string
pub fn format_data_info(config: &RunConfig) -> String {
    [
        format!("  Root dir: {}", config.root_dir.display()),
        format!("  Task: {}", config.task),
        format!("  Batch size: {}", config.batch_size),
        format!("  Workers: {}", config.num_workers),
        format!("  Validation fraction: {}", config.val_fraction),
        format!("  Patch size: {}", config.patch_size),
    ]
    .join("\n")
}

/// Format the optimisation settings as a string
pub fn format_model_info(config: &RunConfig) -> String {
    let mut lines = vec![
        format!("  Learning rate: {}", config.learning_rate),
        format!(
            "  Schedule: {}",
            if config.use_scheduler { "cosine" } else { "constant" }
        ),
    ];
    if let Some(n) = config.num_classes {
        lines.push(format!("  Classes: {n}"));
    }
    lines.join("\n")
}

/// Format the trainer settings as a string
pub fn format_training_info(config: &RunConfig) -> String {
    let mut lines = vec![
        format!("  Epochs: {}", config.max_epochs),
        format!("  Seed: {}", config.seed),
        format!("  Accelerator: {} (devices: {})", config.accelerator, config.devices),
        format!("  Matmul precision: {}", config.float32_matmul_precision),
    ];
    if config.min_delta > 0.0 {
        lines.push(format!("  Early stopping min delta: {}", config.min_delta));
    }
    lines.push(format!("  Logs dir: {}", config.logs_dir.display()));
    lines.push(format!(
        "  Checkpoint dir: {}",
        config.checkpoint_dirpath.display()
    ));
    lines.join("\n")
}

/// Print detailed configuration summary
pub fn print_detailed_summary(config: &RunConfig) {
    println!();
    println!("Configuration Summary:");
    println!("{}", format_data_info(config));
    println!();
    println!("{}", format_model_info(config));
    println!();
    println!("{}", format_training_info(config));
}

pub fn run_validate(args: ValidateArgs, level: LogLevel) -> Result<()> {
    let source = args.config.source();
    log(
        level,
        LogLevel::Normal,
        &format!("Validating config: {}", source.primary_path().display()),
    );

    let config = load_config(&source)?;

    log(level, LogLevel::Normal, "Configuration is valid");

    if args.detailed {
        print_detailed_summary(&config);
    }

    Ok(())
}
