//! decathlon-train CLI
//!
//! Resolves a layered run configuration and trains one segmentation model
//! on a Medical Segmentation Decathlon task.
//!
//! # Usage
//!
//! ```bash
//! # Train from conf/config.yaml
//! decathlon-train train
//!
//! # Train with overrides
//! decathlon-train train max_epochs=5 learning_rate=0.0003 task=Task04_Hippocampus
//!
//! # Validate config
//! decathlon-train validate --detailed
//!
//! # Show the resolved config
//! decathlon-train info --format json
//!
//! # Write a synthetic task for a smoke run
//! decathlon-train demo data --task Task09_Spleen
//! ```

use clap::Parser;
use decathlon_train::cli::{init_logging, run_command, Cli, LogLevel};
use std::process::ExitCode;

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(LogLevel::from_flags(cli.verbose, cli.quiet));

    match run_command(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error [{}]: {e}", e.code());
            ExitCode::FAILURE
        }
    }
}
