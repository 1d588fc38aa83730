//! CLI argument parsing
//!
//! # Usage
//!
//! ```bash
//! decathlon-train train
//! decathlon-train train --config-dir conf max_epochs=5 +num_classes=3
//! decathlon-train validate task=spleen
//! decathlon-train info --format json
//! decathlon-train demo ./data --task Task09_Spleen --cases 6
//! ```

mod core;
mod types;

pub use core::{
    parse_args, Cli, Command, ConfigArgs, DemoArgs, InfoArgs, TrainArgs, ValidateArgs,
};
pub use types::OutputFormat;
