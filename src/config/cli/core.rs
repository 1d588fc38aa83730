//! Core CLI types - Cli, Command, and argument structs

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use super::types::OutputFormat;
use crate::config::loader::ConfigSource;

/// Decathlon segmentation training runner
#[derive(Parser, Debug, Clone, PartialEq)]
#[command(name = "decathlon-train")]
#[command(version)]
#[command(about = "Configure and launch segmentation training on Medical Segmentation Decathlon tasks")]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

/// Available commands
#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Resolve the configuration and run one training job
    Train(TrainArgs),

    /// Resolve and validate the configuration without training
    Validate(ValidateArgs),

    /// Print the fully resolved configuration
    Info(InfoArgs),

    /// Write a small synthetic Decathlon task for smoke runs
    Demo(DemoArgs),
}

/// Configuration selection shared by every config-consuming command
#[derive(Args, Debug, Clone, PartialEq)]
pub struct ConfigArgs {
    /// Directory holding the primary config and its defaults
    #[arg(long, default_value = "conf")]
    pub config_dir: PathBuf,

    /// Primary config file name, without the .yaml extension
    #[arg(long, default_value = "config")]
    pub config_name: String,

    /// Overrides: key=value, +key=value, ++key=value or ~key
    #[arg(value_name = "OVERRIDE")]
    pub overrides: Vec<String>,
}

impl ConfigArgs {
    /// Configuration source described by these arguments.
    pub fn source(&self) -> ConfigSource {
        ConfigSource {
            config_dir: self.config_dir.clone(),
            config_name: self.config_name.clone(),
            overrides: self.overrides.clone(),
        }
    }
}

/// Arguments for the train command
#[derive(Parser, Debug, Clone, PartialEq)]
pub struct TrainArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Dry run (resolve and validate config but don't train)
    #[arg(long)]
    pub dry_run: bool,
}

/// Arguments for the validate command
#[derive(Parser, Debug, Clone, PartialEq)]
pub struct ValidateArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Show the resolved values alongside the verdict
    #[arg(short, long)]
    pub detailed: bool,
}

/// Arguments for the info command
#[derive(Parser, Debug, Clone, PartialEq)]
pub struct InfoArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Output format (yaml, json)
    #[arg(short, long, default_value = "yaml")]
    pub format: OutputFormat,
}

/// Arguments for the demo command
#[derive(Parser, Debug, Clone, PartialEq)]
pub struct DemoArgs {
    /// Root directory to write the task folder into
    #[arg(value_name = "DIR")]
    pub root_dir: PathBuf,

    /// Task to imitate
    #[arg(long, default_value = "Task09_Spleen")]
    pub task: String,

    /// Number of labelled cases
    #[arg(long, default_value_t = 8)]
    pub cases: usize,

    /// Edge length of each cubic volume
    #[arg(long, default_value_t = 24)]
    pub size: usize,

    /// Seed for the synthetic volumes
    #[arg(long, default_value_t = 0)]
    pub seed: u64,
}

/// Parse CLI arguments from a string slice (for testing)
pub fn parse_args<I, T>(args: I) -> Result<Cli, clap::Error>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    Cli::try_parse_from(args)
}
