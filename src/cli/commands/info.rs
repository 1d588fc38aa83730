//! Info command implementation

use crate::cli::logging::log;
use crate::cli::LogLevel;
use crate::config::{load_config, InfoArgs, OutputFormat, RunConfig};
use crate::error::Result;

/// Render a resolved configuration in the requested format
pub fn render_config(config: &RunConfig, format: OutputFormat) -> Result<String> {
    Ok(match format {
        OutputFormat::Yaml => serde_yaml::to_string(config)?,
        OutputFormat::Json => serde_json::to_string_pretty(config)?,
    })
}

pub fn run_info(args: InfoArgs, level: LogLevel) -> Result<()> {
    let source = args.config.source();
    let config = load_config(&source)?;

    log(
        level,
        LogLevel::Verbose,
        &format!("# resolved from {}", source.primary_path().display()),
    );
    println!("{}", render_config(&config, args.format)?);
    Ok(())
}
