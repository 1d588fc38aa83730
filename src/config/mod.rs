//! Configuration: CLI types, layered YAML resolution and validation
//!
//! ```no_run
//! use decathlon_train::config::{load_config, ConfigSource};
//!
//! let source = ConfigSource::new("conf", "config").with_overrides(["max_epochs=5"]);
//! let config = load_config(&source)?;
//! # Ok::<(), decathlon_train::Error>(())
//! ```

pub mod cli;
pub mod interpolate;
pub mod loader;
pub mod overrides;
mod schema;
mod validate;

pub use cli::{
    parse_args, Cli, Command, ConfigArgs, DemoArgs, InfoArgs, OutputFormat, TrainArgs,
    ValidateArgs,
};
pub use loader::{compose, config_from_value, load_config, load_config_file, resolve, ConfigSource};
pub use overrides::{apply_overrides, Override};
pub use schema::RunConfig;
pub use validate::{validate_config, ValidationError};
