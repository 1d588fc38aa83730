//! Error types with actionable diagnostics.
//!
//! Every failure a run can hit is surfaced through [`Error`]. The
//! orchestrator never recovers locally: errors travel unchanged to the
//! process boundary, where `main` prints them together with [`Error::code`].

use std::path::PathBuf;
use thiserror::Error;

use crate::config::ValidationError;
use crate::data::nifti::NiftiError;

/// Result type alias for decathlon-train operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while resolving, assembling or executing a run.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration file not found at the expected path.
    #[error("Configuration file not found: {path}\n  → Pass --config-dir/--config-name or create the file")]
    ConfigNotFound { path: PathBuf },

    /// Configuration could not be parsed or resolved.
    #[error("Invalid configuration: {message}")]
    Config { message: String },

    /// A configuration value failed validation.
    #[error("Invalid configuration value: {0}\n  → Fix the key in the config file or pass an override like key=value")]
    Validation(#[from] ValidationError),

    /// The data provider could not prepare its splits.
    #[error("Data preparation failed: {message}\n  → Check root_dir and task in the configuration")]
    DataPreparation { message: String },

    /// No usable compute device.
    #[error("Device unavailable: {message}\n  → Use accelerator=auto or accelerator=cpu")]
    Device { message: String },

    /// Failure inside the fit loop.
    #[error("Training failed: {message}")]
    Training { message: String },

    /// Volume decoding failed.
    #[error("Failed to read volume {path}: {source}")]
    Nifti {
        path: PathBuf,
        #[source]
        source: NiftiError,
    },

    /// IO error with context.
    #[error("IO error: {context}\n  Cause: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// Serialization/deserialization error.
    #[error("Serialization error: {message}")]
    Serialization { message: String },
}

impl Error {
    /// Create an IO error with context.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a data preparation error.
    pub fn data(message: impl Into<String>) -> Self {
        Self::DataPreparation {
            message: message.into(),
        }
    }

    /// Create a device error.
    pub fn device(message: impl Into<String>) -> Self {
        Self::Device {
            message: message.into(),
        }
    }

    /// Create a training error.
    pub fn training(message: impl Into<String>) -> Self {
        Self::Training {
            message: message.into(),
        }
    }

    /// Check if this error was caused by user input rather than a runtime failure.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            Self::ConfigNotFound { .. }
                | Self::Config { .. }
                | Self::Validation(_)
                | Self::DataPreparation { .. }
                | Self::Device { .. }
        )
    }

    /// Get the error code for structured output.
    pub fn code(&self) -> &'static str {
        match self {
            Self::ConfigNotFound { .. } => "E001",
            Self::Config { .. } => "E002",
            Self::Validation(_) => "E003",
            Self::DataPreparation { .. } => "E010",
            Self::Nifti { .. } => "E011",
            Self::Device { .. } => "E020",
            Self::Training { .. } => "E030",
            Self::Io { .. } => "E050",
            Self::Serialization { .. } => "E051",
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization {
            message: e.to_string(),
        }
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Self::Serialization {
            message: e.to_string(),
        }
    }
}
