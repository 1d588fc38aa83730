//! Configuration validation
//!
//! Checks a resolved run configuration for out-of-range values before any
//! collaborator is built. Filesystem paths are left to the data provider.

mod error;
mod validator;

#[cfg(test)]
mod proptests;

pub use error::ValidationError;
pub use validator::validate_config;
