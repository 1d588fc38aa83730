//! Run identifiers
//!
//! A run id namespaces everything one run writes: the logger directory and
//! the checkpoint directory both end in the same id.

use chrono::{DateTime, Local};
use std::fmt;

/// Timestamp layout of a run id. Millisecond resolution.
pub const RUN_ID_FORMAT: &str = "%Y-%m-%d_%H-%M-%S-%3f";

/// Unique-with-high-probability token identifying one run.
///
/// Two runs started within the same millisecond get the same id; this is
/// accepted and not detected.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RunId(String);

impl RunId {
    /// Build the id for a given instant.
    pub fn from_datetime(at: DateTime<Local>) -> Self {
        Self(at.format(RUN_ID_FORMAT).to_string())
    }

    /// The id as a path component.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<std::path::Path> for RunId {
    fn as_ref(&self) -> &std::path::Path {
        std::path::Path::new(&self.0)
    }
}

/// Generate a run id from the current local time.
pub fn generate_run_id() -> RunId {
    RunId::from_datetime(Local::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn test_run_id_not_empty() {
        assert!(!generate_run_id().as_str().is_empty());
    }

    #[test]
    fn test_run_id_layout() {
        let at = Local
            .with_ymd_and_hms(2024, 3, 9, 7, 5, 1)
            .single()
            .expect("unambiguous local time")
            + Duration::milliseconds(42);
        assert_eq!(RunId::from_datetime(at).as_str(), "2024-03-09_07-05-01-042");
    }

    #[test]
    fn test_run_id_is_a_single_path_component() {
        let id = generate_run_id();
        let path: &std::path::Path = id.as_ref();
        assert_eq!(path.components().count(), 1);
    }
}
