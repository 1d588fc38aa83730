//! Monitored-metric helpers shared by checkpointing and early stopping

use std::fmt;
use std::str::FromStr;

use super::traits::CallbackContext;
use crate::error::{Error, Result};

/// Whether lower or higher values of the monitored metric are better
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum MonitorMode {
    #[default]
    Min,
    Max,
}

impl MonitorMode {
    /// The worst possible score, used before any value is seen and for NaN.
    pub fn worst(self) -> f64 {
        match self {
            Self::Min => f64::INFINITY,
            Self::Max => f64::NEG_INFINITY,
        }
    }

    /// Whether `current` beats `reference` by more than `|min_delta|`.
    pub fn improves(self, current: f64, reference: f64, min_delta: f64) -> bool {
        let delta = min_delta.abs();
        match self {
            Self::Min => current < reference - delta,
            Self::Max => current > reference + delta,
        }
    }

    /// Map NaN to the worst score so it ranks last.
    pub fn rank_value(self, value: f64) -> f64 {
        if value.is_nan() {
            self.worst()
        } else {
            value
        }
    }
}

impl fmt::Display for MonitorMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Min => "min",
            Self::Max => "max",
        })
    }
}

impl FromStr for MonitorMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "min" => Ok(Self::Min),
            "max" => Ok(Self::Max),
            other => Err(format!("mode must be 'min' or 'max', got '{other}'")),
        }
    }
}

/// Value of `monitor` in the logged metrics.
pub(crate) fn monitored_value(ctx: &CallbackContext, monitor: &str, callback: &str) -> Result<f64> {
    ctx.metrics.get(monitor).copied().ok_or_else(|| {
        let available: Vec<&str> = ctx.metrics.keys().map(String::as_str).collect();
        Error::training(format!(
            "{callback} could not find the monitored metric '{monitor}'; available metrics: [{}]",
            available.join(", ")
        ))
    })
}
