//! Accelerator and device selection

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Requested accelerator family.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Accelerator {
    /// Prefer accelerated hardware, fall back to CPU
    #[default]
    Auto,
    /// Host CPU
    Cpu,
    /// Any GPU
    Gpu,
}

impl fmt::Display for Accelerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Auto => "auto",
            Self::Cpu => "cpu",
            Self::Gpu => "gpu",
        };
        f.write_str(s)
    }
}

/// Requested number of devices.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Devices {
    /// One device of the selected accelerator
    #[default]
    Auto,
    /// Exactly `n` devices
    Count(usize),
}

impl fmt::Display for Devices {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto => f.write_str("auto"),
            Self::Count(n) => write!(f, "{n}"),
        }
    }
}

impl FromStr for Devices {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("auto") {
            return Ok(Self::Auto);
        }
        s.parse::<usize>()
            .map(Self::Count)
            .map_err(|_| format!("devices must be 'auto' or a positive integer, got '{s}'"))
    }
}

impl Serialize for Devices {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Self::Auto => serializer.serialize_str("auto"),
            Self::Count(n) => serializer.serialize_u64(*n as u64),
        }
    }
}

impl<'de> Deserialize<'de> for Devices {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum CountOrString {
            Count(usize),
            Str(String),
        }

        match CountOrString::deserialize(deserializer)? {
            CountOrString::Count(n) => Ok(Self::Count(n)),
            CountOrString::Str(s) => s.parse().map_err(serde::de::Error::custom),
        }
    }
}

/// A resolved compute device.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Device {
    /// Host CPU with a number of worker threads
    Cpu { threads: usize },
}

impl Device {
    /// Whether this device is hardware-accelerated.
    pub fn is_accelerated(&self) -> bool {
        false
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cpu { threads } => write!(f, "cpu ({threads} thread(s))"),
        }
    }
}

/// Whether this build can drive any accelerated backend.
pub fn accelerator_available() -> bool {
    false
}

/// Resolve the requested accelerator/devices pair against the host.
pub fn select_device(accelerator: Accelerator, devices: Devices) -> Result<Device> {
    select_device_with(accelerator, devices, host_parallelism())
}

fn host_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(1)
}

fn select_device_with(
    accelerator: Accelerator,
    devices: Devices,
    available: usize,
) -> Result<Device> {
    match accelerator {
        Accelerator::Gpu if !accelerator_available() => {
            return Err(Error::device(
                "accelerator=gpu requested but no GPU backend is available",
            ));
        }
        Accelerator::Auto if !accelerator_available() => {
            tracing::info!("GPU available: False, used: False");
        }
        _ => {}
    }

    let threads = match devices {
        Devices::Auto => 1,
        Devices::Count(0) => {
            return Err(Error::device("devices must be at least 1"));
        }
        Devices::Count(n) if n > available => {
            return Err(Error::device(format!(
                "requested {n} CPU devices but only {available} are available"
            )));
        }
        Devices::Count(n) => n,
    };

    let device = Device::Cpu { threads };
    tracing::info!("Using device: {device}");
    Ok(device)
}
