use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::RunError;

/// A concrete compute device an engine can live on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    Cpu,
    Cuda,
    Mps,
}

impl Device {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cpu => "cpu",
            Self::Cuda => "cuda",
            Self::Mps => "mps",
        }
    }

    /// Name used in user-facing messages.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Cpu => "CPU",
            Self::Cuda => "CUDA",
            Self::Mps => "MPS",
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Which accelerators are present on this machine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Accelerators {
    #[serde(default)]
    pub cuda: bool,
    #[serde(default)]
    pub mps: bool,
}

impl Accelerators {
    pub fn cpu_only() -> Self {
        Self::default()
    }

    pub fn has(&self, device: Device) -> bool {
        match device {
            Device::Cpu => true,
            Device::Cuda => self.cuda,
            Device::Mps => self.mps,
        }
    }
}

/// The device a request asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceRequest {
    /// Best available: cuda, then mps, then cpu.
    Default,
    Exact(Device),
}

impl FromStr for DeviceRequest {
    type Err = RunError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "default" => Ok(Self::Default),
            "cpu" => Ok(Self::Exact(Device::Cpu)),
            "cuda" => Ok(Self::Exact(Device::Cuda)),
            "mps" => Ok(Self::Exact(Device::Mps)),
            other => Err(RunError::InvalidDevice(other.to_string())),
        }
    }
}

impl DeviceRequest {
    /// Pick a concrete device, failing if the requested accelerator is absent.
    pub fn resolve(self, available: Accelerators) -> Result<Device, RunError> {
        match self {
            Self::Default if available.cuda => Ok(Device::Cuda),
            Self::Default if available.mps => Ok(Device::Mps),
            Self::Default => Ok(Device::Cpu),
            Self::Exact(device) if available.has(device) => Ok(device),
            Self::Exact(device) => Err(RunError::DeviceUnavailable(device)),
        }
    }
}
