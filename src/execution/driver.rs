//! SGX driver modes and the host devices each one requires.
//!
//! Trusted-execution workloads need the enclave devices of the host mapped
//! into the container. The out-of-tree (legacy) driver and the in-kernel
//! (native) driver expose them at different paths.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::DockerError;

/// Devices exposed by the legacy out-of-tree SGX driver.
const LEGACY_DEVICES: &[&str] = &["/dev/isgx"];

/// Devices exposed by the in-kernel SGX driver (Linux 5.11+).
const NATIVE_DEVICES: &[&str] = &["/dev/sgx/enclave", "/dev/sgx/provision"];

/// Execution mode selecting which SGX devices a container gets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DriverMode {
    /// No SGX device.
    #[default]
    None,
    /// Legacy driver, single `/dev/isgx` device.
    Legacy,
    /// Native driver, enclave and provision devices.
    Native,
}

impl DriverMode {
    /// Fixed, ordered list of host device paths for this mode.
    pub fn devices(&self) -> &'static [&'static str] {
        match self {
            DriverMode::None => &[],
            DriverMode::Legacy => LEGACY_DEVICES,
            DriverMode::Native => NATIVE_DEVICES,
        }
    }

    /// Returns `true` for every mode except [`DriverMode::None`].
    pub fn is_active(&self) -> bool {
        *self != DriverMode::None
    }
}

impl std::fmt::Display for DriverMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DriverMode::None => write!(f, "none"),
            DriverMode::Legacy => write!(f, "legacy"),
            DriverMode::Native => write!(f, "native"),
        }
    }
}

impl FromStr for DriverMode {
    type Err = DockerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" | "none" => Ok(DriverMode::None),
            "legacy" => Ok(DriverMode::Legacy),
            "native" => Ok(DriverMode::Native),
            other => Err(DockerError::InvalidArgument(format!(
                "unknown driver mode '{other}': expected none, legacy or native"
            ))),
        }
    }
}
