//! Telemetry backends and startup probing.
//!
//! Two backends are supported: native NVML (preferred, one library call per
//! field) and an `nvidia-smi` subprocess fallback (one invocation per cycle
//! covering every device). [`probe`] picks exactly one at startup; the
//! selection is never revisited mid-run.

use std::collections::BTreeMap;
use std::fmt;

use crate::error::{MonitorError, Result};
use crate::types::{DeviceId, RawReading};

#[cfg(feature = "nvml")]
pub mod nvml;
pub mod smi;

/// Which backend variant is in use. Shown in the dashboard header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Nvml,
    NvidiaSmi,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nvml => write!(f, "NVML"),
            Self::NvidiaSmi => write!(f, "nvidia-smi"),
        }
    }
}

/// A source of per-device GPU telemetry.
///
/// Implementations are total per cycle: [`query_all`](Self::query_all) never
/// fails, it just omits devices it could not read. Only enumeration at
/// startup can error.
pub trait TelemetryBackend: Send {
    fn kind(&self) -> BackendKind;

    /// Device indices visible to this backend.
    fn enumerate(&mut self) -> Result<Vec<DeviceId>>;

    /// Marketing name of a device, if the backend can resolve it.
    fn device_name(&self, device: DeviceId) -> Option<String>;

    /// Read all requested devices for one cycle. A device missing from the
    /// result means it could not be queried; the caller substitutes an
    /// absent reading.
    fn query_all(&mut self, devices: &[DeviceId]) -> BTreeMap<DeviceId, RawReading>;
}

/// Select a backend at startup: NVML first, then `nvidia-smi`.
///
/// Returns the chosen backend together with its enumerated devices. Errors
/// with [`MonitorError::BackendUnavailable`] when neither variant works and
/// [`MonitorError::NoDevicesFound`] when the chosen one reports no devices.
pub fn probe() -> Result<(Box<dyn TelemetryBackend>, Vec<DeviceId>)> {
    #[cfg(feature = "nvml")]
    match nvml::NvmlBackend::probe() {
        Some(mut backend) => {
            let devices = backend.enumerate()?;
            if devices.is_empty() {
                return Err(MonitorError::NoDevicesFound);
            }
            log::info!("telemetry backend: NVML ({} devices)", devices.len());
            return Ok((Box::new(backend), devices));
        }
        None => log::debug!("NVML unavailable, trying nvidia-smi"),
    }

    match smi::SmiBackend::probe() {
        Some(mut backend) => {
            let devices = backend.enumerate()?;
            if devices.is_empty() {
                return Err(MonitorError::NoDevicesFound);
            }
            log::info!("telemetry backend: nvidia-smi ({} devices)", devices.len());
            Ok((Box::new(backend), devices))
        }
        None => Err(MonitorError::BackendUnavailable),
    }
}
