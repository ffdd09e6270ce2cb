//! Error taxonomy for the monitor core.
//!
//! Only startup conditions are fatal: no backend, no devices, or a device
//! filter naming an index the driver never reported. Per-cycle query failures
//! are represented in the data model as absent readings, never as errors.

use crate::types::DeviceId;

/// Result type alias for monitor operations.
pub type Result<T> = std::result::Result<T, MonitorError>;

/// Fatal conditions surfaced to the caller before or at startup.
#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    /// Neither backend variant could be initialized.
    #[error("no telemetry backend available (NVML failed to load and nvidia-smi was not found)")]
    BackendUnavailable,

    /// A backend initialized but enumerated zero devices.
    #[error("no NVIDIA devices found, is the driver loaded?")]
    NoDevicesFound,

    /// The device filter requested an index the backend did not report.
    #[error("unknown device index {0}")]
    UnknownDevice(DeviceId),

    /// I/O errors (CSV log creation and similar).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
