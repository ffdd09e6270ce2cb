//! Native NVML backend.
//!
//! Preferred over the subprocess fallback: no fork per cycle and direct
//! access to the throttle-reason bitflags. Device handles are fetched per
//! query rather than cached, which keeps the backend `Send` and tolerates
//! devices falling off the bus mid-run.

use std::collections::BTreeMap;

use nvml_wrapper::Nvml;
use nvml_wrapper::enum_wrappers::device::{Clock, TemperatureSensor};

use crate::backend::{BackendKind, TelemetryBackend};
use crate::error::Result;
use crate::types::{DeviceId, RawReading};

/// Telemetry via the NVML shared library.
pub struct NvmlBackend {
    nvml: Nvml,
}

impl NvmlBackend {
    /// Initialize NVML, retrying with the versioned library name on Linux
    /// where `libnvidia-ml.so` is often absent without the dev package.
    pub fn probe() -> Option<Self> {
        match Nvml::init() {
            Ok(nvml) => Some(Self { nvml }),
            Err(first_err) => {
                #[cfg(target_os = "linux")]
                {
                    use std::ffi::OsStr;
                    if let Ok(nvml) = Nvml::builder()
                        .lib_path(OsStr::new("libnvidia-ml.so.1"))
                        .init()
                    {
                        return Some(Self { nvml });
                    }
                }
                log::debug!("NVML init failed: {first_err}");
                None
            }
        }
    }

    fn query_one(&self, device: DeviceId) -> Option<RawReading> {
        let handle = self.nvml.device_by_index(device).ok()?;
        Some(RawReading {
            // NVML reports milliwatts.
            power_watts: handle.power_usage().ok().map(|mw| f64::from(mw) / 1000.0),
            sm_clock_mhz: handle.clock_info(Clock::SM).ok(),
            utilization_pct: handle.utilization_rates().ok().map(|u| u.gpu),
            temperature_c: handle.temperature(TemperatureSensor::Gpu).ok(),
            // Every decoded bit lives in the low byte of the 64-bit flags.
            throttle_mask: handle
                .current_throttle_reasons()
                .ok()
                .map(|r| r.bits() as u32),
        })
    }
}

impl TelemetryBackend for NvmlBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Nvml
    }

    fn enumerate(&mut self) -> Result<Vec<DeviceId>> {
        let count = self.nvml.device_count().unwrap_or(0);
        Ok((0..count).collect())
    }

    fn device_name(&self, device: DeviceId) -> Option<String> {
        self.nvml.device_by_index(device).ok()?.name().ok()
    }

    fn query_all(&mut self, devices: &[DeviceId]) -> BTreeMap<DeviceId, RawReading> {
        let mut readings = BTreeMap::new();
        for &id in devices {
            match self.query_one(id) {
                Some(reading) => {
                    readings.insert(id, reading);
                }
                None => log::warn!("NVML query failed for device {id} this cycle"),
            }
        }
        readings
    }
}
