//! Core data model: raw per-device readings and classified samples.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::throttle::Classification;

/// Driver-assigned device index, stable for the lifetime of a run.
pub type DeviceId = u32;

/// One cycle's worth of telemetry for a single device.
///
/// Every field is independently optional: a sensor the backend could not
/// read this cycle is `None`, never a fabricated zero. A reading with all
/// fields absent is still a valid (if useless) reading.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RawReading {
    /// Board power draw in watts.
    pub power_watts: Option<f64>,
    /// Current SM (streaming multiprocessor) clock in MHz.
    pub sm_clock_mhz: Option<u32>,
    /// GPU utilization percentage, 0..=100.
    pub utilization_pct: Option<u32>,
    /// Core temperature in degrees Celsius.
    pub temperature_c: Option<u32>,
    /// Raw throttle-reason bitmask as reported by the driver.
    pub throttle_mask: Option<u32>,
}

impl RawReading {
    /// A reading with every field absent, used when a device could not be
    /// queried at all this cycle.
    pub fn absent() -> Self {
        Self::default()
    }

    /// True when at least one field carries a value.
    pub fn has_any(&self) -> bool {
        self.power_watts.is_some()
            || self.sm_clock_mhz.is_some()
            || self.utilization_pct.is_some()
            || self.temperature_c.is_some()
            || self.throttle_mask.is_some()
    }
}

/// A classified observation: one device, one cycle.
#[derive(Debug, Clone, Serialize)]
pub struct Sample {
    /// Wall-clock time the observation was recorded.
    pub timestamp: DateTime<Utc>,
    /// Device the reading belongs to.
    pub device: DeviceId,
    /// The raw telemetry as observed, gaps included.
    pub reading: RawReading,
    /// Decoded throttle state for this cycle.
    pub classification: Classification,
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
