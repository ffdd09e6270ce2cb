//! Per-device rolling state, owned by the polling thread.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::history::HistoryBuffer;
use crate::throttle::decode;
use crate::types::{DeviceId, RawReading, Sample};

/// Rolling state for one device.
#[derive(Debug, Default)]
struct DeviceState {
    history: HistoryBuffer,
    /// Most recent reading that carried at least one field. Kept so a
    /// display can keep showing real numbers across transient query gaps.
    last_good: Option<RawReading>,
}

/// Owns all per-device state and turns raw readings into [`Sample`]s.
///
/// Devices are keyed in a `BTreeMap` so iteration (and therefore emission
/// order) is always ascending by device index.
#[derive(Debug, Default)]
pub struct SampleAggregator {
    devices: BTreeMap<DeviceId, DeviceState>,
}

impl SampleAggregator {
    /// Pre-register the monitored device set so histories exist from the
    /// first cycle.
    pub fn new(ids: &[DeviceId]) -> Self {
        let devices = ids
            .iter()
            .map(|id| (*id, DeviceState::default()))
            .collect();
        Self { devices }
    }

    /// Fold one cycle's reading for one device into rolling state and
    /// produce the classified sample.
    ///
    /// The emitted sample always carries the reading as observed; `last_good`
    /// retention never rewrites what was actually measured this cycle.
    pub fn ingest(&mut self, device: DeviceId, reading: RawReading, now: DateTime<Utc>) -> Sample {
        let classification = decode(reading.throttle_mask);
        let state = self.devices.entry(device).or_default();
        state.history.push(classification.is_throttled);
        if reading.has_any() {
            state.last_good = Some(reading.clone());
        }
        Sample {
            timestamp: now,
            device,
            reading,
            classification,
        }
    }

    /// Throttle history for a device, if it is registered.
    pub fn history(&self, device: DeviceId) -> Option<&HistoryBuffer> {
        self.devices.get(&device).map(|s| &s.history)
    }

    /// Most recent non-empty reading for a device.
    pub fn last_good(&self, device: DeviceId) -> Option<&RawReading> {
        self.devices.get(&device).and_then(|s| s.last_good.as_ref())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
