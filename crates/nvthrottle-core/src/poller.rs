//! The polling loop: one thread, fixed cadence, fan-out to consumers.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use chrono::Utc;

use crate::aggregator::SampleAggregator;
use crate::backend::{BackendKind, TelemetryBackend};
use crate::error::{MonitorError, Result};
use crate::types::{DeviceId, RawReading, Sample};

/// Receives each completed cycle's batch of samples.
///
/// Consumers are infallible from the poller's point of view: a consumer that
/// hits trouble (a closed channel, a full disk) logs and degrades on its own
/// rather than stopping the loop for everyone else.
pub trait SampleConsumer: Send {
    fn on_cycle(&mut self, batch: &[Sample]);
}

/// Which devices to monitor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum DeviceFilter {
    /// Every device the backend enumerates.
    #[default]
    All,
    /// An explicit set of device indices.
    Ids(Vec<DeviceId>),
}

impl DeviceFilter {
    /// Resolve against the enumerated device set, deduplicated and sorted
    /// ascending. Errors on any index the backend did not report.
    pub fn resolve(&self, available: &[DeviceId]) -> Result<Vec<DeviceId>> {
        match self {
            Self::All => Ok(available.to_vec()),
            Self::Ids(ids) => {
                let mut resolved = Vec::with_capacity(ids.len());
                for &id in ids {
                    if !available.contains(&id) {
                        return Err(MonitorError::UnknownDevice(id));
                    }
                    if !resolved.contains(&id) {
                        resolved.push(id);
                    }
                }
                resolved.sort_unstable();
                Ok(resolved)
            }
        }
    }
}

/// Poller settings.
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Time between cycle starts.
    pub interval: Duration,
    /// Total run time; `None` runs until the stop flag is raised.
    pub duration: Option<Duration>,
    /// Which devices to monitor.
    pub device_filter: DeviceFilter,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            duration: None,
            device_filter: DeviceFilter::All,
        }
    }
}

/// Owns the backend, the aggregator, and the consumer list, and drives the
/// whole pipeline from a single thread.
pub struct Poller {
    backend: Box<dyn TelemetryBackend>,
    aggregator: SampleAggregator,
    devices: Vec<DeviceId>,
    config: PollerConfig,
    consumers: Vec<Box<dyn SampleConsumer>>,
    stop: Arc<AtomicBool>,
}

impl std::fmt::Debug for Poller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Poller")
            .field("devices", &self.devices)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Poller {
    /// Build a poller over an already-probed backend and its enumerated
    /// devices, applying the configured device filter.
    pub fn new(
        backend: Box<dyn TelemetryBackend>,
        available: Vec<DeviceId>,
        config: PollerConfig,
    ) -> Result<Self> {
        let devices = config.device_filter.resolve(&available)?;
        if devices.is_empty() {
            return Err(MonitorError::NoDevicesFound);
        }
        Ok(Self {
            backend,
            aggregator: SampleAggregator::new(&devices),
            devices,
            config,
            consumers: Vec::new(),
            stop: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.backend.kind()
    }

    /// Devices being monitored, ascending.
    pub fn devices(&self) -> &[DeviceId] {
        &self.devices
    }

    pub fn device_name(&self, device: DeviceId) -> Option<String> {
        self.backend.device_name(device)
    }

    pub fn aggregator(&self) -> &SampleAggregator {
        &self.aggregator
    }

    /// Shared flag that ends the loop when set (signal handlers, UI quit).
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    pub fn add_consumer(&mut self, consumer: Box<dyn SampleConsumer>) {
        self.consumers.push(consumer);
    }

    /// Run until the stop flag is raised or the configured duration elapses.
    ///
    /// Each cycle queries every monitored device, folds the readings through
    /// the aggregator in ascending device order, and hands the batch to every
    /// consumer. The inter-cycle sleep subtracts query time from the interval
    /// and never tries to catch up after a slow cycle.
    pub fn run(&mut self) {
        let started = Instant::now();
        loop {
            if self.stop.load(Ordering::Relaxed) {
                break;
            }
            if let Some(limit) = self.config.duration
                && started.elapsed() >= limit
            {
                break;
            }

            let cycle_start = Instant::now();
            self.cycle();

            let remaining = self
                .config
                .interval
                .saturating_sub(cycle_start.elapsed());
            self.sleep_interruptible(remaining);
        }
    }

    /// One poll cycle: query, aggregate, emit.
    fn cycle(&mut self) {
        let mut readings = self.backend.query_all(&self.devices);
        let now = Utc::now();

        let mut batch = Vec::with_capacity(self.devices.len());
        for &id in &self.devices {
            let reading = readings.remove(&id).unwrap_or_else(|| {
                log::warn!("device {id} missing from cycle, recording absent reading");
                RawReading::absent()
            });
            batch.push(self.aggregator.ingest(id, reading, now));
        }

        for consumer in &mut self.consumers {
            consumer.on_cycle(&batch);
        }
    }

    /// Sleep for `total`, waking early if the stop flag is raised.
    fn sleep_interruptible(&self, total: Duration) {
        const SLICE: Duration = Duration::from_millis(50);
        let deadline = Instant::now() + total;
        while !self.stop.load(Ordering::Relaxed) {
            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                break;
            }
            std::thread::sleep(left.min(SLICE));
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::mpsc;

    /// Scripted backend: pops one pre-planned cycle of readings per
    /// `query_all` call, then keeps returning the last one.
    struct MockBackend {
        devices: Vec<DeviceId>,
        cycles: Vec<BTreeMap<DeviceId, RawReading>>,
        calls: usize,
    }

    impl MockBackend {
        fn new(devices: Vec<DeviceId>, cycles: Vec<BTreeMap<DeviceId, RawReading>>) -> Self {
            Self {
                devices,
                cycles,
                calls: 0,
            }
        }
    }

    impl TelemetryBackend for MockBackend {
        fn kind(&self) -> BackendKind {
            BackendKind::NvidiaSmi
        }

        fn enumerate(&mut self) -> Result<Vec<DeviceId>> {
            Ok(self.devices.clone())
        }

        fn device_name(&self, _device: DeviceId) -> Option<String> {
            Some("Mock GPU".to_string())
        }

        fn query_all(&mut self, _devices: &[DeviceId]) -> BTreeMap<DeviceId, RawReading> {
            let idx = self.calls.min(self.cycles.len().saturating_sub(1));
            self.calls += 1;
            self.cycles.get(idx).cloned().unwrap_or_default()
        }
    }

    fn reading(mask: u32) -> RawReading {
        RawReading {
            power_watts: Some(200.0),
            sm_clock_mhz: Some(1500),
            utilization_pct: Some(80),
            temperature_c: Some(65),
            throttle_mask: Some(mask),
        }
    }

    /// Collects every batch it sees, for assertions.
    struct Recorder {
        batches: Arc<Mutex<Vec<Vec<Sample>>>>,
    }

    impl SampleConsumer for Recorder {
        fn on_cycle(&mut self, batch: &[Sample]) {
            self.batches.lock().unwrap().push(batch.to_vec());
        }
    }

    fn fast_config(cycles: u32) -> PollerConfig {
        PollerConfig {
            interval: Duration::from_millis(1),
            // Enough wall time for `cycles` 1ms cycles with headroom.
            duration: Some(Duration::from_millis(u64::from(cycles) * 2)),
            device_filter: DeviceFilter::All,
        }
    }

    #[test]
    fn empty_device_set_is_rejected() {
        let backend = MockBackend::new(vec![], vec![]);
        let err = Poller::new(Box::new(backend), vec![], PollerConfig::default()).unwrap_err();
        assert!(matches!(err, MonitorError::NoDevicesFound));
    }

    #[test]
    fn unknown_filter_id_is_rejected() {
        let backend = MockBackend::new(vec![0, 1], vec![]);
        let config = PollerConfig {
            device_filter: DeviceFilter::Ids(vec![0, 7]),
            ..Default::default()
        };
        let err = Poller::new(Box::new(backend), vec![0, 1], config).unwrap_err();
        assert!(matches!(err, MonitorError::UnknownDevice(7)));
    }

    #[test]
    fn filter_dedups_and_sorts() {
        let resolved = DeviceFilter::Ids(vec![2, 0, 2, 1])
            .resolve(&[0, 1, 2, 3])
            .unwrap();
        assert_eq!(resolved, vec![0, 1, 2]);
    }

    #[test]
    fn batch_is_ascending_by_device() {
        let cycle: BTreeMap<_, _> = [(0, reading(0)), (1, reading(0)), (2, reading(0))]
            .into_iter()
            .collect();
        let backend = MockBackend::new(vec![0, 1, 2], vec![cycle]);
        let mut poller =
            Poller::new(Box::new(backend), vec![0, 1, 2], fast_config(3)).unwrap();

        let batches = Arc::new(Mutex::new(Vec::new()));
        poller.add_consumer(Box::new(Recorder {
            batches: Arc::clone(&batches),
        }));
        poller.run();

        let batches = batches.lock().unwrap();
        assert!(!batches.is_empty());
        for batch in batches.iter() {
            let order: Vec<DeviceId> = batch.iter().map(|s| s.device).collect();
            assert_eq!(order, vec![0, 1, 2]);
        }
    }

    #[test]
    fn missing_device_yields_absent_sample() {
        // Device 1 never answers.
        let cycle: BTreeMap<_, _> = [(0, reading(0x0088))].into_iter().collect();
        let backend = MockBackend::new(vec![0, 1], vec![cycle]);
        let mut poller = Poller::new(Box::new(backend), vec![0, 1], fast_config(2)).unwrap();

        let batches = Arc::new(Mutex::new(Vec::new()));
        poller.add_consumer(Box::new(Recorder {
            batches: Arc::clone(&batches),
        }));
        poller.run();

        let batches = batches.lock().unwrap();
        let first = &batches[0];
        assert_eq!(first.len(), 2);
        assert!(first[0].reading.has_any());
        assert!(!first[1].reading.has_any());
        assert!(!first[1].classification.is_throttled);
    }

    #[test]
    fn combined_mask_decodes_end_to_end() {
        use crate::throttle::ThrottleCause;

        let cycle: BTreeMap<_, _> = [(0, reading(0x0088))].into_iter().collect();
        let backend = MockBackend::new(vec![0], vec![cycle]);
        let mut poller = Poller::new(Box::new(backend), vec![0], fast_config(1)).unwrap();

        let batches = Arc::new(Mutex::new(Vec::new()));
        poller.add_consumer(Box::new(Recorder {
            batches: Arc::clone(&batches),
        }));
        poller.run();

        let batches = batches.lock().unwrap();
        let sample = &batches[0][0];
        assert_eq!(
            sample.classification.causes,
            vec![ThrottleCause::PowerBrake, ThrottleCause::HwSlowdown]
        );
        assert!(sample.classification.summary.contains("POWER LIMIT"));
    }

    #[test]
    fn stop_flag_ends_run_promptly() {
        let cycle: BTreeMap<_, _> = [(0, reading(0))].into_iter().collect();
        let backend = MockBackend::new(vec![0], vec![cycle]);
        let config = PollerConfig {
            interval: Duration::from_millis(5),
            duration: None, // would run forever without the flag
            device_filter: DeviceFilter::All,
        };
        let mut poller = Poller::new(Box::new(backend), vec![0], config).unwrap();
        let stop = poller.stop_flag();

        let (tx, rx) = mpsc::channel();
        let handle = std::thread::spawn(move || {
            poller.run();
            tx.send(()).ok();
        });

        std::thread::sleep(Duration::from_millis(20));
        stop.store(true, Ordering::Relaxed);
        rx.recv_timeout(Duration::from_secs(2))
            .expect("poller did not stop after flag was raised");
        handle.join().unwrap();
    }

    #[test]
    fn duration_bounds_the_run() {
        let cycle: BTreeMap<_, _> = [(0, reading(0))].into_iter().collect();
        let backend = MockBackend::new(vec![0], vec![cycle]);
        let config = PollerConfig {
            interval: Duration::from_millis(1),
            duration: Some(Duration::from_millis(30)),
            device_filter: DeviceFilter::All,
        };
        let mut poller = Poller::new(Box::new(backend), vec![0], config).unwrap();

        let start = Instant::now();
        poller.run();
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn aggregator_history_tracks_cycles() {
        let throttled: BTreeMap<_, _> = [(0, reading(0x0004))].into_iter().collect();
        let clean: BTreeMap<_, _> = [(0, reading(0))].into_iter().collect();
        let backend = MockBackend::new(vec![0], vec![throttled, clean]);
        let mut poller = Poller::new(Box::new(backend), vec![0], fast_config(2)).unwrap();
        poller.run();

        let history = poller.aggregator().history(0).unwrap().snapshot();
        assert!(history.len() >= 2);
        assert!(history[0]);
        assert!(!history[1]);
    }
}
