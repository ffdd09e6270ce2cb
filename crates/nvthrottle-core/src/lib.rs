//! # nvthrottle-core
//!
//! **Find out why your GPU is running slower than it should.**
//!
//! `nvthrottle-core` polls per-GPU telemetry (power draw, SM clock,
//! utilization, temperature, throttle-reason bitmask) from NVML or,
//! when the library cannot be loaded, from the `nvidia-smi` command. The raw
//! bitmask is decoded into named causes with human-readable explanations, and
//! a bounded rolling history of throttle events is kept per device for
//! visualization.
//!
//! ## Quick Start
//!
//! ```no_run
//! use nvthrottle_core::{Poller, PollerConfig, probe};
//!
//! let (backend, devices) = probe()?;
//! println!("using {} with {} device(s)", backend.kind(), devices.len());
//!
//! let mut poller = Poller::new(backend, devices, PollerConfig::default())?;
//! poller.run(); // one Sample per device per cycle, fanned out to consumers
//! # Ok::<(), nvthrottle_core::MonitorError>(())
//! ```
//!
//! ## Architecture
//!
//! Backend → Poller → SampleAggregator → consumers (dashboard, CSV)
//!
//! One backend variant is selected at startup and held for the whole run;
//! every cycle's readings come from the same source.
//! A single polling thread owns all aggregation state; downstream consumers
//! only ever see immutable [`Sample`] records.
//!
//! Absence of a sensor reading is data, not an error: every [`RawReading`]
//! field is optional, and a device the backend failed to read this cycle
//! yields a fully absent reading rather than a crash or a fake zero.

pub mod aggregator;
pub mod backend;
pub mod csv;
pub mod error;
pub mod history;
pub mod poller;
pub mod throttle;
pub mod types;

pub use aggregator::SampleAggregator;
pub use backend::{BackendKind, TelemetryBackend, probe};
pub use csv::CsvLogger;
pub use error::{MonitorError, Result};
pub use history::{HISTORY_CAPACITY, HistoryBuffer};
pub use poller::{DeviceFilter, Poller, PollerConfig, SampleConsumer};
pub use throttle::{Classification, ThrottleCause, decode};
pub use types::{DeviceId, RawReading, Sample};

/// Library version (from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
