//! CLI for nvthrottle, a live answer to "why is my GPU slow?".

mod summary;
mod tui;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::Ordering;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use clap::Parser;

use nvthrottle_core::{
    CsvLogger, DeviceFilter, DeviceId, Poller, PollerConfig, Sample, SampleConsumer, probe,
};

#[derive(Parser)]
#[command(name = "nvthrottle")]
#[command(about = "nvthrottle - live NVIDIA GPU throttle monitor")]
#[command(version = nvthrottle_core::VERSION)]
struct Cli {
    /// Seconds between polls
    #[arg(long, default_value = "1.0")]
    interval: f64,

    /// Total runtime in seconds (0 = run until interrupted)
    #[arg(long, default_value = "0")]
    duration: f64,

    /// Comma-separated device indices, or "all"
    #[arg(long, default_value = "all")]
    gpus: String,

    /// Append per-cycle telemetry rows to a CSV file
    #[arg(long)]
    csv: Option<PathBuf>,

    /// Log each cycle to stdout instead of drawing the dashboard
    #[arg(long)]
    headless: bool,
}

/// Parse the --gpus argument into a device filter.
fn parse_gpu_filter(arg: &str) -> Result<DeviceFilter, String> {
    let arg = arg.trim();
    if arg.is_empty() || arg.eq_ignore_ascii_case("all") {
        return Ok(DeviceFilter::All);
    }
    let mut ids = Vec::new();
    for part in arg.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let id: DeviceId = part
            .parse()
            .map_err(|_| format!("invalid device index {part:?}"))?;
        ids.push(id);
    }
    if ids.is_empty() {
        return Err(format!("no device indices in {arg:?}"));
    }
    Ok(DeviceFilter::Ids(ids))
}

/// Keeps the most recent sample per device for the exit summary.
struct LatestTracker {
    latest: Arc<Mutex<BTreeMap<DeviceId, Sample>>>,
}

impl SampleConsumer for LatestTracker {
    fn on_cycle(&mut self, batch: &[Sample]) {
        let mut latest = self.latest.lock().unwrap();
        for sample in batch {
            latest.insert(sample.device, sample.clone());
        }
    }
}

/// Forwards each batch to the dashboard thread. A hung or exited receiver
/// just drops batches; the poller keeps running until asked to stop.
struct ChannelConsumer {
    tx: mpsc::Sender<Vec<Sample>>,
}

impl SampleConsumer for ChannelConsumer {
    fn on_cycle(&mut self, batch: &[Sample]) {
        if self.tx.send(batch.to_vec()).is_err() {
            log::debug!("dashboard receiver gone, dropping batch");
        }
    }
}

/// Prints each cycle as plain lines, for logging and piping.
struct StdoutConsumer {
    names: BTreeMap<DeviceId, String>,
}

impl SampleConsumer for StdoutConsumer {
    fn on_cycle(&mut self, batch: &[Sample]) {
        for sample in batch {
            let r = &sample.reading;
            let fallback = format!("GPU {}", sample.device);
            let name = self
                .names
                .get(&sample.device)
                .map(String::as_str)
                .unwrap_or(&fallback);
            println!(
                "{} [{}] power={} sm={} util={} temp={} | {}",
                sample.timestamp.format("%H:%M:%S"),
                name,
                fmt_opt(r.power_watts.map(|v| format!("{v:.0}W"))),
                fmt_opt(r.sm_clock_mhz.map(|v| format!("{v}MHz"))),
                fmt_opt(r.utilization_pct.map(|v| format!("{v}%"))),
                fmt_opt(r.temperature_c.map(|v| format!("{v}C"))),
                sample.classification.summary,
            );
        }
    }
}

fn fmt_opt(v: Option<String>) -> String {
    v.unwrap_or_else(|| "--".to_string())
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    let device_filter = match parse_gpu_filter(&cli.gpus) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };

    let (backend, available) = match probe() {
        Ok(pair) => pair,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };

    let config = PollerConfig {
        interval: Duration::from_secs_f64(cli.interval.max(0.1)),
        duration: (cli.duration > 0.0).then(|| Duration::from_secs_f64(cli.duration)),
        device_filter,
    };
    let interval_secs = config.interval.as_secs_f64();

    let mut poller = match Poller::new(backend, available, config) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };

    // Resolve display names once; backends may shell out per lookup.
    let names: BTreeMap<DeviceId, String> = poller
        .devices()
        .iter()
        .map(|&id| {
            let name = poller
                .device_name(id)
                .unwrap_or_else(|| format!("GPU {id}"));
            (id, name)
        })
        .collect();
    let backend_kind = poller.backend_kind();

    if let Some(path) = &cli.csv {
        match CsvLogger::create(path) {
            Ok(logger) => poller.add_consumer(Box::new(logger)),
            Err(e) => {
                eprintln!("error: cannot create CSV log {}: {e}", path.display());
                return ExitCode::FAILURE;
            }
        }
    }

    let latest = Arc::new(Mutex::new(BTreeMap::new()));
    poller.add_consumer(Box::new(LatestTracker {
        latest: Arc::clone(&latest),
    }));

    let stop = poller.stop_flag();
    {
        let stop = Arc::clone(&stop);
        if let Err(e) = ctrlc::set_handler(move || stop.store(true, Ordering::Relaxed)) {
            log::warn!("could not install Ctrl-C handler: {e}");
        }
    }

    let started = Instant::now();

    if cli.headless {
        poller.add_consumer(Box::new(StdoutConsumer {
            names: names.clone(),
        }));
        poller.run();
    } else {
        let (tx, rx) = mpsc::channel();
        poller.add_consumer(Box::new(ChannelConsumer { tx }));

        let poll_handle = std::thread::spawn(move || {
            poller.run();
        });

        let mut app = tui::app::App::new(rx, names.clone(), backend_kind, interval_secs);
        if let Err(e) = app.run() {
            eprintln!("dashboard error: {e}");
        }

        // The UI quit (or crashed): stop polling and wait for the thread.
        stop.store(true, Ordering::Relaxed);
        if poll_handle.join().is_err() {
            eprintln!("polling thread panicked");
        }
    }

    let latest = latest.lock().unwrap();
    summary::print(&names, &latest, started.elapsed(), cli.csv.as_deref());

    ExitCode::SUCCESS
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
