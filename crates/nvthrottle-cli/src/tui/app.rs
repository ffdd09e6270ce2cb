//! Dashboard state and event loop.
//!
//! The dashboard owns nothing but display state. It receives finished sample
//! batches over a channel from the polling thread and never calls the
//! backend itself, so a slow terminal can never hold up polling.

use std::collections::BTreeMap;
use std::io;
use std::path::PathBuf;
use std::sync::mpsc::{Receiver, TryRecvError};
use std::time::{Duration, Instant, SystemTime};

use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::prelude::*;

use nvthrottle_core::{BackendKind, DeviceId, HistoryBuffer, RawReading, Sample};

// ---------------------------------------------------------------------------
// DeviceView
// ---------------------------------------------------------------------------

/// Display state for one GPU.
pub struct DeviceView {
    pub name: String,
    /// Latest sample as observed, gaps and all.
    pub latest: Option<Sample>,
    /// Last reading that carried any data, shown dimmed while `stale`.
    pub last_good: RawReading,
    /// True when the latest cycle produced no data for this device.
    pub stale: bool,
    /// Dashboard-local throttle history strip.
    pub history: HistoryBuffer,
}

impl DeviceView {
    fn new(name: String) -> Self {
        Self {
            name,
            latest: None,
            last_good: RawReading::default(),
            stale: false,
            history: HistoryBuffer::default(),
        }
    }

    fn update(&mut self, sample: Sample) {
        self.history.push(sample.classification.is_throttled);
        if sample.reading.has_any() {
            self.last_good = sample.reading.clone();
            self.stale = false;
        } else {
            self.stale = true;
        }
        self.latest = Some(sample);
    }
}

// ---------------------------------------------------------------------------
// App
// ---------------------------------------------------------------------------

pub struct App {
    rx: Receiver<Vec<Sample>>,
    devices: BTreeMap<DeviceId, DeviceView>,
    backend: BackendKind,
    interval_secs: f64,
    started: Instant,
    cycles: u64,
    running: bool,
    last_export: Option<PathBuf>,
}

impl App {
    pub fn new(
        rx: Receiver<Vec<Sample>>,
        names: BTreeMap<DeviceId, String>,
        backend: BackendKind,
        interval_secs: f64,
    ) -> Self {
        let devices = names
            .into_iter()
            .map(|(id, name)| (id, DeviceView::new(name)))
            .collect();
        Self {
            rx,
            devices,
            backend,
            interval_secs,
            started: Instant::now(),
            cycles: 0,
            running: true,
            last_export: None,
        }
    }

    pub fn run(&mut self) -> io::Result<()> {
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen)?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;

        // Install panic hook that restores terminal before printing the panic.
        let original_hook = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            let _ = disable_raw_mode();
            let _ = execute!(io::stdout(), LeaveAlternateScreen, crossterm::cursor::Show);
            original_hook(info);
        }));

        let result = self.run_loop(&mut terminal);

        // Always restore terminal, even if the loop returned an error.
        let _ = std::panic::take_hook();
        disable_raw_mode()?;
        execute!(
            terminal.backend_mut(),
            LeaveAlternateScreen,
            crossterm::cursor::Show
        )?;

        if let Some(path) = &self.last_export {
            println!("Snapshot saved to {}", path.display());
        }

        result
    }

    fn run_loop(
        &mut self,
        terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    ) -> io::Result<()> {
        while self.running {
            self.drain_batches();
            terminal.draw(|f| super::ui::draw(f, self))?;

            if event::poll(Duration::from_millis(100))?
                && let Event::Key(key) = event::read()?
                && key.kind == KeyEventKind::Press
            {
                self.handle_key(key.code);
            }
        }
        Ok(())
    }

    /// Pull every pending batch off the channel without blocking.
    fn drain_batches(&mut self) {
        loop {
            match self.rx.try_recv() {
                Ok(batch) => {
                    self.cycles += 1;
                    for sample in batch {
                        if let Some(view) = self.devices.get_mut(&sample.device) {
                            view.update(sample);
                        }
                    }
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    // Poller finished (duration elapsed or fatal): exit with it.
                    self.running = false;
                    break;
                }
            }
        }
    }

    fn handle_key(&mut self, key: KeyCode) {
        match key {
            KeyCode::Char('q') | KeyCode::Esc => self.running = false,
            KeyCode::Char('s') => self.export_snapshot(),
            _ => {}
        }
    }

    /// Dump current per-device state as JSON next to the working directory.
    fn export_snapshot(&mut self) {
        let devices: Vec<serde_json::Value> = self
            .devices
            .iter()
            .map(|(id, view)| {
                serde_json::json!({
                    "device": id,
                    "name": view.name,
                    "stale": view.stale,
                    "latest": view.latest,
                    "history": view.history.snapshot(),
                })
            })
            .collect();

        let json = serde_json::json!({
            "backend": self.backend.to_string(),
            "uptime_secs": self.started.elapsed().as_secs(),
            "cycles": self.cycles,
            "devices": devices,
        });

        let epoch = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let path = PathBuf::from(format!("nvthrottle-snapshot-{epoch}.json"));

        if let Ok(contents) = serde_json::to_string_pretty(&json)
            && std::fs::write(&path, contents).is_ok()
        {
            self.last_export = Some(path);
        }
    }

    // --- Accessors used by the renderer ---

    pub fn devices(&self) -> &BTreeMap<DeviceId, DeviceView> {
        &self.devices
    }

    pub fn backend(&self) -> BackendKind {
        self.backend
    }

    pub fn interval_secs(&self) -> f64 {
        self.interval_secs
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    pub fn last_export(&self) -> Option<&PathBuf> {
        self.last_export.as_ref()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use nvthrottle_core::decode;
    use std::sync::mpsc;

    fn sample(device: DeviceId, mask: Option<u32>, with_data: bool) -> Sample {
        let reading = if with_data {
            RawReading {
                power_watts: Some(180.0),
                sm_clock_mhz: Some(1750),
                utilization_pct: Some(60),
                temperature_c: Some(62),
                throttle_mask: mask,
            }
        } else {
            RawReading::absent()
        };
        Sample {
            timestamp: Utc::now(),
            device,
            reading,
            classification: decode(mask),
        }
    }

    fn app_with_one_device() -> (mpsc::Sender<Vec<Sample>>, App) {
        let (tx, rx) = mpsc::channel();
        let names = BTreeMap::from([(0, "Test GPU".to_string())]);
        (tx, App::new(rx, names, BackendKind::NvidiaSmi, 1.0))
    }

    #[test]
    fn batches_update_device_views() {
        let (tx, mut app) = app_with_one_device();
        tx.send(vec![sample(0, Some(0x0004), true)]).unwrap();
        tx.send(vec![sample(0, Some(0), true)]).unwrap();
        app.drain_batches();

        assert_eq!(app.cycles(), 2);
        let view = &app.devices()[&0];
        assert!(!view.stale);
        assert_eq!(view.history.snapshot(), vec![true, false]);
        assert!(!view.latest.as_ref().unwrap().classification.is_throttled);
    }

    #[test]
    fn absent_cycle_marks_view_stale_but_keeps_numbers() {
        let (tx, mut app) = app_with_one_device();
        tx.send(vec![sample(0, Some(0), true)]).unwrap();
        tx.send(vec![sample(0, None, false)]).unwrap();
        app.drain_batches();

        let view = &app.devices()[&0];
        assert!(view.stale);
        assert_eq!(view.last_good.sm_clock_mhz, Some(1750));
    }

    #[test]
    fn disconnected_channel_stops_the_app() {
        let (tx, mut app) = app_with_one_device();
        drop(tx);
        app.drain_batches();
        assert!(!app.running);
    }

    #[test]
    fn sample_for_unknown_device_is_ignored() {
        let (tx, mut app) = app_with_one_device();
        tx.send(vec![sample(9, Some(0), true)]).unwrap();
        app.drain_batches();
        assert!(app.devices()[&0].latest.is_none());
    }
}
