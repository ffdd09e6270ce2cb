//! CSV logging consumer.
//!
//! One row per device per cycle, absent fields left as empty cells so the
//! log distinguishes "not measured" from zero. Write failures are logged and
//! otherwise ignored; a sick disk must not take down the monitor.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::error::Result;
use crate::poller::SampleConsumer;
use crate::types::Sample;

/// Column header written when the file is created.
pub const CSV_HEADER: &str =
    "timestamp,device_index,power_watts,sm_clock_mhz,utilization_pct,temperature_c,throttle_mask,problem_description";

/// Appends classified samples to a CSV file.
pub struct CsvLogger {
    writer: BufWriter<File>,
}

impl CsvLogger {
    /// Create (truncating) the log file and write the header row.
    pub fn create(path: &Path) -> Result<Self> {
        let mut writer = BufWriter::new(File::create(path)?);
        writeln!(writer, "{CSV_HEADER}")?;
        Ok(Self { writer })
    }

    fn write_sample(&mut self, sample: &Sample) -> std::io::Result<()> {
        let r = &sample.reading;
        writeln!(
            self.writer,
            "{},{},{},{},{},{},{},{}",
            sample.timestamp.format("%Y-%m-%dT%H:%M:%S%.3f"),
            sample.device,
            r.power_watts.map(|v| format!("{v:.2}")).unwrap_or_default(),
            r.sm_clock_mhz.map(|v| v.to_string()).unwrap_or_default(),
            r.utilization_pct.map(|v| v.to_string()).unwrap_or_default(),
            r.temperature_c.map(|v| v.to_string()).unwrap_or_default(),
            r.throttle_mask
                .map(|m| format!("0x{m:04x}"))
                .unwrap_or_default(),
            escape(&sample.classification.full_description()),
        )
    }
}

/// Quote a field if it contains CSV-significant characters.
fn escape(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

impl SampleConsumer for CsvLogger {
    fn on_cycle(&mut self, batch: &[Sample]) {
        for sample in batch {
            if let Err(e) = self.write_sample(sample) {
                log::warn!("CSV write failed: {e}");
                return;
            }
        }
        if let Err(e) = self.writer.flush() {
            log::warn!("CSV flush failed: {e}");
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
