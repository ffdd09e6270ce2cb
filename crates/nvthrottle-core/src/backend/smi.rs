//! `nvidia-smi` subprocess backend.
//!
//! Fallback for environments where NVML cannot be loaded (containers without
//! the library mounted, partial driver installs). One `nvidia-smi` invocation
//! per cycle covers every device; rows are matched to devices by the `index`
//! column, not by line position, so reordered or missing rows are tolerated.

use std::collections::BTreeMap;
use std::process::{Command, Stdio};
use std::str::FromStr;

use crate::backend::{BackendKind, TelemetryBackend};
use crate::error::{MonitorError, Result};
use crate::types::{DeviceId, RawReading};

/// Fields requested per cycle, in row order.
const QUERY_FIELDS: &str =
    "index,power.draw,clocks.current.sm,utilization.gpu,temperature.gpu,clocks_throttle_reasons.active";

/// Telemetry via the `nvidia-smi` command-line tool.
#[derive(Debug, Default)]
pub struct SmiBackend;

impl SmiBackend {
    /// Available whenever the `nvidia-smi` binary is on PATH.
    pub fn probe() -> Option<Self> {
        command_exists("nvidia-smi").then_some(Self)
    }
}

impl TelemetryBackend for SmiBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::NvidiaSmi
    }

    fn enumerate(&mut self) -> Result<Vec<DeviceId>> {
        let out = run_nvidia_smi(&["--query-gpu=index", "--format=csv,noheader"])
            .ok_or(MonitorError::BackendUnavailable)?;
        let mut ids: Vec<DeviceId> = out
            .lines()
            .filter_map(|line| line.trim().parse().ok())
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }

    fn device_name(&self, device: DeviceId) -> Option<String> {
        let id = format!("--id={device}");
        let out = run_nvidia_smi(&["--query-gpu=name", "--format=csv,noheader", &id])?;
        let name = out.trim();
        (!name.is_empty()).then(|| name.to_string())
    }

    fn query_all(&mut self, devices: &[DeviceId]) -> BTreeMap<DeviceId, RawReading> {
        let query = format!("--query-gpu={QUERY_FIELDS}");
        let Some(out) = run_nvidia_smi(&[&query, "--format=csv,noheader,nounits"]) else {
            log::warn!("nvidia-smi query failed this cycle");
            return BTreeMap::new();
        };

        let mut readings = BTreeMap::new();
        for line in out.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match parse_row(line) {
                Some((id, reading)) if devices.contains(&id) => {
                    readings.insert(id, reading);
                }
                Some(_) => {} // a device outside the monitored set
                None => log::warn!("unparseable nvidia-smi row: {line:?}"),
            }
        }
        readings
    }
}

// ---------------------------------------------------------------------------
// Row parsing
// ---------------------------------------------------------------------------

/// Parse one CSV row into a device index and its reading.
///
/// Only the index column is mandatory. Every telemetry column degrades to
/// `None` on `[N/A]`, emptiness, or garbage, and short rows just leave the
/// trailing fields absent.
fn parse_row(line: &str) -> Option<(DeviceId, RawReading)> {
    let mut cols = line.split(',').map(str::trim);
    let id: DeviceId = cols.next()?.parse().ok()?;

    let reading = RawReading {
        power_watts: parse_field(cols.next()),
        sm_clock_mhz: parse_field(cols.next()),
        utilization_pct: parse_field(cols.next()),
        temperature_c: parse_field(cols.next()),
        throttle_mask: parse_mask(cols.next()),
    };
    Some((id, reading))
}

/// Parse a single numeric column, treating `[N/A]` and garbage as absent.
fn parse_field<T: FromStr>(col: Option<&str>) -> Option<T> {
    let col = col?.trim();
    if col.is_empty() || col.eq_ignore_ascii_case("[n/a]") || col.eq_ignore_ascii_case("n/a") {
        return None;
    }
    col.parse().ok()
}

/// The throttle-reason column is printed as hex (`0x0000000000000004`);
/// accept a bare decimal too. The driver value is 64-bit but every bit this
/// monitor decodes lives in the low byte, so truncation to u32 is lossless
/// for our purposes.
fn parse_mask(col: Option<&str>) -> Option<u32> {
    let col = col?.trim();
    if col.is_empty() || col.eq_ignore_ascii_case("[n/a]") || col.eq_ignore_ascii_case("n/a") {
        return None;
    }
    let wide: u64 = if let Some(hex) = col.strip_prefix("0x").or_else(|| col.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).ok()?
    } else {
        col.parse().ok()?
    };
    Some(wide as u32)
}

// ---------------------------------------------------------------------------
// Subprocess plumbing
// ---------------------------------------------------------------------------

/// Check if a command exists by running `which`.
fn command_exists(name: &str) -> bool {
    Command::new("which")
        .arg(name)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Run `nvidia-smi` with the given args and return stdout, or `None` on a
/// spawn failure or non-zero exit.
fn run_nvidia_smi(args: &[&str]) -> Option<String> {
    let output = Command::new("nvidia-smi").args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    Some(String::from_utf8_lossy(&output.stdout).into_owned())
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_complete_row() {
        let (id, r) = parse_row("0, 285.34, 1410, 97, 71, 0x0000000000000004").unwrap();
        assert_eq!(id, 0);
        assert_eq!(r.power_watts, Some(285.34));
        assert_eq!(r.sm_clock_mhz, Some(1410));
        assert_eq!(r.utilization_pct, Some(97));
        assert_eq!(r.temperature_c, Some(71));
        assert_eq!(r.throttle_mask, Some(0x0004));
    }

    #[test]
    fn not_available_fields_become_none() {
        let (id, r) = parse_row("2, [N/A], 1410, [N/A], 55, [N/A]").unwrap();
        assert_eq!(id, 2);
        assert_eq!(r.power_watts, None);
        assert_eq!(r.sm_clock_mhz, Some(1410));
        assert_eq!(r.utilization_pct, None);
        assert_eq!(r.temperature_c, Some(55));
        assert_eq!(r.throttle_mask, None);
        assert!(r.has_any());
    }

    #[test]
    fn short_row_leaves_trailing_fields_absent() {
        let (id, r) = parse_row("1, 120.5").unwrap();
        assert_eq!(id, 1);
        assert_eq!(r.power_watts, Some(120.5));
        assert_eq!(r.sm_clock_mhz, None);
        assert_eq!(r.throttle_mask, None);
    }

    #[test]
    fn garbage_index_rejects_row() {
        assert!(parse_row("GPU0, 120.5, 1410, 50, 60, 0x0").is_none());
        assert!(parse_row("").is_none());
    }

    #[test]
    fn garbage_field_degrades_to_none() {
        let (_, r) = parse_row("0, watts???, 1410, 50, 60, 0x0").unwrap();
        assert_eq!(r.power_watts, None);
        assert_eq!(r.sm_clock_mhz, Some(1410));
    }

    #[test]
    fn mask_accepts_hex_and_decimal() {
        assert_eq!(parse_mask(Some("0x0000000000000088")), Some(0x0088));
        assert_eq!(parse_mask(Some("0X44")), Some(0x44));
        assert_eq!(parse_mask(Some("4")), Some(4));
        assert_eq!(parse_mask(Some("[N/A]")), None);
        assert_eq!(parse_mask(Some("")), None);
        assert_eq!(parse_mask(Some("0xzz")), None);
        assert_eq!(parse_mask(None), None);
    }

    #[test]
    fn mask_truncates_high_bits() {
        // Bits above 32 are outside the decoded set.
        assert_eq!(parse_mask(Some("0x8000000000000004")), Some(0x0004));
    }

    #[test]
    fn command_probe_helpers() {
        assert!(command_exists("echo"));
        assert!(!command_exists("nonexistent_binary_xyz_12345"));
    }
}
