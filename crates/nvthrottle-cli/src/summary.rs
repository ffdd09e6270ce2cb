//! End-of-run summary printed after the dashboard exits.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use nvthrottle_core::{DeviceId, Sample};

/// Print the final per-GPU verdict with remediation advice.
pub fn print(
    names: &BTreeMap<DeviceId, String>,
    latest: &BTreeMap<DeviceId, Sample>,
    runtime: Duration,
    csv_path: Option<&Path>,
) {
    println!();
    println!("=== SUMMARY ===");
    println!("Monitored for {}", format_runtime(runtime));
    println!();

    for (&id, name) in names {
        println!("{name} (GPU {id}):");
        match latest.get(&id) {
            Some(sample) if sample.classification.is_throttled => {
                for cause in &sample.classification.causes {
                    println!("  ✗ {}", cause.problem());
                    println!("    Solution: {}", cause.advice());
                }
            }
            Some(_) => println!("  ✓ No problems detected"),
            None => println!("  ? No readings collected"),
        }
    }

    if let Some(path) = csv_path {
        println!();
        println!("Telemetry log written to {}", path.display());
    }
}

fn format_runtime(runtime: Duration) -> String {
    let total = runtime.as_secs();
    let (h, m, s) = (total / 3600, (total % 3600) / 60, total % 60);
    if h > 0 {
        format!("{h}h {m}m {s}s")
    } else if m > 0 {
        format!("{m}m {s}s")
    } else {
        format!("{s}s")
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runtime_formatting() {
        assert_eq!(format_runtime(Duration::from_secs(42)), "42s");
        assert_eq!(format_runtime(Duration::from_secs(90)), "1m 30s");
        assert_eq!(format_runtime(Duration::from_secs(3725)), "1h 2m 5s");
    }
}
