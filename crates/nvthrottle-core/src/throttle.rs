//! Throttle-reason bitmask decoding.
//!
//! The driver reports active clock-throttle reasons as a bitmask. This module
//! maps the bits we care about to named causes with operator-facing
//! explanations, ordered by severity. Bits outside [`KNOWN_MASK`] (idle,
//! application clock settings, display clock settings) are not slowdowns and
//! are deliberately ignored.

use serde::Serialize;

/// Bits this monitor recognizes as genuine slowdown causes.
pub const KNOWN_MASK: u32 = 0x00EC;

/// Summary string for a cycle with no decodable throttling.
pub const SUMMARY_OK: &str = "OK: No throttling";

/// A single named throttle cause, ordered most to least severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ThrottleCause {
    /// External power brake assertion (bit 0x0080).
    PowerBrake,
    /// Hardware thermal slowdown (bit 0x0040).
    HwThermal,
    /// Software thermal slowdown (bit 0x0020).
    SwThermal,
    /// Unspecified hardware slowdown (bit 0x0008).
    HwSlowdown,
    /// Software power cap (bit 0x0004).
    SwPowerCap,
}

/// Bit-to-cause mapping in severity order. [`decode`] walks this table so
/// the resulting cause list is always sorted worst-first.
pub const CAUSE_TABLE: [(u32, ThrottleCause); 5] = [
    (0x0080, ThrottleCause::PowerBrake),
    (0x0040, ThrottleCause::HwThermal),
    (0x0020, ThrottleCause::SwThermal),
    (0x0008, ThrottleCause::HwSlowdown),
    (0x0004, ThrottleCause::SwPowerCap),
];

impl ThrottleCause {
    /// The mask bit this cause corresponds to.
    pub fn bit(&self) -> u32 {
        match self {
            Self::PowerBrake => 0x0080,
            Self::HwThermal => 0x0040,
            Self::SwThermal => 0x0020,
            Self::HwSlowdown => 0x0008,
            Self::SwPowerCap => 0x0004,
        }
    }

    /// Short badge for dense display contexts.
    pub fn badge(&self) -> &'static str {
        match self {
            Self::PowerBrake => "PWR",
            Self::HwThermal => "THM",
            Self::SwThermal => "HOT",
            Self::HwSlowdown => "SLOW",
            Self::SwPowerCap => "CAP",
        }
    }

    /// One-line problem description for operators.
    pub fn problem(&self) -> &'static str {
        match self {
            Self::PowerBrake => {
                "POWER LIMIT: GPU wants more power but is limited by power delivery"
            }
            Self::HwThermal => "CRITICAL TEMP: Hardware thermal protection active",
            Self::SwThermal => "HIGH TEMP: GPU slowing itself down due to temperature",
            Self::HwSlowdown => "HARDWARE SLOWDOWN: Power or thermal emergency",
            Self::SwPowerCap => "POWER CAP: Hitting configured power limit",
        }
    }

    /// Suggested remediation, shown in the exit summary.
    pub fn advice(&self) -> &'static str {
        match self {
            Self::PowerBrake => "Check PSU capacity and PCIe power cable seating",
            Self::HwThermal => "Shut down and inspect cooling immediately",
            Self::SwThermal => "Improve airflow or reduce ambient temperature",
            Self::HwSlowdown => "Check PSU capacity and cooling",
            Self::SwPowerCap => "Raise the power limit with nvidia-smi -pl if thermals allow",
        }
    }
}

/// The decoded throttle state for one reading.
#[derive(Debug, Clone, Serialize)]
pub struct Classification {
    /// Active causes in severity order, worst first. Empty when the mask is
    /// absent or carries no known bits.
    pub causes: Vec<ThrottleCause>,
    /// True iff `causes` is non-empty.
    pub is_throttled: bool,
    /// Headline string: the worst cause's problem text, or [`SUMMARY_OK`].
    pub summary: String,
}

impl Classification {
    /// All active problem descriptions joined for log output.
    pub fn full_description(&self) -> String {
        if self.causes.is_empty() {
            SUMMARY_OK.to_string()
        } else {
            self.causes
                .iter()
                .map(|c| c.problem())
                .collect::<Vec<_>>()
                .join(" | ")
        }
    }
}

/// Decode a throttle-reason bitmask into a [`Classification`].
///
/// An absent mask decodes the same as a zero mask: not throttled. Unknown
/// bits never produce a cause on their own.
pub fn decode(mask: Option<u32>) -> Classification {
    let mask = mask.unwrap_or(0);
    let causes: Vec<ThrottleCause> = CAUSE_TABLE
        .iter()
        .filter(|(bit, _)| mask & bit != 0)
        .map(|(_, cause)| *cause)
        .collect();

    let is_throttled = !causes.is_empty();
    let summary = match causes.first() {
        Some(worst) => worst.problem().to_string(),
        None => SUMMARY_OK.to_string(),
    };

    Classification {
        causes,
        is_throttled,
        summary,
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
