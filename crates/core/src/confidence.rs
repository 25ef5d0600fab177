use serde::{Deserialize, Serialize};
use std::fmt;

/// Floor of the high band; bulk accept only touches lines at or above this.
pub const HIGH: f32 = 0.95;
/// Floor of the medium band.
pub const MEDIUM: f32 = 0.70;

/// Banding used for review ordering and the bulk-accept cut. Thresholds live
/// here and nowhere else; call sites must not restate them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceBand {
    High,
    Medium,
    Low,
}

impl ConfidenceBand {
    pub fn of(confidence: f32) -> Self {
        if confidence >= HIGH {
            ConfidenceBand::High
        } else if confidence >= MEDIUM {
            ConfidenceBand::Medium
        } else {
            ConfidenceBand::Low
        }
    }
}

impl fmt::Display for ConfidenceBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConfidenceBand::High => "high",
            ConfidenceBand::Medium => "medium",
            ConfidenceBand::Low => "low",
        };
        write!(f, "{s}")
    }
}
