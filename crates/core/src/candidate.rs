use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::alias::UnitConversion;
use crate::money::Money;

/// How a matched or suggested sku was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchReason {
    Alias,
    Exact,
    Fuzzy,
    Manual,
}

impl fmt::Display for MatchReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MatchReason::Alias => "alias",
            MatchReason::Exact => "exact",
            MatchReason::Fuzzy => "fuzzy",
            MatchReason::Manual => "manual",
        };
        write!(f, "{s}")
    }
}

impl FromStr for MatchReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "alias" => Ok(MatchReason::Alias),
            "exact" => Ok(MatchReason::Exact),
            "fuzzy" => Ok(MatchReason::Fuzzy),
            "manual" => Ok(MatchReason::Manual),
            other => Err(format!("unknown match reason: {other}")),
        }
    }
}

/// One ranked suggestion for a bill line. Derived at request time, never
/// persisted; the alias fields ride along so ties rank deterministically and
/// usage can be recorded when a suggestion is taken.
#[derive(Debug, Clone, Serialize)]
pub struct MatchCandidate {
    pub internal_sku: String,
    pub display_name: String,
    pub confidence: f32,
    pub reason: MatchReason,
    pub alias_id: Option<i64>,
    pub alias_priority: i32,
    pub alias_last_seen: Option<DateTime<Utc>>,
    pub conversion: Option<UnitConversion>,
    /// Catalog context for the operator; absent when the catalog was degraded.
    pub unit_cost: Option<Money>,
    pub on_hand: Option<Decimal>,
}

impl MatchCandidate {
    pub fn new(internal_sku: impl Into<String>, confidence: f32, reason: MatchReason) -> Self {
        let internal_sku = internal_sku.into();
        MatchCandidate {
            display_name: internal_sku.clone(),
            internal_sku,
            confidence: confidence.clamp(0.0, 1.0),
            reason,
            alias_id: None,
            alias_priority: 0,
            alias_last_seen: None,
            conversion: None,
            unit_cost: None,
            on_hand: None,
        }
    }
}
