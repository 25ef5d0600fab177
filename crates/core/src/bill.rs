use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::candidate::MatchReason;
use crate::confidence;
use crate::error::EngineError;
use crate::money::Money;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillStatus {
    Draft,
    Review,
    Posted,
    Void,
}

impl BillStatus {
    /// Legal lifecycle moves. Reopen (posted back to review) is the only
    /// step backwards; void is terminal and never reachable from posted.
    pub fn can_transition(self, to: BillStatus) -> bool {
        matches!(
            (self, to),
            (BillStatus::Draft, BillStatus::Review)
                | (BillStatus::Review, BillStatus::Posted)
                | (BillStatus::Posted, BillStatus::Review)
                | (BillStatus::Draft, BillStatus::Void)
                | (BillStatus::Review, BillStatus::Void)
        )
    }

    pub fn allows_line_edits(self) -> bool {
        matches!(self, BillStatus::Draft | BillStatus::Review)
    }
}

impl fmt::Display for BillStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BillStatus::Draft => "draft",
            BillStatus::Review => "review",
            BillStatus::Posted => "posted",
            BillStatus::Void => "void",
        };
        write!(f, "{s}")
    }
}

impl FromStr for BillStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(BillStatus::Draft),
            "review" => Ok(BillStatus::Review),
            "posted" => Ok(BillStatus::Posted),
            "void" => Ok(BillStatus::Void),
            other => Err(format!("unknown bill status: {other}")),
        }
    }
}

/// One vendor bill header. Lines live in `VendorBillLine`; header totals are
/// whatever the document claimed and may disagree with the line sum.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VendorBill {
    pub id: i64,
    pub store_id: i64,
    pub vendor_id: i64,
    pub invoice_no: String,
    pub invoice_date: Option<NaiveDate>,
    pub currency: String,
    pub subtotal: Option<Money>,
    pub tax: Option<Money>,
    pub total: Option<Money>,
    /// Digest of the source document, set at ingestion.
    pub content_hash: String,
    pub idempotency_key: String,
    pub ocr_confidence: f32,
    pub status: BillStatus,
    pub posted_at: Option<DateTime<Utc>>,
    pub posted_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl VendorBill {
    pub fn ensure_transition(
        &self,
        to: BillStatus,
        operation: &'static str,
    ) -> Result<(), EngineError> {
        if self.status.can_transition(to) {
            Ok(())
        } else {
            Err(EngineError::InvalidState {
                status: self.status,
                operation,
            })
        }
    }

    pub fn ensure_editable(&self, operation: &'static str) -> Result<(), EngineError> {
        if self.status.allows_line_edits() {
            Ok(())
        } else {
            Err(EngineError::InvalidState {
                status: self.status,
                operation,
            })
        }
    }
}

/// One bill line. Raw fields are kept verbatim for audit; normalized fields
/// drive matching; the matched/suggested pair tracks what the system proposed
/// versus what was committed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VendorBillLine {
    pub id: i64,
    pub bill_id: i64,
    pub line_no: i64,
    pub raw_sku: String,
    pub normalized_sku: String,
    pub raw_description: String,
    pub raw_qty: String,
    pub normalized_qty: Decimal,
    /// Quantity text did not parse; normalized_qty is zero and the line needs
    /// a human eye.
    pub qty_parse_failed: bool,
    pub raw_unit: Option<String>,
    pub normalized_unit: Option<String>,
    pub unit_price: Money,
    /// Extended price as printed on the document, when it printed one.
    pub raw_ext_price: Option<Money>,
    /// Recomputed extension: normalized qty times unit price.
    pub ext_price: Money,
    pub suggested_sku: Option<String>,
    pub matched_sku: Option<String>,
    pub match_confidence: f32,
    pub match_reason: Option<MatchReason>,
    pub user_overridden: bool,
    /// Vendor-unit to internal-unit multiplier committed with the match.
    pub unit_multiplier: Decimal,
}

impl VendorBillLine {
    pub fn is_matched(&self) -> bool {
        self.matched_sku.as_deref().is_some_and(|s| !s.is_empty())
    }

    /// Internal units this line adds to stock when posted.
    pub fn receiving_qty(&self) -> Decimal {
        self.normalized_qty * self.unit_multiplier
    }

    /// Cost per internal unit, the vendor unit price spread over the
    /// conversion.
    pub fn receiving_unit_cost(&self) -> Money {
        self.unit_price.over(self.unit_multiplier)
    }

    /// Gap between the printed extension and the recomputed one, when the
    /// document printed one. Informational only; it never blocks posting.
    pub fn price_discrepancy(&self) -> Option<Money> {
        self.raw_ext_price.map(|raw| raw - self.ext_price)
    }
}

/// Line numbers that block posting.
pub fn unmatched_line_nos(lines: &[VendorBillLine]) -> Vec<i64> {
    lines
        .iter()
        .filter(|l| !l.is_matched())
        .map(|l| l.line_no)
        .collect()
}

/// Sum of recomputed line extensions, for display next to the header total.
pub fn computed_subtotal(lines: &[VendorBillLine]) -> Money {
    lines
        .iter()
        .map(|l| l.ext_price)
        .fold(Money::zero(), |a, b| a + b)
}

/// Lines the bulk accept will commit: an uncommitted suggestion in the high
/// band on a line no human has touched.
pub fn accept_candidates(lines: &[VendorBillLine]) -> Vec<&VendorBillLine> {
    lines
        .iter()
        .filter(|l| {
            !l.user_overridden
                && !l.is_matched()
                && l.suggested_sku.as_deref().is_some_and(|s| !s.is_empty())
                && l.match_confidence >= confidence::HIGH
        })
        .collect()
}

/// What a committed match should look like after `update_match`.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchUpdate {
    pub matched_sku: String,
    pub match_confidence: f32,
    pub match_reason: MatchReason,
    pub user_overridden: bool,
}

/// Pure half of the update-match operation. Committing the system's own
/// suggestion keeps its confidence and reason; anything else is a manual
/// override at full confidence.
pub fn plan_match_update(
    line: &VendorBillLine,
    internal_sku: &str,
) -> Result<MatchUpdate, EngineError> {
    let sku = internal_sku.trim();
    if sku.is_empty() {
        return Err(EngineError::validation("internal sku must not be empty"));
    }
    if line.suggested_sku.as_deref() == Some(sku) {
        return Ok(MatchUpdate {
            matched_sku: sku.to_string(),
            match_confidence: line.match_confidence,
            match_reason: line.match_reason.unwrap_or(MatchReason::Manual),
            user_overridden: false,
        });
    }
    Ok(MatchUpdate {
        matched_sku: sku.to_string(),
        match_confidence: 1.0,
        match_reason: MatchReason::Manual,
        user_overridden: true,
    })
}
