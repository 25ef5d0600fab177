use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use tessera_core::{
    unmatched_line_nos, BillStatus, Catalog, CatalogError, CatalogItem, EngineError, Money,
    VendorBillLine,
};
use tessera_storage::{self as storage, DbPool};

/// Applies a reviewed bill to the catalog. Validation runs against a snapshot
/// of every touched item before the first write, so a bill either posts whole
/// or leaves stock untouched.
pub struct PostingService {
    pool: DbPool,
    catalog: Arc<dyn Catalog>,
    timeout: Duration,
}

#[derive(Debug, Clone, Serialize)]
pub struct PostingReceipt {
    pub bill_id: i64,
    pub posted_at: Option<DateTime<Utc>>,
    pub lines_applied: usize,
}

/// One line's receiving effect, resolved during validation. `prev_cost` is
/// what compensation restores if a later line fails.
struct LinePlan {
    line_no: i64,
    sku: String,
    qty: Decimal,
    new_cost: Money,
    prev_cost: Money,
}

/// Quantity-weighted blend of the current rolling cost and the incoming unit
/// cost. A zero receipt leaves cost alone; a catalog driven to non-positive
/// stock adopts the incoming cost outright.
pub(crate) fn weighted_avg(
    on_hand: Decimal,
    avg_cost: Money,
    qty: Decimal,
    unit_cost: Money,
) -> Money {
    if qty.is_zero() {
        return avg_cost;
    }
    let denom = on_hand + qty;
    if denom <= Decimal::ZERO {
        return unit_cost;
    }
    let blended = (on_hand * avg_cost.to_decimal() + qty * unit_cost.to_decimal()) / denom;
    Money::from_decimal(blended)
}

impl PostingService {
    pub fn new(pool: DbPool, catalog: Arc<dyn Catalog>, timeout: Duration) -> Self {
        Self {
            pool,
            catalog,
            timeout,
        }
    }

    pub async fn post(&self, bill_id: i64, actor: &str) -> Result<PostingReceipt, EngineError> {
        let bill = storage::get_bill(&self.pool, bill_id)
            .await
            .map_err(EngineError::store)?
            .ok_or_else(|| EngineError::not_found("bill", bill_id))?;

        if bill.status == BillStatus::Posted {
            return Err(EngineError::AlreadyPosted(bill_id));
        }
        bill.ensure_transition(BillStatus::Posted, "post")?;

        let lines = storage::get_lines(&self.pool, bill_id)
            .await
            .map_err(EngineError::store)?;
        if lines.is_empty() {
            return Err(EngineError::validation("cannot post a bill with no lines"));
        }
        let unmatched = unmatched_line_nos(&lines);
        if !unmatched.is_empty() {
            return Err(EngineError::UnmatchedLines(unmatched));
        }

        let plans = self.validate_lines(&lines).await?;

        let mut applied: Vec<&LinePlan> = Vec::with_capacity(plans.len());
        for plan in &plans {
            let receive = self
                .catalog
                .apply_receiving(&plan.sku, plan.qty, plan.new_cost);
            let outcome = match tokio::time::timeout(self.timeout, receive).await {
                Ok(res) => res,
                Err(_) => Err(CatalogError::Unavailable("receiving timed out".to_string())),
            };
            if let Err(e) = outcome {
                tracing::warn!(bill_id, line_no = plan.line_no, "receiving failed: {e}");
                self.compensate(&applied).await;
                return Err(receiving_error(e, plan.line_no));
            }
            applied.push(plan);
        }

        let won = storage::mark_posted(&self.pool, bill_id, actor)
            .await
            .map_err(EngineError::store)?;
        if !won {
            // someone moved the bill out of review underneath us
            self.compensate(&applied).await;
            return Err(EngineError::Conflict {
                detail: format!("bill {bill_id} left review during posting"),
                lines: Vec::new(),
            });
        }

        let posted = storage::get_bill(&self.pool, bill_id)
            .await
            .map_err(EngineError::store)?
            .ok_or_else(|| EngineError::not_found("bill", bill_id))?;
        tracing::info!(bill_id, lines = plans.len(), "bill posted");
        Ok(PostingReceipt {
            bill_id,
            posted_at: posted.posted_at,
            lines_applied: plans.len(),
        })
    }

    /// Resolve every line against the catalog before anything is written. A
    /// miss or an unreachable catalog aborts the whole bill.
    async fn validate_lines(
        &self,
        lines: &[VendorBillLine],
    ) -> Result<Vec<LinePlan>, EngineError> {
        let mut plans = Vec::with_capacity(lines.len());
        for line in lines {
            let sku = line.matched_sku.clone().unwrap_or_default();
            let item = self.snapshot(&sku, line.line_no).await?;
            let qty = line.receiving_qty();
            let unit_cost = line.receiving_unit_cost();
            plans.push(LinePlan {
                line_no: line.line_no,
                sku,
                qty,
                new_cost: weighted_avg(item.on_hand, item.avg_cost, qty, unit_cost),
                prev_cost: item.avg_cost,
            });
        }
        Ok(plans)
    }

    async fn snapshot(&self, sku: &str, line_no: i64) -> Result<CatalogItem, EngineError> {
        let lookup = self.catalog.find_by_code(sku);
        match tokio::time::timeout(self.timeout, lookup).await {
            Ok(Ok(Some(item))) => Ok(item),
            Ok(Ok(None)) => Err(EngineError::Conflict {
                detail: format!("sku {sku} is no longer in the catalog"),
                lines: vec![line_no],
            }),
            Ok(Err(e)) => Err(receiving_error(e, line_no)),
            Err(_) => Err(EngineError::Collaborator {
                detail: "catalog lookup timed out".to_string(),
                lines: vec![line_no],
            }),
        }
    }

    /// Back out receipts already applied, newest first, restoring the cost
    /// captured at validation. Failures here are logged and left for manual
    /// repair since there is nothing further to unwind into.
    async fn compensate(&self, applied: &[&LinePlan]) {
        for plan in applied.iter().rev() {
            let undo = self
                .catalog
                .apply_receiving(&plan.sku, -plan.qty, plan.prev_cost);
            match tokio::time::timeout(self.timeout, undo).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::error!(sku = %plan.sku, line_no = plan.line_no, "compensation failed: {e}")
                }
                Err(_) => {
                    tracing::error!(sku = %plan.sku, line_no = plan.line_no, "compensation timed out")
                }
            }
        }
    }
}

fn receiving_error(e: CatalogError, line_no: i64) -> EngineError {
    match e {
        CatalogError::UnknownSku(sku) => EngineError::Conflict {
            detail: format!("sku {sku} is no longer in the catalog"),
            lines: vec![line_no],
        },
        CatalogError::Unavailable(detail) => EngineError::Collaborator {
            detail,
            lines: vec![line_no],
        },
    }
}
