use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use rust_decimal::Decimal;
use tokio::sync::{Mutex, OwnedMutexGuard};

use tessera_core::{
    accept_candidates, plan_match_update, AliasStore, AuditEntry, AuditEvent, AuditSink,
    BillStatus, Catalog, EngineError, MatchCandidate, MatchReason, NewAlias, UnitConversion,
    VendorBill, VendorBillLine, VendorSkuAlias,
};
use tessera_match::{normalize, Matcher, MatcherConfig};
use tessera_storage::{self as storage, DbPool};

use crate::posting::{PostingReceipt, PostingService};

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Bound on every catalog call, both matching and posting.
    pub catalog_timeout: Duration,
    /// Candidates returned by `suggest` when the caller does not say.
    pub suggest_limit: usize,
    /// Fuzzy floor handed to the matcher.
    pub min_similarity: f32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            catalog_timeout: Duration::from_secs(5),
            suggest_limit: 5,
            min_similarity: 0.40,
        }
    }
}

/// The reconciliation façade. One instance serves every bill; mutating
/// operations on the same bill are serialized through a per-bill lock so a
/// reopen and a post cannot interleave.
pub struct Reconciler {
    pool: DbPool,
    aliases: Arc<dyn AliasStore>,
    catalog: Arc<dyn Catalog>,
    audit: Arc<dyn AuditSink>,
    matcher: Matcher,
    locks: DashMap<i64, Arc<Mutex<()>>>,
    config: EngineConfig,
}

impl Reconciler {
    pub fn new(
        pool: DbPool,
        aliases: Arc<dyn AliasStore>,
        catalog: Arc<dyn Catalog>,
        audit: Arc<dyn AuditSink>,
        config: EngineConfig,
    ) -> Self {
        let matcher = Matcher::new(
            aliases.clone(),
            catalog.clone(),
            MatcherConfig {
                catalog_timeout: config.catalog_timeout,
                min_similarity: config.min_similarity,
                ..MatcherConfig::default()
            },
        );
        Self {
            pool,
            aliases,
            catalog,
            audit,
            matcher,
            locks: DashMap::new(),
            config,
        }
    }

    pub(crate) fn pool(&self) -> &DbPool {
        &self.pool
    }

    pub(crate) fn matcher(&self) -> &Matcher {
        &self.matcher
    }

    pub(crate) fn aliases(&self) -> &Arc<dyn AliasStore> {
        &self.aliases
    }

    /// Audit failures never fail the operation that produced them.
    pub(crate) async fn record_audit(&self, entry: AuditEntry) {
        if let Err(e) = self.audit.record(entry).await {
            tracing::warn!("audit write failed: {e}");
        }
    }

    async fn lock_bill(&self, bill_id: i64) -> OwnedMutexGuard<()> {
        let cell = {
            let entry = self.locks.entry(bill_id).or_default();
            entry.value().clone()
        };
        cell.lock_owned().await
    }

    async fn fetch_bill(&self, bill_id: i64) -> Result<VendorBill, EngineError> {
        storage::get_bill(&self.pool, bill_id)
            .await
            .map_err(EngineError::store)?
            .ok_or_else(|| EngineError::not_found("bill", bill_id))
    }

    async fn fetch_line(&self, bill_id: i64, line_no: i64) -> Result<VendorBillLine, EngineError> {
        storage::get_line(&self.pool, bill_id, line_no)
            .await
            .map_err(EngineError::store)?
            .ok_or_else(|| EngineError::not_found("line", line_no))
    }

    pub async fn bill(
        &self,
        bill_id: i64,
    ) -> Result<(VendorBill, Vec<VendorBillLine>), EngineError> {
        let bill = self.fetch_bill(bill_id).await?;
        let lines = storage::get_lines(&self.pool, bill_id)
            .await
            .map_err(EngineError::store)?;
        Ok((bill, lines))
    }

    pub async fn bills(&self, store_id: i64) -> Result<Vec<VendorBill>, EngineError> {
        storage::list_bills(&self.pool, store_id)
            .await
            .map_err(EngineError::store)
    }

    /// Trail of state changes as persisted by the bundled audit sink.
    pub async fn audit_log(&self, bill_id: i64) -> Result<Vec<AuditEntry>, EngineError> {
        self.fetch_bill(bill_id).await?;
        storage::get_audit_log(&self.pool, bill_id)
            .await
            .map_err(EngineError::store)
    }

    /// Fresh ranked candidates for one line. Read-only; safe to abandon.
    pub async fn suggest(
        &self,
        bill_id: i64,
        line_no: i64,
        limit: Option<usize>,
    ) -> Result<Vec<MatchCandidate>, EngineError> {
        let bill = self.fetch_bill(bill_id).await?;
        let line = self.fetch_line(bill_id, line_no).await?;
        let norm = normalize(
            &line.raw_sku,
            &line.raw_description,
            &line.raw_qty,
            line.raw_unit.as_deref(),
        );
        let limit = limit.unwrap_or(self.config.suggest_limit);
        self.matcher.suggest(&norm, bill.vendor_id, limit).await
    }

    /// Commit a match on one line. Confirming the standing suggestion keeps
    /// its confidence, reason and conversion; any other sku is a manual
    /// override at full confidence with no conversion.
    pub async fn update_match(
        &self,
        bill_id: i64,
        line_no: i64,
        internal_sku: &str,
        actor: &str,
    ) -> Result<VendorBillLine, EngineError> {
        let _guard = self.lock_bill(bill_id).await;
        let bill = self.fetch_bill(bill_id).await?;
        bill.ensure_editable("update line match")?;
        let line = self.fetch_line(bill_id, line_no).await?;

        let update = plan_match_update(&line, internal_sku)?;
        let multiplier = if update.user_overridden {
            Decimal::ONE
        } else {
            storage::get_suggested_multiplier(&self.pool, line.id)
                .await
                .map_err(EngineError::store)?
        };
        storage::commit_line_match(
            &self.pool,
            line.id,
            &update.matched_sku,
            f64::from(update.match_confidence),
            update.match_reason,
            update.user_overridden,
            multiplier,
        )
        .await
        .map_err(EngineError::store)?;

        self.record_audit(
            AuditEntry::new(bill_id, AuditEvent::Matched, actor)
                .with_detail(format!("line {line_no} -> {}", update.matched_sku)),
        )
        .await;
        self.fetch_line(bill_id, line_no).await
    }

    /// Commit every untouched high-band suggestion. Returns how many lines
    /// changed; zero qualifying lines is a no-op, not an error.
    pub async fn accept_high_confidence(
        &self,
        bill_id: i64,
        actor: &str,
    ) -> Result<usize, EngineError> {
        let _guard = self.lock_bill(bill_id).await;
        let bill = self.fetch_bill(bill_id).await?;
        bill.ensure_editable("accept suggestions")?;
        let lines = storage::get_lines(&self.pool, bill_id)
            .await
            .map_err(EngineError::store)?;

        let picks = accept_candidates(&lines);
        for line in &picks {
            let sku = line.suggested_sku.clone().unwrap_or_default();
            let multiplier = storage::get_suggested_multiplier(&self.pool, line.id)
                .await
                .map_err(EngineError::store)?;
            storage::commit_line_match(
                &self.pool,
                line.id,
                &sku,
                f64::from(line.match_confidence),
                line.match_reason.unwrap_or(MatchReason::Manual),
                false,
                multiplier,
            )
            .await
            .map_err(EngineError::store)?;
        }

        if !picks.is_empty() {
            self.record_audit(
                AuditEntry::new(bill_id, AuditEvent::Matched, actor)
                    .with_detail(format!("accepted {} high confidence suggestions", picks.len())),
            )
            .await;
        }
        Ok(picks.len())
    }

    /// Learn an alias from a confirmed suggestion so the next bill from this
    /// vendor resolves the line automatically. Overridden lines are refused;
    /// one-off corrections do not generalize.
    pub async fn create_alias(
        &self,
        bill_id: i64,
        line_no: i64,
        actor: &str,
    ) -> Result<VendorSkuAlias, EngineError> {
        let _guard = self.lock_bill(bill_id).await;
        let bill = self.fetch_bill(bill_id).await?;
        let line = self.fetch_line(bill_id, line_no).await?;

        let Some(internal_sku) = line.matched_sku.clone().filter(|s| !s.is_empty()) else {
            return Err(EngineError::validation(
                "line has no committed match to learn from",
            ));
        };
        if line.user_overridden {
            return Err(EngineError::validation(
                "cannot create an alias from a manual override",
            ));
        }

        let conversion = if line.unit_multiplier == Decimal::ONE {
            None
        } else {
            Some(UnitConversion {
                multiplier: line.unit_multiplier,
                from_unit: line
                    .normalized_unit
                    .clone()
                    .unwrap_or_else(|| "EA".to_string()),
                to_unit: self.internal_unit(&internal_sku).await,
            })
        };

        // a new mapping for the pair must outrank the standing one; the same
        // mapping just refreshes in place
        let existing = self
            .aliases
            .lookup(bill.vendor_id, &line.normalized_sku)
            .await?;
        let priority = match existing.first() {
            Some(top) if top.internal_sku == internal_sku => top.priority,
            Some(top) => top.priority + 1,
            None => 0,
        };

        let alias = self
            .aliases
            .upsert(NewAlias {
                vendor_id: bill.vendor_id,
                normalized_sku: line.normalized_sku.clone(),
                internal_sku: internal_sku.clone(),
                conversion,
                priority,
            })
            .await?;

        self.record_audit(
            AuditEntry::new(bill_id, AuditEvent::AliasCreated, actor).with_detail(format!(
                "line {line_no}: {} -> {internal_sku}",
                line.normalized_sku
            )),
        )
        .await;
        Ok(alias)
    }

    async fn internal_unit(&self, sku: &str) -> String {
        let lookup = self.catalog.find_by_code(sku);
        match tokio::time::timeout(self.config.catalog_timeout, lookup).await {
            Ok(Ok(Some(item))) => item.unit,
            _ => "EA".to_string(),
        }
    }

    /// Apply the bill to inventory. All lines must carry a committed match;
    /// the posting service re-validates under the hood.
    pub async fn post(&self, bill_id: i64, actor: &str) -> Result<PostingReceipt, EngineError> {
        let _guard = self.lock_bill(bill_id).await;
        let service = PostingService::new(
            self.pool.clone(),
            self.catalog.clone(),
            self.config.catalog_timeout,
        );
        let receipt = service.post(bill_id, actor).await?;
        self.record_audit(
            AuditEntry::new(bill_id, AuditEvent::Posted, actor)
                .with_detail(format!("{} lines applied", receipt.lines_applied)),
        )
        .await;
        Ok(receipt)
    }

    /// Put a posted bill back into review for correction. Inventory applied
    /// by the original posting stays as-is; a later post applies the bill
    /// again from current state.
    pub async fn reopen(
        &self,
        bill_id: i64,
        reason: Option<&str>,
        actor: &str,
    ) -> Result<VendorBill, EngineError> {
        let _guard = self.lock_bill(bill_id).await;
        let bill = self.fetch_bill(bill_id).await?;
        if bill.status != BillStatus::Posted {
            return Err(EngineError::InvalidState {
                status: bill.status,
                operation: "reopen",
            });
        }
        let won = storage::clear_posted(&self.pool, bill_id)
            .await
            .map_err(EngineError::store)?;
        if !won {
            return Err(EngineError::conflict(
                format!("bill {bill_id} changed state during reopen"),
                Vec::new(),
            ));
        }

        let mut entry = AuditEntry::new(bill_id, AuditEvent::Reopened, actor);
        if let Some(reason) = reason.filter(|r| !r.trim().is_empty()) {
            entry = entry.with_reason(reason.trim());
        }
        self.record_audit(entry).await;
        self.fetch_bill(bill_id).await
    }

    /// Discard a bill that never posted. Terminal; the record stays for the
    /// trail but the engine will not touch it again.
    pub async fn void(
        &self,
        bill_id: i64,
        reason: Option<&str>,
        actor: &str,
    ) -> Result<VendorBill, EngineError> {
        let _guard = self.lock_bill(bill_id).await;
        let bill = self.fetch_bill(bill_id).await?;
        bill.ensure_transition(BillStatus::Void, "void")?;
        let won = storage::mark_void(&self.pool, bill_id)
            .await
            .map_err(EngineError::store)?;
        if !won {
            return Err(EngineError::conflict(
                format!("bill {bill_id} changed state during void"),
                Vec::new(),
            ));
        }

        let mut entry = AuditEntry::new(bill_id, AuditEvent::Voided, actor);
        if let Some(reason) = reason.filter(|r| !r.trim().is_empty()) {
            entry = entry.with_reason(reason.trim());
        }
        self.record_audit(entry).await;
        self.fetch_bill(bill_id).await
    }
}
