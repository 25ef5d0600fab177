use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use tessera_core::{
    AuditEntry, AuditEvent, BillStatus, EngineError, MatchReason, Money, VendorBill,
    VendorBillLine,
};
use tessera_match::normalize;
use tessera_storage::{self as storage, NewBill, NewLine};

use crate::service::Reconciler;

fn default_currency() -> String {
    "USD".to_string()
}

/// Output of the upstream document/OCR pipeline for one vendor bill. The
/// engine trusts these fields as given and never re-runs extraction.
#[derive(Debug, Clone, Deserialize)]
pub struct ParsedBill {
    pub store_id: i64,
    pub vendor_id: i64,
    pub invoice_no: String,
    #[serde(default)]
    pub invoice_date: Option<NaiveDate>,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default)]
    pub subtotal_cents: Option<i64>,
    #[serde(default)]
    pub tax_cents: Option<i64>,
    #[serde(default)]
    pub total_cents: Option<i64>,
    /// Digest of the source document, computed by the document store.
    pub content_hash: String,
    #[serde(default)]
    pub ocr_confidence: f32,
    pub lines: Vec<ParsedLine>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ParsedLine {
    #[serde(default)]
    pub sku: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub qty: String,
    #[serde(default)]
    pub unit: Option<String>,
    pub unit_price_cents: i64,
    #[serde(default)]
    pub ext_price_cents: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct IngestOutcome {
    pub bill: VendorBill,
    pub lines: Vec<VendorBillLine>,
    /// The same document was ingested before; `bill` is the existing one and
    /// nothing was written.
    pub duplicate: bool,
}

/// Stable dedup key over the scoping ids and the document digest.
pub(crate) fn idempotency_key(store_id: i64, vendor_id: i64, content_hash: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(store_id.to_be_bytes());
    hasher.update(vendor_id.to_be_bytes());
    hasher.update(content_hash.as_bytes());
    let digest: [u8; 32] = hasher.finalize().into();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

fn validate(parsed: &ParsedBill) -> Result<(), EngineError> {
    if parsed.store_id <= 0 || parsed.vendor_id <= 0 {
        return Err(EngineError::validation(
            "store and vendor ids must be positive",
        ));
    }
    if parsed.invoice_no.trim().is_empty() {
        return Err(EngineError::validation("invoice number must not be empty"));
    }
    if parsed.content_hash.trim().is_empty() {
        return Err(EngineError::validation("content hash must not be empty"));
    }
    if parsed.lines.is_empty() {
        return Err(EngineError::validation("a bill needs at least one line"));
    }
    Ok(())
}

fn build_lines(parsed: &ParsedBill) -> Vec<NewLine> {
    parsed
        .lines
        .iter()
        .enumerate()
        .map(|(i, raw)| {
            let norm = normalize(&raw.sku, &raw.description, &raw.qty, raw.unit.as_deref());
            // the recomputed extension is authoritative; the printed one is
            // kept for discrepancy display
            let ext = Money::from_cents(raw.unit_price_cents).times(norm.qty);
            NewLine {
                line_no: (i + 1) as i64,
                raw_sku: raw.sku.clone(),
                normalized_sku: norm.sku,
                raw_description: raw.description.clone(),
                raw_qty: raw.qty.clone(),
                normalized_qty: norm.qty,
                qty_parse_failed: norm.qty_parse_failed,
                raw_unit: raw.unit.clone(),
                normalized_unit: norm.unit,
                unit_price_cents: raw.unit_price_cents,
                raw_ext_price_cents: raw.ext_price_cents,
                ext_price_cents: ext.to_cents(),
            }
        })
        .collect()
}

impl Reconciler {
    /// Ingest one parsed document: dedupe on the idempotency key, persist
    /// header and normalized lines, attach initial suggestions, and surface
    /// the bill in review.
    pub async fn ingest(
        &self,
        parsed: ParsedBill,
        actor: &str,
    ) -> Result<IngestOutcome, EngineError> {
        validate(&parsed)?;
        let key = idempotency_key(parsed.store_id, parsed.vendor_id, parsed.content_hash.trim());

        if let Some(existing) = storage::get_bill_by_key(self.pool(), &key)
            .await
            .map_err(EngineError::store)?
        {
            tracing::info!(bill_id = existing.id, "duplicate ingestion, returning existing bill");
            let lines = storage::get_lines(self.pool(), existing.id)
                .await
                .map_err(EngineError::store)?;
            return Ok(IngestOutcome {
                bill: existing,
                lines,
                duplicate: true,
            });
        }

        let header = NewBill {
            store_id: parsed.store_id,
            vendor_id: parsed.vendor_id,
            invoice_no: parsed.invoice_no.trim(),
            invoice_date: parsed.invoice_date,
            currency: &parsed.currency,
            subtotal_cents: parsed.subtotal_cents,
            tax_cents: parsed.tax_cents,
            total_cents: parsed.total_cents,
            content_hash: parsed.content_hash.trim(),
            idempotency_key: &key,
            ocr_confidence: parsed.ocr_confidence as f64,
        };
        let lines = build_lines(&parsed);
        let bill_id = storage::insert_bill(self.pool(), &header, &lines)
            .await
            .map_err(EngineError::store)?;

        self.record_audit(
            AuditEntry::new(bill_id, AuditEvent::Created, actor).with_detail(format!(
                "{} lines from invoice {}",
                lines.len(),
                parsed.invoice_no.trim()
            )),
        )
        .await;

        self.suggest_initial(bill_id, parsed.vendor_id).await?;

        storage::set_status(self.pool(), bill_id, BillStatus::Review)
            .await
            .map_err(EngineError::store)?;

        let bill = storage::get_bill(self.pool(), bill_id)
            .await
            .map_err(EngineError::store)?
            .ok_or_else(|| EngineError::not_found("bill", bill_id))?;
        let lines = storage::get_lines(self.pool(), bill_id)
            .await
            .map_err(EngineError::store)?;
        tracing::info!(bill_id, lines = lines.len(), "bill ingested");
        Ok(IngestOutcome {
            bill,
            lines,
            duplicate: false,
        })
    }

    /// Attach the matcher's top candidate to every line. An alias resolution
    /// counts as a use of that alias; tracking failures are logged only.
    async fn suggest_initial(&self, bill_id: i64, vendor_id: i64) -> Result<(), EngineError> {
        let lines = storage::get_lines(self.pool(), bill_id)
            .await
            .map_err(EngineError::store)?;
        for line in &lines {
            let norm = normalize(
                &line.raw_sku,
                &line.raw_description,
                &line.raw_qty,
                line.raw_unit.as_deref(),
            );
            let candidates = self.matcher().suggest(&norm, vendor_id, 1).await?;
            let Some(top) = candidates.first() else {
                continue;
            };
            let multiplier = top
                .conversion
                .as_ref()
                .map(|c| c.multiplier)
                .unwrap_or(Decimal::ONE);
            storage::set_line_suggestion(
                self.pool(),
                line.id,
                &top.internal_sku,
                f64::from(top.confidence),
                top.reason,
                multiplier,
            )
            .await
            .map_err(EngineError::store)?;

            if top.reason == MatchReason::Alias && top.confidence >= tessera_match::ALIAS_CONFIDENCE {
                if let Some(alias_id) = top.alias_id {
                    if let Err(e) = self.aliases().record_usage(alias_id).await {
                        tracing::warn!(alias_id, "usage tracking failed: {e}");
                    }
                }
            }
        }
        Ok(())
    }
}
