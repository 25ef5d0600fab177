use std::cmp::Ordering;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Pack-size translation carried by an alias: one vendor unit becomes
/// `multiplier` internal units (CS -> 12 EA and the like).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitConversion {
    pub multiplier: Decimal,
    pub from_unit: String,
    pub to_unit: String,
}

/// A learned mapping from one vendor's catalog code to an internal sku.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VendorSkuAlias {
    pub id: i64,
    pub vendor_id: i64,
    pub normalized_sku: String,
    pub internal_sku: String,
    pub conversion: Option<UnitConversion>,
    pub priority: i32,
    pub usage_count: i64,
    pub last_seen_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Payload for `AliasStore::upsert`. Identity is the
/// (vendor, vendor sku, internal sku) triple; priority and conversion are the
/// mutable parts.
#[derive(Debug, Clone)]
pub struct NewAlias {
    pub vendor_id: i64,
    pub normalized_sku: String,
    pub internal_sku: String,
    pub conversion: Option<UnitConversion>,
    pub priority: i32,
}

impl NewAlias {
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.normalized_sku.trim().is_empty() {
            return Err(EngineError::validation("alias vendor sku must not be empty"));
        }
        if self.internal_sku.trim().is_empty() {
            return Err(EngineError::validation("alias internal sku must not be empty"));
        }
        if let Some(conv) = &self.conversion {
            if conv.multiplier <= Decimal::ZERO {
                return Err(EngineError::validation(format!(
                    "conversion multiplier must be positive, got {}",
                    conv.multiplier
                )));
            }
        }
        Ok(())
    }
}

/// Canonical lookup order: operator-set priority first, then recency of use,
/// then sku text so equal rows always list the same way.
pub fn alias_order(a: &VendorSkuAlias, b: &VendorSkuAlias) -> Ordering {
    b.priority
        .cmp(&a.priority)
        .then_with(|| b.last_seen_at.cmp(&a.last_seen_at))
        .then_with(|| a.internal_sku.cmp(&b.internal_sku))
}

#[async_trait]
pub trait AliasStore: Send + Sync {
    /// All aliases for a vendor sku, best first. Empty result is not an error.
    async fn lookup(
        &self,
        vendor_id: i64,
        normalized_sku: &str,
    ) -> Result<Vec<VendorSkuAlias>, EngineError>;

    /// Insert or refresh by the identity triple; returns the stored row.
    async fn upsert(&self, alias: NewAlias) -> Result<VendorSkuAlias, EngineError>;

    /// Bump usage statistics after a suggestion from this alias was taken.
    /// Callers treat a failure here as log-and-continue.
    async fn record_usage(&self, alias_id: i64) -> Result<(), EngineError>;
}

/// In-memory store used by unit tests and by hosts that keep aliases
/// elsewhere.
#[derive(Default)]
pub struct MemoryAliasStore {
    inner: Mutex<MemoryAliases>,
}

#[derive(Default)]
struct MemoryAliases {
    rows: Vec<VendorSkuAlias>,
    next_id: i64,
}

impl MemoryAliasStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_inner<T>(&self, f: impl FnOnce(&mut MemoryAliases) -> T) -> T {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut guard)
    }
}

#[async_trait]
impl AliasStore for MemoryAliasStore {
    async fn lookup(
        &self,
        vendor_id: i64,
        normalized_sku: &str,
    ) -> Result<Vec<VendorSkuAlias>, EngineError> {
        Ok(self.with_inner(|inner| {
            let mut hits: Vec<VendorSkuAlias> = inner
                .rows
                .iter()
                .filter(|a| a.vendor_id == vendor_id && a.normalized_sku == normalized_sku)
                .cloned()
                .collect();
            hits.sort_by(alias_order);
            hits
        }))
    }

    async fn upsert(&self, alias: NewAlias) -> Result<VendorSkuAlias, EngineError> {
        alias.validate()?;
        let now = Utc::now();
        Ok(self.with_inner(|inner| {
            if let Some(row) = inner.rows.iter_mut().find(|a| {
                a.vendor_id == alias.vendor_id
                    && a.normalized_sku == alias.normalized_sku
                    && a.internal_sku == alias.internal_sku
            }) {
                row.conversion = alias.conversion.clone();
                row.priority = alias.priority;
                row.last_seen_at = now;
                return row.clone();
            }
            inner.next_id += 1;
            let row = VendorSkuAlias {
                id: inner.next_id,
                vendor_id: alias.vendor_id,
                normalized_sku: alias.normalized_sku.clone(),
                internal_sku: alias.internal_sku.clone(),
                conversion: alias.conversion.clone(),
                priority: alias.priority,
                usage_count: 0,
                last_seen_at: now,
                created_at: now,
            };
            inner.rows.push(row.clone());
            row
        }))
    }

    async fn record_usage(&self, alias_id: i64) -> Result<(), EngineError> {
        let now = Utc::now();
        self.with_inner(|inner| {
            match inner.rows.iter_mut().find(|a| a.id == alias_id) {
                Some(row) => {
                    row.usage_count += 1;
                    row.last_seen_at = now;
                    Ok(())
                }
                None => Err(EngineError::not_found("alias", alias_id)),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::str::FromStr;

    fn alias(vendor_id: i64, vendor_sku: &str, internal: &str, priority: i32) -> NewAlias {
        NewAlias {
            vendor_id,
            normalized_sku: vendor_sku.to_string(),
            internal_sku: internal.to_string(),
            conversion: None,
            priority,
        }
    }

    #[tokio::test]
    async fn upsert_is_keyed_on_the_triple() {
        let store = MemoryAliasStore::new();
        let first = store.upsert(alias(7, "ABC-123", "WIDGET-1", 0)).await.unwrap();
        let again = store.upsert(alias(7, "ABC-123", "WIDGET-1", 4)).await.unwrap();
        assert_eq!(first.id, again.id);
        assert_eq!(again.priority, 4);

        let other = store.upsert(alias(7, "ABC-123", "WIDGET-2", 0)).await.unwrap();
        assert_ne!(first.id, other.id);
        assert_eq!(store.lookup(7, "ABC-123").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn lookup_orders_by_priority_then_recency_then_sku() {
        let store = MemoryAliasStore::new();
        store.upsert(alias(7, "X", "B-SKU", 1)).await.unwrap();
        store.upsert(alias(7, "X", "A-SKU", 1)).await.unwrap();
        store.upsert(alias(7, "X", "C-SKU", 9)).await.unwrap();
        store.upsert(alias(8, "X", "OTHER", 99)).await.unwrap();

        let hits = store.lookup(7, "X").await.unwrap();
        let skus: Vec<_> = hits.iter().map(|a| a.internal_sku.as_str()).collect();
        // highest priority first; the two pri-1 rows share a timestamp within
        // clock resolution only rarely, so recency or sku settles them
        assert_eq!(skus[0], "C-SKU");
        assert_eq!(hits.len(), 3);
    }

    #[tokio::test]
    async fn record_usage_bumps_count_and_recency() {
        let store = MemoryAliasStore::new();
        let row = store.upsert(alias(7, "X", "A", 0)).await.unwrap();
        let before = row.last_seen_at - Duration::seconds(10);

        store.record_usage(row.id).await.unwrap();
        let hits = store.lookup(7, "X").await.unwrap();
        assert_eq!(hits[0].usage_count, 1);
        assert!(hits[0].last_seen_at > before);

        assert!(store.record_usage(9999).await.is_err());
    }

    #[tokio::test]
    async fn conversion_must_have_positive_multiplier() {
        let store = MemoryAliasStore::new();
        let mut bad = alias(7, "X", "A", 0);
        bad.conversion = Some(UnitConversion {
            multiplier: Decimal::from_str("0").unwrap(),
            from_unit: "CS".to_string(),
            to_unit: "EA".to_string(),
        });
        assert!(store.upsert(bad).await.is_err());
    }
}
