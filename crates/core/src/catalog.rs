use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::money::Money;

#[derive(Debug, Clone, Error)]
pub enum CatalogError {
    #[error("sku {0} not in catalog")]
    UnknownSku(String),
    #[error("catalog unavailable: {0}")]
    Unavailable(String),
}

/// One catalog entry as the engine sees it. Stock and rolling cost feed the
/// receiving math; barcode and vendor ref widen the exact-match net.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogItem {
    pub sku: String,
    pub name: String,
    pub unit: String,
    pub barcode: Option<String>,
    pub vendor_ref: Option<String>,
    pub on_hand: Decimal,
    pub avg_cost: Money,
}

/// The product catalog collaborator. These three calls are the engine's whole
/// surface against it; everything else about products lives outside.
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Coarse text recall for fuzzy matching; the matcher re-scores hits.
    async fn search_by_text(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<CatalogItem>, CatalogError>;

    /// Exact lookup across sku, barcode and vendor reference.
    async fn find_by_code(&self, code: &str) -> Result<Option<CatalogItem>, CatalogError>;

    /// Receive `qty_delta` units and move the rolling average cost to
    /// `new_avg_cost`. Negative deltas back a receipt out.
    async fn apply_receiving(
        &self,
        sku: &str,
        qty_delta: Decimal,
        new_avg_cost: Money,
    ) -> Result<(), CatalogError>;
}

/// In-memory catalog for unit tests and embedded hosts.
#[derive(Default)]
pub struct MemoryCatalog {
    items: Mutex<BTreeMap<String, CatalogItem>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, item: CatalogItem) {
        let mut items = self.items.lock().unwrap_or_else(|e| e.into_inner());
        items.insert(item.sku.clone(), item);
    }

    pub fn get(&self, sku: &str) -> Option<CatalogItem> {
        let items = self.items.lock().unwrap_or_else(|e| e.into_inner());
        items.get(sku).cloned()
    }
}

#[async_trait]
impl Catalog for MemoryCatalog {
    async fn search_by_text(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<CatalogItem>, CatalogError> {
        let needle = query.to_lowercase();
        let tokens: Vec<&str> = needle.split_whitespace().collect();
        let items = self.items.lock().unwrap_or_else(|e| e.into_inner());
        let hits = items
            .values()
            .filter(|item| {
                let name = item.name.to_lowercase();
                tokens.iter().any(|t| name.contains(t))
            })
            .take(limit)
            .cloned()
            .collect();
        Ok(hits)
    }

    async fn find_by_code(&self, code: &str) -> Result<Option<CatalogItem>, CatalogError> {
        let items = self.items.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(item) = items.get(code) {
            return Ok(Some(item.clone()));
        }
        Ok(items
            .values()
            .find(|item| {
                item.barcode.as_deref() == Some(code) || item.vendor_ref.as_deref() == Some(code)
            })
            .cloned())
    }

    async fn apply_receiving(
        &self,
        sku: &str,
        qty_delta: Decimal,
        new_avg_cost: Money,
    ) -> Result<(), CatalogError> {
        let mut items = self.items.lock().unwrap_or_else(|e| e.into_inner());
        let item = items
            .get_mut(sku)
            .ok_or_else(|| CatalogError::UnknownSku(sku.to_string()))?;
        item.on_hand += qty_delta;
        item.avg_cost = new_avg_cost;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(sku: &str, name: &str, on_hand: i64, cost_cents: i64) -> CatalogItem {
        CatalogItem {
            sku: sku.to_string(),
            name: name.to_string(),
            unit: "EA".to_string(),
            barcode: None,
            vendor_ref: None,
            on_hand: Decimal::from(on_hand),
            avg_cost: Money::from_cents(cost_cents),
        }
    }

    #[tokio::test]
    async fn find_by_code_checks_sku_barcode_and_vendor_ref() {
        let catalog = MemoryCatalog::new();
        let mut widget = item("WIDGET-1", "Widget", 10, 100);
        widget.barcode = Some("0012345".to_string());
        widget.vendor_ref = Some("V-88".to_string());
        catalog.insert(widget);

        for code in ["WIDGET-1", "0012345", "V-88"] {
            let hit = catalog.find_by_code(code).await.unwrap();
            assert_eq!(hit.unwrap().sku, "WIDGET-1");
        }
        assert!(catalog.find_by_code("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn receiving_moves_stock_and_cost() {
        let catalog = MemoryCatalog::new();
        catalog.insert(item("WIDGET-1", "Widget", 10, 100));

        catalog
            .apply_receiving("WIDGET-1", Decimal::from(5), Money::from_cents(120))
            .await
            .unwrap();
        let after = catalog.get("WIDGET-1").unwrap();
        assert_eq!(after.on_hand, Decimal::from(15));
        assert_eq!(after.avg_cost, Money::from_cents(120));

        let missing = catalog
            .apply_receiving("GHOST", Decimal::from(1), Money::zero())
            .await;
        assert!(matches!(missing, Err(CatalogError::UnknownSku(_))));
    }

    #[tokio::test]
    async fn text_search_matches_any_token() {
        let catalog = MemoryCatalog::new();
        catalog.insert(item("PAPER-A4", "Copy Paper A4 Ream", 0, 0));
        catalog.insert(item("TONER-BK", "Toner Cartridge Black", 0, 0));

        let hits = catalog.search_by_text("ream paper", 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].sku, "PAPER-A4");
    }
}
