use async_trait::async_trait;
use rust_decimal::Decimal;

use tessera_core::{Catalog, CatalogError, CatalogItem, Money};

use crate::db::{parse_decimal, DbPool};

/// Catalog collaborator backed by the local `products` table. Hosts with a
/// remote catalog service swap in their own `Catalog` impl; the engine only
/// sees the trait.
pub struct SqlCatalog {
    pool: DbPool,
}

impl SqlCatalog {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct ProductRow {
    sku: String,
    name: String,
    unit: String,
    barcode: Option<String>,
    vendor_ref: Option<String>,
    on_hand: String,
    avg_cost_cents: i64,
}

impl From<ProductRow> for CatalogItem {
    fn from(r: ProductRow) -> Self {
        CatalogItem {
            sku: r.sku,
            name: r.name,
            unit: r.unit,
            barcode: r.barcode,
            vendor_ref: r.vendor_ref,
            on_hand: parse_decimal(&r.on_hand),
            avg_cost: Money::from_cents(r.avg_cost_cents),
        }
    }
}

const PRODUCT_COLS: &str = "sku, name, unit, barcode, vendor_ref, on_hand, avg_cost_cents";

pub async fn upsert_product(pool: &DbPool, item: &CatalogItem) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO products (sku, name, unit, barcode, vendor_ref, on_hand, avg_cost_cents)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT (sku) DO UPDATE SET
            name = excluded.name,
            unit = excluded.unit,
            barcode = excluded.barcode,
            vendor_ref = excluded.vendor_ref,
            on_hand = excluded.on_hand,
            avg_cost_cents = excluded.avg_cost_cents
        "#,
    )
    .bind(&item.sku)
    .bind(&item.name)
    .bind(&item.unit)
    .bind(&item.barcode)
    .bind(&item.vendor_ref)
    .bind(item.on_hand.to_string())
    .bind(item.avg_cost.to_cents())
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn get_product(pool: &DbPool, sku: &str) -> Result<Option<CatalogItem>, sqlx::Error> {
    let row = sqlx::query_as::<_, ProductRow>(&format!(
        "SELECT {PRODUCT_COLS} FROM products WHERE sku = ?"
    ))
    .bind(sku)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(CatalogItem::from))
}

fn unavailable(e: sqlx::Error) -> CatalogError {
    CatalogError::Unavailable(e.to_string())
}

#[async_trait]
impl Catalog for SqlCatalog {
    /// Coarse recall: any of the first three query tokens appearing in the
    /// product name. The matcher re-scores, so precision here is cheap.
    async fn search_by_text(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<CatalogItem>, CatalogError> {
        let needle = query.to_lowercase();
        let mut tokens: Vec<&str> = needle.split_whitespace().take(3).collect();
        if tokens.is_empty() {
            return Ok(Vec::new());
        }
        while tokens.len() < 3 {
            tokens.push(tokens[0]);
        }

        let rows = sqlx::query_as::<_, ProductRow>(&format!(
            "SELECT {PRODUCT_COLS} FROM products \
             WHERE lower(name) LIKE ? OR lower(name) LIKE ? OR lower(name) LIKE ? \
             ORDER BY sku LIMIT ?"
        ))
        .bind(format!("%{}%", tokens[0]))
        .bind(format!("%{}%", tokens[1]))
        .bind(format!("%{}%", tokens[2]))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(unavailable)?;
        Ok(rows.into_iter().map(CatalogItem::from).collect())
    }

    async fn find_by_code(&self, code: &str) -> Result<Option<CatalogItem>, CatalogError> {
        let row = sqlx::query_as::<_, ProductRow>(&format!(
            "SELECT {PRODUCT_COLS} FROM products \
             WHERE sku = ? OR barcode = ? OR vendor_ref = ? LIMIT 1"
        ))
        .bind(code)
        .bind(code)
        .bind(code)
        .fetch_optional(&self.pool)
        .await
        .map_err(unavailable)?;
        Ok(row.map(CatalogItem::from))
    }

    async fn apply_receiving(
        &self,
        sku: &str,
        qty_delta: Decimal,
        new_avg_cost: Money,
    ) -> Result<(), CatalogError> {
        let mut tx = self.pool.begin().await.map_err(unavailable)?;

        let row: Option<(String,)> = sqlx::query_as("SELECT on_hand FROM products WHERE sku = ?")
            .bind(sku)
            .fetch_optional(&mut *tx)
            .await
            .map_err(unavailable)?;
        let Some((on_hand,)) = row else {
            return Err(CatalogError::UnknownSku(sku.to_string()));
        };

        let new_on_hand = parse_decimal(&on_hand) + qty_delta;
        sqlx::query("UPDATE products SET on_hand = ?, avg_cost_cents = ? WHERE sku = ?")
            .bind(new_on_hand.to_string())
            .bind(new_avg_cost.to_cents())
            .bind(sku)
            .execute(&mut *tx)
            .await
            .map_err(unavailable)?;

        tx.commit().await.map_err(unavailable)
    }
}
