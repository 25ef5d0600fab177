use async_trait::async_trait;
use rust_decimal::Decimal;

use tessera_core::{AliasStore, EngineError, NewAlias, UnitConversion, VendorSkuAlias};

use crate::db::{parse_decimal, parse_ts, DbPool};

/// Alias store backed by the engine database.
pub struct SqliteAliasStore {
    pool: DbPool,
}

impl SqliteAliasStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct AliasRow {
    id: i64,
    vendor_id: i64,
    normalized_sku: String,
    internal_sku: String,
    multiplier: Option<String>,
    from_unit: Option<String>,
    to_unit: Option<String>,
    priority: i32,
    usage_count: i64,
    last_seen_at: String,
    created_at: String,
}

impl From<AliasRow> for VendorSkuAlias {
    fn from(r: AliasRow) -> Self {
        let conversion = r.multiplier.as_deref().map(|m| UnitConversion {
            multiplier: parse_decimal(m),
            from_unit: r.from_unit.clone().unwrap_or_default(),
            to_unit: r.to_unit.clone().unwrap_or_default(),
        });
        VendorSkuAlias {
            id: r.id,
            vendor_id: r.vendor_id,
            normalized_sku: r.normalized_sku,
            internal_sku: r.internal_sku,
            conversion,
            priority: r.priority,
            usage_count: r.usage_count,
            last_seen_at: parse_ts(&r.last_seen_at),
            created_at: parse_ts(&r.created_at),
        }
    }
}

const ALIAS_COLS: &str = "id, vendor_id, normalized_sku, internal_sku, multiplier, \
     from_unit, to_unit, priority, usage_count, last_seen_at, created_at";

async fn fetch_alias(pool: &DbPool, id: i64) -> Result<VendorSkuAlias, EngineError> {
    let row = sqlx::query_as::<_, AliasRow>(&format!(
        "SELECT {ALIAS_COLS} FROM vendor_sku_aliases WHERE id = ?"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await
    .map_err(EngineError::store)?;
    row.map(VendorSkuAlias::from)
        .ok_or_else(|| EngineError::not_found("alias", id))
}

#[async_trait]
impl AliasStore for SqliteAliasStore {
    async fn lookup(
        &self,
        vendor_id: i64,
        normalized_sku: &str,
    ) -> Result<Vec<VendorSkuAlias>, EngineError> {
        let rows = sqlx::query_as::<_, AliasRow>(&format!(
            "SELECT {ALIAS_COLS} FROM vendor_sku_aliases \
             WHERE vendor_id = ? AND normalized_sku = ? \
             ORDER BY priority DESC, last_seen_at DESC, internal_sku ASC"
        ))
        .bind(vendor_id)
        .bind(normalized_sku)
        .fetch_all(&self.pool)
        .await
        .map_err(EngineError::store)?;
        Ok(rows.into_iter().map(VendorSkuAlias::from).collect())
    }

    async fn upsert(&self, alias: NewAlias) -> Result<VendorSkuAlias, EngineError> {
        alias.validate()?;
        let (multiplier, from_unit, to_unit) = match &alias.conversion {
            Some(c) => (
                Some(c.multiplier.to_string()),
                Some(c.from_unit.clone()),
                Some(c.to_unit.clone()),
            ),
            None => (None, None, None),
        };

        let (id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO vendor_sku_aliases
                (vendor_id, normalized_sku, internal_sku, multiplier, from_unit,
                 to_unit, priority)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (vendor_id, normalized_sku, internal_sku) DO UPDATE SET
                multiplier = excluded.multiplier,
                from_unit = excluded.from_unit,
                to_unit = excluded.to_unit,
                priority = excluded.priority,
                last_seen_at = datetime('now')
            RETURNING id
            "#,
        )
        .bind(alias.vendor_id)
        .bind(&alias.normalized_sku)
        .bind(&alias.internal_sku)
        .bind(multiplier)
        .bind(from_unit)
        .bind(to_unit)
        .bind(alias.priority)
        .fetch_one(&self.pool)
        .await
        .map_err(EngineError::store)?;

        fetch_alias(&self.pool, id).await
    }

    async fn record_usage(&self, alias_id: i64) -> Result<(), EngineError> {
        let res = sqlx::query(
            "UPDATE vendor_sku_aliases \
             SET usage_count = usage_count + 1, last_seen_at = datetime('now') \
             WHERE id = ?",
        )
        .bind(alias_id)
        .execute(&self.pool)
        .await
        .map_err(EngineError::store)?;
        if res.rows_affected() == 0 {
            return Err(EngineError::not_found("alias", alias_id));
        }
        Ok(())
    }
}
