use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{sqlite::SqlitePoolOptions, Pool, Sqlite};

pub type DbPool = Pool<Sqlite>;

pub async fn create_db(path: &Path) -> Result<DbPool, sqlx::Error> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect(&format!("sqlite:{}?mode=rwc", path.display()))
        .await?;

    sqlx::query("PRAGMA journal_mode = WAL")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous = NORMAL")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA busy_timeout = 5000")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA cache_size = -32000")
        .execute(&pool)
        .await?;

    run_migrations(&pool).await?;

    Ok(pool)
}

async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS vendor_bills (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            store_id INTEGER NOT NULL,
            vendor_id INTEGER NOT NULL,
            invoice_no TEXT NOT NULL,
            invoice_date TEXT,
            currency TEXT NOT NULL DEFAULT 'USD',
            subtotal_cents INTEGER,
            tax_cents INTEGER,
            total_cents INTEGER,
            content_hash TEXT NOT NULL,
            idempotency_key TEXT NOT NULL UNIQUE,
            ocr_confidence REAL NOT NULL DEFAULT 0,
            status TEXT NOT NULL DEFAULT 'draft',
            posted_at TEXT,
            posted_by TEXT,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS vendor_bill_lines (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            bill_id INTEGER NOT NULL,
            line_no INTEGER NOT NULL,
            raw_sku TEXT NOT NULL,
            normalized_sku TEXT NOT NULL,
            raw_description TEXT NOT NULL,
            raw_qty TEXT NOT NULL,
            normalized_qty TEXT NOT NULL DEFAULT '0',
            qty_parse_failed INTEGER NOT NULL DEFAULT 0,
            raw_unit TEXT,
            normalized_unit TEXT,
            unit_price_cents INTEGER NOT NULL DEFAULT 0,
            raw_ext_price_cents INTEGER,
            ext_price_cents INTEGER NOT NULL DEFAULT 0,
            suggested_sku TEXT,
            suggested_multiplier TEXT NOT NULL DEFAULT '1',
            matched_sku TEXT,
            match_confidence REAL NOT NULL DEFAULT 0,
            match_reason TEXT,
            user_overridden INTEGER NOT NULL DEFAULT 0,
            unit_multiplier TEXT NOT NULL DEFAULT '1',
            UNIQUE (bill_id, line_no),
            FOREIGN KEY (bill_id) REFERENCES vendor_bills(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS vendor_sku_aliases (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            vendor_id INTEGER NOT NULL,
            normalized_sku TEXT NOT NULL,
            internal_sku TEXT NOT NULL,
            multiplier TEXT,
            from_unit TEXT,
            to_unit TEXT,
            priority INTEGER NOT NULL DEFAULT 0,
            usage_count INTEGER NOT NULL DEFAULT 0,
            last_seen_at TEXT NOT NULL DEFAULT (datetime('now')),
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE (vendor_id, normalized_sku, internal_sku)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS products (
            sku TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            unit TEXT NOT NULL DEFAULT 'EA',
            barcode TEXT,
            vendor_ref TEXT,
            on_hand TEXT NOT NULL DEFAULT '0',
            avg_cost_cents INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS bill_audit_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            bill_id INTEGER NOT NULL,
            event TEXT NOT NULL,
            actor TEXT NOT NULL,
            reason TEXT,
            detail TEXT,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Timestamps are stored as sqlite `datetime('now')` text and read back as
/// UTC. Unparseable text falls back to now rather than failing the read.
pub(crate) fn parse_ts(s: &str) -> DateTime<Utc> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .map(|n| n.and_utc())
        .unwrap_or_else(|_| Utc::now())
}

pub(crate) fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()
}

/// Decimals (quantities, multipliers, stock) are stored as text to keep full
/// precision through sqlite.
pub(crate) fn parse_decimal(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap_or_default()
}
