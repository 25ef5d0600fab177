use std::str::FromStr;

use chrono::NaiveDate;
use rust_decimal::Decimal;

use tessera_core::{BillStatus, MatchReason, Money, VendorBill, VendorBillLine};

use crate::db::{parse_date, parse_decimal, parse_ts, DbPool};

/// Insert payload for one bill header.
#[derive(Debug, Clone)]
pub struct NewBill<'a> {
    pub store_id: i64,
    pub vendor_id: i64,
    pub invoice_no: &'a str,
    pub invoice_date: Option<NaiveDate>,
    pub currency: &'a str,
    pub subtotal_cents: Option<i64>,
    pub tax_cents: Option<i64>,
    pub total_cents: Option<i64>,
    pub content_hash: &'a str,
    pub idempotency_key: &'a str,
    pub ocr_confidence: f64,
}

/// Insert payload for one line, already normalized.
#[derive(Debug, Clone)]
pub struct NewLine {
    pub line_no: i64,
    pub raw_sku: String,
    pub normalized_sku: String,
    pub raw_description: String,
    pub raw_qty: String,
    pub normalized_qty: Decimal,
    pub qty_parse_failed: bool,
    pub raw_unit: Option<String>,
    pub normalized_unit: Option<String>,
    pub unit_price_cents: i64,
    pub raw_ext_price_cents: Option<i64>,
    pub ext_price_cents: i64,
}

#[derive(sqlx::FromRow)]
struct BillRow {
    id: i64,
    store_id: i64,
    vendor_id: i64,
    invoice_no: String,
    invoice_date: Option<String>,
    currency: String,
    subtotal_cents: Option<i64>,
    tax_cents: Option<i64>,
    total_cents: Option<i64>,
    content_hash: String,
    idempotency_key: String,
    ocr_confidence: f64,
    status: String,
    posted_at: Option<String>,
    posted_by: Option<String>,
    created_at: String,
}

impl From<BillRow> for VendorBill {
    fn from(r: BillRow) -> Self {
        VendorBill {
            id: r.id,
            store_id: r.store_id,
            vendor_id: r.vendor_id,
            invoice_no: r.invoice_no,
            invoice_date: r.invoice_date.as_deref().and_then(parse_date),
            currency: r.currency,
            subtotal: r.subtotal_cents.map(Money::from_cents),
            tax: r.tax_cents.map(Money::from_cents),
            total: r.total_cents.map(Money::from_cents),
            content_hash: r.content_hash,
            idempotency_key: r.idempotency_key,
            ocr_confidence: r.ocr_confidence as f32,
            status: BillStatus::from_str(&r.status).unwrap_or(BillStatus::Draft),
            posted_at: r.posted_at.as_deref().map(parse_ts),
            posted_by: r.posted_by,
            created_at: parse_ts(&r.created_at),
        }
    }
}

#[derive(sqlx::FromRow)]
struct LineRow {
    id: i64,
    bill_id: i64,
    line_no: i64,
    raw_sku: String,
    normalized_sku: String,
    raw_description: String,
    raw_qty: String,
    normalized_qty: String,
    qty_parse_failed: i64,
    raw_unit: Option<String>,
    normalized_unit: Option<String>,
    unit_price_cents: i64,
    raw_ext_price_cents: Option<i64>,
    ext_price_cents: i64,
    suggested_sku: Option<String>,
    matched_sku: Option<String>,
    match_confidence: f64,
    match_reason: Option<String>,
    user_overridden: i64,
    unit_multiplier: String,
}

impl From<LineRow> for VendorBillLine {
    fn from(r: LineRow) -> Self {
        VendorBillLine {
            id: r.id,
            bill_id: r.bill_id,
            line_no: r.line_no,
            raw_sku: r.raw_sku,
            normalized_sku: r.normalized_sku,
            raw_description: r.raw_description,
            raw_qty: r.raw_qty,
            normalized_qty: parse_decimal(&r.normalized_qty),
            qty_parse_failed: r.qty_parse_failed != 0,
            raw_unit: r.raw_unit,
            normalized_unit: r.normalized_unit,
            unit_price: Money::from_cents(r.unit_price_cents),
            raw_ext_price: r.raw_ext_price_cents.map(Money::from_cents),
            ext_price: Money::from_cents(r.ext_price_cents),
            suggested_sku: r.suggested_sku,
            matched_sku: r.matched_sku,
            match_confidence: r.match_confidence as f32,
            match_reason: r
                .match_reason
                .as_deref()
                .and_then(|s| MatchReason::from_str(s).ok()),
            user_overridden: r.user_overridden != 0,
            unit_multiplier: parse_decimal(&r.unit_multiplier),
        }
    }
}

const BILL_COLS: &str = "id, store_id, vendor_id, invoice_no, invoice_date, currency, \
     subtotal_cents, tax_cents, total_cents, content_hash, idempotency_key, \
     ocr_confidence, status, posted_at, posted_by, created_at";

const LINE_COLS: &str = "id, bill_id, line_no, raw_sku, normalized_sku, raw_description, \
     raw_qty, normalized_qty, qty_parse_failed, raw_unit, normalized_unit, \
     unit_price_cents, raw_ext_price_cents, ext_price_cents, suggested_sku, \
     matched_sku, match_confidence, match_reason, user_overridden, unit_multiplier";

/// Insert a bill and all of its lines in one transaction; returns the new id.
pub async fn insert_bill(
    pool: &DbPool,
    bill: &NewBill<'_>,
    lines: &[NewLine],
) -> Result<i64, sqlx::Error> {
    let mut tx = pool.begin().await?;

    let res = sqlx::query(
        r#"
        INSERT INTO vendor_bills
            (store_id, vendor_id, invoice_no, invoice_date, currency,
             subtotal_cents, tax_cents, total_cents, content_hash,
             idempotency_key, ocr_confidence)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(bill.store_id)
    .bind(bill.vendor_id)
    .bind(bill.invoice_no)
    .bind(bill.invoice_date.map(|d| d.to_string()))
    .bind(bill.currency)
    .bind(bill.subtotal_cents)
    .bind(bill.tax_cents)
    .bind(bill.total_cents)
    .bind(bill.content_hash)
    .bind(bill.idempotency_key)
    .bind(bill.ocr_confidence)
    .execute(&mut *tx)
    .await?;
    let bill_id = res.last_insert_rowid();

    for line in lines {
        sqlx::query(
            r#"
            INSERT INTO vendor_bill_lines
                (bill_id, line_no, raw_sku, normalized_sku, raw_description,
                 raw_qty, normalized_qty, qty_parse_failed, raw_unit,
                 normalized_unit, unit_price_cents, raw_ext_price_cents,
                 ext_price_cents)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(bill_id)
        .bind(line.line_no)
        .bind(&line.raw_sku)
        .bind(&line.normalized_sku)
        .bind(&line.raw_description)
        .bind(&line.raw_qty)
        .bind(line.normalized_qty.to_string())
        .bind(i64::from(line.qty_parse_failed))
        .bind(&line.raw_unit)
        .bind(&line.normalized_unit)
        .bind(line.unit_price_cents)
        .bind(line.raw_ext_price_cents)
        .bind(line.ext_price_cents)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(bill_id)
}

pub async fn get_bill(pool: &DbPool, bill_id: i64) -> Result<Option<VendorBill>, sqlx::Error> {
    let row = sqlx::query_as::<_, BillRow>(&format!(
        "SELECT {BILL_COLS} FROM vendor_bills WHERE id = ?"
    ))
    .bind(bill_id)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(VendorBill::from))
}

pub async fn get_bill_by_key(
    pool: &DbPool,
    idempotency_key: &str,
) -> Result<Option<VendorBill>, sqlx::Error> {
    let row = sqlx::query_as::<_, BillRow>(&format!(
        "SELECT {BILL_COLS} FROM vendor_bills WHERE idempotency_key = ?"
    ))
    .bind(idempotency_key)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(VendorBill::from))
}

pub async fn list_bills(pool: &DbPool, store_id: i64) -> Result<Vec<VendorBill>, sqlx::Error> {
    let rows = sqlx::query_as::<_, BillRow>(&format!(
        "SELECT {BILL_COLS} FROM vendor_bills WHERE store_id = ? ORDER BY created_at DESC, id DESC"
    ))
    .bind(store_id)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(VendorBill::from).collect())
}

pub async fn get_lines(pool: &DbPool, bill_id: i64) -> Result<Vec<VendorBillLine>, sqlx::Error> {
    let rows = sqlx::query_as::<_, LineRow>(&format!(
        "SELECT {LINE_COLS} FROM vendor_bill_lines WHERE bill_id = ? ORDER BY line_no"
    ))
    .bind(bill_id)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(VendorBillLine::from).collect())
}

pub async fn get_line(
    pool: &DbPool,
    bill_id: i64,
    line_no: i64,
) -> Result<Option<VendorBillLine>, sqlx::Error> {
    let row = sqlx::query_as::<_, LineRow>(&format!(
        "SELECT {LINE_COLS} FROM vendor_bill_lines WHERE bill_id = ? AND line_no = ?"
    ))
    .bind(bill_id)
    .bind(line_no)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(VendorBillLine::from))
}

/// Record the system's top suggestion for a line without committing it.
pub async fn set_line_suggestion(
    pool: &DbPool,
    line_id: i64,
    suggested_sku: &str,
    confidence: f64,
    reason: MatchReason,
    suggested_multiplier: Decimal,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE vendor_bill_lines
        SET suggested_sku = ?, match_confidence = ?, match_reason = ?,
            suggested_multiplier = ?
        WHERE id = ?
        "#,
    )
    .bind(suggested_sku)
    .bind(confidence)
    .bind(reason.to_string())
    .bind(suggested_multiplier.to_string())
    .bind(line_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Commit a match onto a line.
pub async fn commit_line_match(
    pool: &DbPool,
    line_id: i64,
    matched_sku: &str,
    confidence: f64,
    reason: MatchReason,
    user_overridden: bool,
    unit_multiplier: Decimal,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE vendor_bill_lines
        SET matched_sku = ?, match_confidence = ?, match_reason = ?,
            user_overridden = ?, unit_multiplier = ?
        WHERE id = ?
        "#,
    )
    .bind(matched_sku)
    .bind(confidence)
    .bind(reason.to_string())
    .bind(i64::from(user_overridden))
    .bind(unit_multiplier.to_string())
    .bind(line_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// The suggestion multiplier committed alongside a suggested-sku acceptance.
pub async fn get_suggested_multiplier(
    pool: &DbPool,
    line_id: i64,
) -> Result<Decimal, sqlx::Error> {
    let (text,): (String,) =
        sqlx::query_as("SELECT suggested_multiplier FROM vendor_bill_lines WHERE id = ?")
            .bind(line_id)
            .fetch_one(pool)
            .await?;
    Ok(parse_decimal(&text))
}

pub async fn set_status(
    pool: &DbPool,
    bill_id: i64,
    status: BillStatus,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE vendor_bills SET status = ? WHERE id = ?")
        .bind(status.to_string())
        .bind(bill_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Flip review -> posted, stamping actor and time. Returns false when the
/// bill was not in review, which callers treat as a lost race.
pub async fn mark_posted(pool: &DbPool, bill_id: i64, actor: &str) -> Result<bool, sqlx::Error> {
    let res = sqlx::query(
        r#"
        UPDATE vendor_bills
        SET status = 'posted', posted_at = datetime('now'), posted_by = ?
        WHERE id = ? AND status = 'review'
        "#,
    )
    .bind(actor)
    .bind(bill_id)
    .execute(pool)
    .await?;
    Ok(res.rows_affected() == 1)
}

/// Flip posted -> review, clearing the posting stamp. Guarded like
/// `mark_posted`.
pub async fn clear_posted(pool: &DbPool, bill_id: i64) -> Result<bool, sqlx::Error> {
    let res = sqlx::query(
        r#"
        UPDATE vendor_bills
        SET status = 'review', posted_at = NULL, posted_by = NULL
        WHERE id = ? AND status = 'posted'
        "#,
    )
    .bind(bill_id)
    .execute(pool)
    .await?;
    Ok(res.rows_affected() == 1)
}

/// Void is only reachable before posting.
pub async fn mark_void(pool: &DbPool, bill_id: i64) -> Result<bool, sqlx::Error> {
    let res = sqlx::query(
        "UPDATE vendor_bills SET status = 'void' WHERE id = ? AND status IN ('draft', 'review')",
    )
    .bind(bill_id)
    .execute(pool)
    .await?;
    Ok(res.rows_affected() == 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_pool() -> (tempfile::TempDir, DbPool) {
        let dir = tempfile::tempdir().unwrap();
        let pool = crate::db::create_db(&dir.path().join("bills.db"))
            .await
            .unwrap();
        (dir, pool)
    }

    fn bill<'a>(key: &'a str) -> NewBill<'a> {
        NewBill {
            store_id: 1,
            vendor_id: 7,
            invoice_no: "INV-1001",
            invoice_date: NaiveDate::from_ymd_opt(2026, 8, 1),
            currency: "USD",
            subtotal_cents: Some(5000),
            tax_cents: Some(400),
            total_cents: Some(5400),
            content_hash: "abcd1234",
            idempotency_key: key,
            ocr_confidence: 0.91,
        }
    }

    fn line(line_no: i64, qty: &str) -> NewLine {
        NewLine {
            line_no,
            raw_sku: "abc-123".to_string(),
            normalized_sku: "ABC-123".to_string(),
            raw_description: "Industrial Widget".to_string(),
            raw_qty: qty.to_string(),
            normalized_qty: qty.parse().unwrap_or_default(),
            qty_parse_failed: qty.parse::<Decimal>().is_err(),
            raw_unit: Some("case".to_string()),
            normalized_unit: Some("CS".to_string()),
            unit_price_cents: 2400,
            raw_ext_price_cents: Some(4800),
            ext_price_cents: 4800,
        }
    }

    #[tokio::test]
    async fn bill_and_lines_round_trip() {
        let (_dir, pool) = test_pool().await;
        let id = insert_bill(&pool, &bill("k1"), &[line(1, "2"), line(2, "2.5")])
            .await
            .unwrap();

        let loaded = get_bill(&pool, id).await.unwrap().unwrap();
        assert_eq!(loaded.status, BillStatus::Draft);
        assert_eq!(loaded.invoice_no, "INV-1001");
        assert_eq!(loaded.total.map(Money::to_cents), Some(5400));
        assert_eq!(
            loaded.invoice_date,
            NaiveDate::from_ymd_opt(2026, 8, 1)
        );

        let lines = get_lines(&pool, id).await.unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].line_no, 1);
        assert_eq!(lines[1].normalized_qty.to_string(), "2.5");
        assert_eq!(lines[0].unit_multiplier, Decimal::from(1));
        assert!(!lines[0].is_matched());

        assert!(get_bill(&pool, 999).await.unwrap().is_none());
        assert!(get_line(&pool, id, 99).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn idempotency_key_lookup() {
        let (_dir, pool) = test_pool().await;
        let id = insert_bill(&pool, &bill("the-key"), &[line(1, "1")])
            .await
            .unwrap();
        let hit = get_bill_by_key(&pool, "the-key").await.unwrap().unwrap();
        assert_eq!(hit.id, id);
        assert!(get_bill_by_key(&pool, "other").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn suggestion_then_commit() {
        let (_dir, pool) = test_pool().await;
        let id = insert_bill(&pool, &bill("k1"), &[line(1, "3")]).await.unwrap();
        let l = get_line(&pool, id, 1).await.unwrap().unwrap();

        set_line_suggestion(&pool, l.id, "WIDGET-1", 0.95, MatchReason::Exact, Decimal::from(12))
            .await
            .unwrap();
        let l = get_line(&pool, id, 1).await.unwrap().unwrap();
        assert_eq!(l.suggested_sku.as_deref(), Some("WIDGET-1"));
        assert!(!l.is_matched());
        assert_eq!(
            get_suggested_multiplier(&pool, l.id).await.unwrap(),
            Decimal::from(12)
        );

        commit_line_match(&pool, l.id, "WIDGET-1", 0.95, MatchReason::Exact, false, Decimal::from(12))
            .await
            .unwrap();
        let l = get_line(&pool, id, 1).await.unwrap().unwrap();
        assert!(l.is_matched());
        assert_eq!(l.match_reason, Some(MatchReason::Exact));
        assert_eq!(l.unit_multiplier, Decimal::from(12));
        assert!(!l.user_overridden);
    }

    #[tokio::test]
    async fn status_updates_are_guarded() {
        let (_dir, pool) = test_pool().await;
        let id = insert_bill(&pool, &bill("k1"), &[line(1, "1")]).await.unwrap();

        // draft bills cannot be posted directly
        assert!(!mark_posted(&pool, id, "jo").await.unwrap());

        set_status(&pool, id, BillStatus::Review).await.unwrap();
        assert!(mark_posted(&pool, id, "jo").await.unwrap());
        let b = get_bill(&pool, id).await.unwrap().unwrap();
        assert_eq!(b.status, BillStatus::Posted);
        assert_eq!(b.posted_by.as_deref(), Some("jo"));
        assert!(b.posted_at.is_some());

        // double post loses the guard
        assert!(!mark_posted(&pool, id, "jo").await.unwrap());
        // posted bills cannot be voided
        assert!(!mark_void(&pool, id).await.unwrap());

        assert!(clear_posted(&pool, id).await.unwrap());
        let b = get_bill(&pool, id).await.unwrap().unwrap();
        assert_eq!(b.status, BillStatus::Review);
        assert!(b.posted_at.is_none());
        assert!(b.posted_by.is_none());

        assert!(mark_void(&pool, id).await.unwrap());
        assert!(!clear_posted(&pool, id).await.unwrap());
    }

    #[tokio::test]
    async fn list_is_scoped_to_store() {
        let (_dir, pool) = test_pool().await;
        insert_bill(&pool, &bill("k1"), &[]).await.unwrap();
        let mut other = bill("k2");
        other.store_id = 2;
        insert_bill(&pool, &other, &[]).await.unwrap();

        assert_eq!(list_bills(&pool, 1).await.unwrap().len(), 1);
        assert_eq!(list_bills(&pool, 2).await.unwrap().len(), 1);
        assert!(list_bills(&pool, 3).await.unwrap().is_empty());
    }
}
