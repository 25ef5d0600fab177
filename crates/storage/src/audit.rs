use std::str::FromStr;

use async_trait::async_trait;

use tessera_core::{AuditEntry, AuditError, AuditEvent, AuditSink};

use crate::db::{parse_ts, DbPool};

/// Audit sink writing to the bill_audit_log table.
pub struct SqlAuditSink {
    pool: DbPool,
}

impl SqlAuditSink {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditSink for SqlAuditSink {
    async fn record(&self, entry: AuditEntry) -> Result<(), AuditError> {
        sqlx::query(
            "INSERT INTO bill_audit_log (bill_id, event, actor, reason, detail) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(entry.bill_id)
        .bind(entry.event.to_string())
        .bind(&entry.actor)
        .bind(&entry.reason)
        .bind(&entry.detail)
        .execute(&self.pool)
        .await
        .map_err(|e| AuditError::Unavailable(e.to_string()))?;
        Ok(())
    }
}

/// Trail for one bill, oldest first. Rows with an unrecognized event name
/// (from a newer schema) are skipped rather than failing the read.
pub async fn get_audit_log(pool: &DbPool, bill_id: i64) -> Result<Vec<AuditEntry>, sqlx::Error> {
    let rows = sqlx::query_as::<_, (String, String, Option<String>, Option<String>, String)>(
        "SELECT event, actor, reason, detail, created_at \
         FROM bill_audit_log WHERE bill_id = ? ORDER BY id",
    )
    .bind(bill_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .filter_map(|(event, actor, reason, detail, created_at)| {
            let event = AuditEvent::from_str(&event).ok()?;
            Some(AuditEntry {
                bill_id,
                event,
                actor,
                reason,
                detail,
                at: parse_ts(&created_at),
            })
        })
        .collect())
}
