use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Bill lifecycle moments worth a trail entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEvent {
    Created,
    Matched,
    AliasCreated,
    Posted,
    Reopened,
    Voided,
}

impl fmt::Display for AuditEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AuditEvent::Created => "created",
            AuditEvent::Matched => "matched",
            AuditEvent::AliasCreated => "alias_created",
            AuditEvent::Posted => "posted",
            AuditEvent::Reopened => "reopened",
            AuditEvent::Voided => "voided",
        };
        write!(f, "{s}")
    }
}

impl FromStr for AuditEvent {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(AuditEvent::Created),
            "matched" => Ok(AuditEvent::Matched),
            "alias_created" => Ok(AuditEvent::AliasCreated),
            "posted" => Ok(AuditEvent::Posted),
            "reopened" => Ok(AuditEvent::Reopened),
            "voided" => Ok(AuditEvent::Voided),
            other => Err(format!("unknown audit event: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    pub bill_id: i64,
    pub event: AuditEvent,
    pub actor: String,
    pub reason: Option<String>,
    pub detail: Option<String>,
    pub at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(bill_id: i64, event: AuditEvent, actor: &str) -> Self {
        AuditEntry {
            bill_id,
            event,
            actor: actor.to_string(),
            reason: None,
            detail: None,
            at: Utc::now(),
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("audit sink unavailable: {0}")]
    Unavailable(String),
}

/// Where trail entries go. Sink failures never fail the operation that
/// produced the entry; callers log and move on.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, entry: AuditEntry) -> Result<(), AuditError>;
}

/// Collects entries in memory; tests assert against `entries()`.
#[derive(Default)]
pub struct MemoryAuditSink {
    entries: Mutex<Vec<AuditEntry>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn record(&self, entry: AuditEntry) -> Result<(), AuditError> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(entry);
        Ok(())
    }
}
