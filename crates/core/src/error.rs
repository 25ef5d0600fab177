use std::fmt;

use thiserror::Error;

use crate::bill::BillStatus;

/// Failure taxonomy shared by every engine operation. Callers branch on the
/// variant, not on message text; `Conflict` and `Collaborator` are the two
/// transient classes a client may retry.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("cannot {operation} while bill is {status}")]
    InvalidState {
        status: BillStatus,
        operation: &'static str,
    },

    #[error("cannot post: lines {0:?} have no committed match")]
    UnmatchedLines(Vec<i64>),

    #[error("bill {0} is already posted")]
    AlreadyPosted(i64),

    #[error("conflict: {detail}")]
    Conflict { detail: String, lines: Vec<i64> },

    #[error("collaborator failure: {detail}")]
    Collaborator { detail: String, lines: Vec<i64> },

    #[error("storage error: {0}")]
    Store(String),
}

impl EngineError {
    pub fn not_found(entity: &'static str, id: impl fmt::Display) -> Self {
        EngineError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        EngineError::Validation(msg.into())
    }

    pub fn store(err: impl fmt::Display) -> Self {
        EngineError::Store(err.to_string())
    }

    pub fn conflict(detail: impl Into<String>, lines: Vec<i64>) -> Self {
        EngineError::Conflict {
            detail: detail.into(),
            lines,
        }
    }

    pub fn collaborator(detail: impl Into<String>, lines: Vec<i64>) -> Self {
        EngineError::Collaborator {
            detail: detail.into(),
            lines,
        }
    }

    /// Whether a client may retry the same call without changing anything.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::Conflict { .. } | EngineError::Collaborator { .. }
        )
    }

    /// Line numbers implicated in the failure, empty when none apply.
    pub fn blamed_lines(&self) -> &[i64] {
        match self {
            EngineError::UnmatchedLines(lines)
            | EngineError::Conflict { lines, .. }
            | EngineError::Collaborator { lines, .. } => lines,
            _ => &[],
        }
    }
}
