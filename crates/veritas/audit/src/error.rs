use std::time::Duration;
use thiserror::Error;
use veritas_types::ChainChannel;

/// Result type for audit operations.
pub type AuditResult<T> = Result<T, AuditError>;

/// Audit-layer errors.
///
/// `ChainWrite` is the one failure class that must fail the calling
/// operation even after its business mutation committed: an unaudited state
/// change is unacceptable for a forensic tool. `RelationalWrite` is absorbed
/// by the fan-out and surfaced through health reporting only.
#[derive(Debug, Error)]
pub enum AuditError {
    #[error("chain write failed on channel {channel}: {detail}")]
    ChainWrite {
        channel: ChainChannel,
        detail: String,
    },

    #[error("relational mirror write failed: {0}")]
    RelationalWrite(String),

    #[error("relational query failed: {0}")]
    RelationalQuery(String),

    #[error("channel writer busy: lock wait exceeded {0:?}")]
    ConcurrencyTimeout(Duration),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl AuditError {
    /// Whether the caller may simply retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConcurrencyTimeout(_))
    }
}
