//! Caller-facing operation outcome envelope.

use serde::{Deserialize, Serialize};

/// Classifies how an operation concluded, beyond the success flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    /// Completed as requested.
    Ok,
    /// Refused by access control. Covers both missing resources and missing
    /// authorization; the audit record carries the distinction.
    Denied,
    /// Failed; retrying will not help without intervention.
    Failed,
    /// Failed on a transient contention bound; safe to retry.
    Retryable,
}

/// Result envelope returned by every gateway operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationResult<T> {
    pub success: bool,
    pub kind: OutcomeKind,
    pub message: String,
    pub data: Option<T>,
}

impl<T> OperationResult<T> {
    pub fn ok(message: impl Into<String>, data: T) -> Self {
        Self {
            success: true,
            kind: OutcomeKind::Ok,
            message: message.into(),
            data: Some(data),
        }
    }

    pub fn ok_empty(message: impl Into<String>) -> Self {
        Self {
            success: true,
            kind: OutcomeKind::Ok,
            message: message.into(),
            data: None,
        }
    }

    pub fn denied(message: impl Into<String>) -> Self {
        Self {
            success: false,
            kind: OutcomeKind::Denied,
            message: message.into(),
            data: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            kind: OutcomeKind::Failed,
            message: message.into(),
            data: None,
        }
    }

    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            success: false,
            kind: OutcomeKind::Retryable,
            message: message.into(),
            data: None,
        }
    }
}
