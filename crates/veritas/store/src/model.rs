use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use veritas_types::{AccessAction, ActorId, EvidenceId, PermissionLevel};

/// Registered evidence file. The owner is fixed at creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceRecord {
    pub evidence_id: EvidenceId,
    pub owner: ActorId,
    pub filename: String,
    pub storage_ref: String,
    pub size_bytes: u64,
    pub mime_type: Option<String>,
    /// Hex SHA-256 content fingerprint.
    pub sha256: String,
    pub created_at: DateTime<Utc>,
}

/// One permission grant row.
///
/// At most one row exists per `(evidence, grantee, level)`; re-granting the
/// same level refreshes the metadata in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PermissionGrant {
    pub evidence: EvidenceId,
    pub grantee: ActorId,
    pub level: PermissionLevel,
    pub granted_by: ActorId,
    pub granted_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl PermissionGrant {
    /// Whether the grant is active at the given instant. Expiry is always
    /// evaluated at decision time, never assumed swept.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            None => true,
            Some(expiry) => expiry > now,
        }
    }
}

/// Insert payload for the relational access-event mirror.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessLogEntry {
    pub actor: ActorId,
    pub evidence: EvidenceId,
    pub action: AccessAction,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Value,
}

/// Stored access-event row. Row IDs are assigned by the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessLogRow {
    pub row_id: String,
    pub actor: ActorId,
    pub evidence: EvidenceId,
    pub action: AccessAction,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub metadata: Value,
}

/// Filters for access-event queries. Rows are returned newest-first.
#[derive(Debug, Clone, Default)]
pub struct AccessLogQuery {
    pub actor: Option<ActorId>,
    pub evidence: Option<EvidenceId>,
    pub action: Option<AccessAction>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl AccessLogQuery {
    pub fn matches(&self, row: &AccessLogRow) -> bool {
        if let Some(actor) = self.actor {
            if row.actor != actor {
                return false;
            }
        }
        if let Some(evidence) = self.evidence {
            if row.evidence != evidence {
                return false;
            }
        }
        if let Some(action) = self.action {
            if row.action != action {
                return false;
            }
        }
        if let Some(from) = self.from {
            if row.timestamp < from {
                return false;
            }
        }
        if let Some(to) = self.to {
            if row.timestamp >= to {
                return false;
            }
        }
        true
    }
}

/// Verdict of the external forgery-detection model for one evidence file.
/// Informational only; access decisions never consult it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionRecord {
    pub evidence: EvidenceId,
    pub detector_name: String,
    pub detector_version: String,
    pub score: f64,
    pub is_flagged: bool,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}
