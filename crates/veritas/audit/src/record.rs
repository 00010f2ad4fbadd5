//! Chain record sealing and canonical hashing.

use crate::{AuditError, AuditResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;
use veritas_types::{AuditEvent, ChainChannel, SystemEventKind};

/// Sentinel `prev_hash` of a channel's initialization record.
pub const GENESIS_PREV_HASH: &str = "GENESIS";

/// One sealed record of a hash chain.
///
/// The event is flattened into the record, so each log line carries the
/// `event_type` tag at the top level alongside the chain fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainRecord {
    pub record_id: Uuid,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event: AuditEvent,
    pub prev_hash: String,
    pub record_hash: String,
}

impl ChainRecord {
    /// Build and seal a record against the previous record's hash.
    pub fn seal(
        event: AuditEvent,
        timestamp: DateTime<Utc>,
        prev_hash: String,
    ) -> AuditResult<Self> {
        let mut record = Self {
            record_id: Uuid::new_v4(),
            timestamp,
            event,
            prev_hash,
            record_hash: String::new(),
        };
        record.record_hash = record.compute_hash()?;
        Ok(record)
    }

    /// The initialization record that anchors a fresh channel.
    pub fn genesis(channel: ChainChannel, timestamp: DateTime<Utc>) -> AuditResult<Self> {
        let event = AuditEvent::system(SystemEventKind::ChannelInitialized)
            .with_metadata("channel", channel.as_str());
        Self::seal(event, timestamp, GENESIS_PREV_HASH.to_string())
    }

    /// Digest of the record's canonical content: every field except
    /// `record_hash`, with `prev_hash` included.
    ///
    /// serde_json objects serialize with sorted keys, so two logically
    /// identical records always canonicalize to the same bytes regardless of
    /// field insertion order.
    pub fn compute_hash(&self) -> AuditResult<String> {
        let mut value =
            serde_json::to_value(self).map_err(|e| AuditError::Serialization(e.to_string()))?;
        if let Some(map) = value.as_object_mut() {
            map.remove("record_hash");
        }
        let canonical = value.to_string();
        Ok(hex::encode(Sha256::digest(canonical.as_bytes())))
    }

    /// Whether the stored hash matches the recomputed one.
    pub fn hash_is_intact(&self) -> AuditResult<bool> {
        Ok(self.compute_hash()? == self.record_hash)
    }

    /// Whether this is a channel initialization record.
    pub fn is_genesis(&self) -> bool {
        self.prev_hash == GENESIS_PREV_HASH
    }
}
