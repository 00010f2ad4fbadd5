//! Audit event model.
//!
//! Events are a tagged union of known kinds, each carrying structured fields
//! plus a generic string-keyed metadata map, so audit consumers can
//! pattern-match exhaustively while producers stay free to attach context.

use crate::ids::{ActorId, EvidenceId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Audit channel. Each channel maintains an independent hash chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainChannel {
    Access,
    Security,
}

impl ChainChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Access => "access",
            Self::Security => "security",
        }
    }

    /// File name of the channel's append-only log.
    pub fn file_name(&self) -> &'static str {
        match self {
            Self::Access => "access.log",
            Self::Security => "security.log",
        }
    }

    pub fn all() -> [ChainChannel; 2] {
        [Self::Access, Self::Security]
    }
}

impl fmt::Display for ChainChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Action verbs for file access events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccessAction {
    Upload,
    View,
    Download,
    Delete,
    Share,
    Revoke,
}

impl AccessAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Upload => "UPLOAD",
            Self::View => "VIEW",
            Self::Download => "DOWNLOAD",
            Self::Delete => "DELETE",
            Self::Share => "SHARE",
            Self::Revoke => "REVOKE",
        }
    }
}

impl fmt::Display for AccessAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Target of a user action, when one exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventTarget {
    pub kind: String,
    pub id: String,
}

impl EventTarget {
    pub fn evidence(id: EvidenceId) -> Self {
        Self {
            kind: "evidence".to_string(),
            id: id.to_string(),
        }
    }

    pub fn actor(id: ActorId) -> Self {
        Self {
            kind: "actor".to_string(),
            id: id.to_string(),
        }
    }
}

/// Security-relevant event kinds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityEventKind {
    AccessDenied,
    AuthenticationFailed,
    SessionExpired,
    Custom(String),
}

/// System-level event kinds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemEventKind {
    ChannelInitialized,
    RelationalWriteFailed,
    RetentionPurge,
    DetectionRecorded,
    Custom(String),
}

/// An audit event as produced by the subsystem, before chain sealing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type")]
pub enum AuditEvent {
    #[serde(rename = "FILE_ACCESS")]
    FileAccess {
        actor: ActorId,
        evidence: EvidenceId,
        action: AccessAction,
        #[serde(default)]
        metadata: BTreeMap<String, Value>,
    },
    #[serde(rename = "USER_ACTION")]
    UserAction {
        actor: ActorId,
        action: String,
        #[serde(default)]
        target: Option<EventTarget>,
        #[serde(default)]
        metadata: BTreeMap<String, Value>,
    },
    #[serde(rename = "SECURITY_EVENT")]
    SecurityEvent {
        kind: SecurityEventKind,
        #[serde(default)]
        actor: Option<ActorId>,
        #[serde(default)]
        metadata: BTreeMap<String, Value>,
    },
    #[serde(rename = "SYSTEM_EVENT")]
    SystemEvent {
        kind: SystemEventKind,
        #[serde(default)]
        metadata: BTreeMap<String, Value>,
    },
}

impl AuditEvent {
    pub fn file_access(actor: ActorId, evidence: EvidenceId, action: AccessAction) -> Self {
        Self::FileAccess {
            actor,
            evidence,
            action,
            metadata: BTreeMap::new(),
        }
    }

    pub fn user_action(
        actor: ActorId,
        action: impl Into<String>,
        target: Option<EventTarget>,
    ) -> Self {
        Self::UserAction {
            actor,
            action: action.into(),
            target,
            metadata: BTreeMap::new(),
        }
    }

    pub fn security(kind: SecurityEventKind, actor: Option<ActorId>) -> Self {
        Self::SecurityEvent {
            kind,
            actor,
            metadata: BTreeMap::new(),
        }
    }

    pub fn system(kind: SystemEventKind) -> Self {
        Self::SystemEvent {
            kind,
            metadata: BTreeMap::new(),
        }
    }

    /// Attach a metadata value. Unserializable values are dropped.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.metadata_mut().insert(key.into(), v);
        }
        self
    }

    fn metadata_mut(&mut self) -> &mut BTreeMap<String, Value> {
        match self {
            Self::FileAccess { metadata, .. }
            | Self::UserAction { metadata, .. }
            | Self::SecurityEvent { metadata, .. }
            | Self::SystemEvent { metadata, .. } => metadata,
        }
    }

    pub fn metadata(&self) -> &BTreeMap<String, Value> {
        match self {
            Self::FileAccess { metadata, .. }
            | Self::UserAction { metadata, .. }
            | Self::SecurityEvent { metadata, .. }
            | Self::SystemEvent { metadata, .. } => metadata,
        }
    }

    /// The channel this event is chained on.
    pub fn channel(&self) -> ChainChannel {
        match self {
            Self::SecurityEvent { .. } => ChainChannel::Security,
            _ => ChainChannel::Access,
        }
    }

    /// Actor attributed to the event, when known.
    pub fn actor(&self) -> Option<ActorId> {
        match self {
            Self::FileAccess { actor, .. } | Self::UserAction { actor, .. } => Some(*actor),
            Self::SecurityEvent { actor, .. } => *actor,
            Self::SystemEvent { .. } => None,
        }
    }
}
