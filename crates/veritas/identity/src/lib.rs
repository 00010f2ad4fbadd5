//! Veritas Identity - the identity-provider boundary.
//!
//! Credential mechanics (hashing, lockout) live behind the
//! `CredentialVerifier` capability; this crate only defines the contract and
//! the session registry. Sessions are held in an explicit store with an
//! injected clock, so expiry is testable without sleeping.

#![deny(unsafe_code)]

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;
use veritas_types::{ActorId, Clock, SessionToken};

/// Default session lifetime, refreshed on every successful resolve.
pub const DEFAULT_SESSION_TTL_HOURS: i64 = 24;

/// Opaque credential material presented by a caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    pub username: String,
    pub secret: String,
}

/// Identity-provider errors.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid credential")]
    InvalidCredential,

    #[error("identity backend error: {0}")]
    Backend(String),
}

/// Capability: verify a credential and yield the actor it belongs to.
///
/// Hashing and token formats are out of scope for the custody core; callers
/// inject a concrete verifier.
#[async_trait::async_trait]
pub trait CredentialVerifier: Send + Sync {
    async fn verify(&self, credential: &Credential) -> Result<ActorId, AuthError>;
}

/// Outcome of resolving a session token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionResolution {
    Active(ActorId),
    Expired,
    Invalid,
}

#[derive(Debug, Clone)]
struct SessionRecord {
    actor: ActorId,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

/// Explicit session store keyed by opaque tokens.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionToken, SessionRecord>>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl SessionRegistry {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_ttl(clock, Duration::hours(DEFAULT_SESSION_TTL_HOURS))
    }

    pub fn with_ttl(clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            clock,
            ttl,
        }
    }

    /// Open a session for an authenticated actor.
    pub fn open(&self, actor: ActorId) -> SessionToken {
        let token = SessionToken::generate();
        let now = self.clock.now();
        let record = SessionRecord {
            actor,
            created_at: now,
            expires_at: now + self.ttl,
        };
        self.sessions.write().insert(token.clone(), record);
        debug!(%actor, "session opened");
        token
    }

    /// Resolve a token. A successful resolve slides the expiry forward.
    pub fn resolve(&self, token: &SessionToken) -> SessionResolution {
        let now = self.clock.now();
        let mut sessions = self.sessions.write();
        match sessions.get_mut(token) {
            None => SessionResolution::Invalid,
            Some(record) if record.expires_at <= now => {
                sessions.remove(token);
                SessionResolution::Expired
            }
            Some(record) => {
                record.expires_at = now + self.ttl;
                SessionResolution::Active(record.actor)
            }
        }
    }

    /// Invalidate a session. Returns `false` when the token was unknown.
    pub fn close(&self, token: &SessionToken) -> bool {
        self.sessions.write().remove(token).is_some()
    }

    /// Drop every expired session; returns the count removed.
    pub fn sweep_expired(&self) -> usize {
        let now = self.clock.now();
        let mut sessions = self.sessions.write();
        let before = sessions.len();
        sessions.retain(|_, record| record.expires_at > now);
        before - sessions.len()
    }

    /// Age of a session, if it is known.
    pub fn session_age(&self, token: &SessionToken) -> Option<Duration> {
        let sessions = self.sessions.read();
        sessions
            .get(token)
            .map(|record| self.clock.now() - record.created_at)
    }
}
