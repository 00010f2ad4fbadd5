//! Audit fan-out service.
//!
//! Single entry point event producers call. Every event is mirrored to the
//! relational store for querying and appended to the hash chain for tamper
//! evidence. The chain is authoritative: a mirror failure is absorbed and
//! surfaced through health reporting, a chain failure fails the caller.

use crate::sink::HashChainLog;
use crate::verify::{ChainVerification, ExportReceipt};
use crate::{AuditError, AuditResult};
use chrono::{DateTime, Utc};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::warn;
use veritas_store::{AccessLogEntry, AccessLogQuery, AccessLogRow, VaultStorage};
use veritas_types::{AuditEvent, ChainChannel, Clock, SystemEventKind};

/// Health counters for the audit subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuditHealth {
    pub relational_write_failures: u64,
}

/// Fans every audit event out to the relational mirror and the hash chain.
pub struct AuditService {
    storage: Arc<dyn VaultStorage>,
    chain: HashChainLog,
    clock: Arc<dyn Clock>,
    relational_failures: AtomicU64,
}

impl AuditService {
    pub fn new(storage: Arc<dyn VaultStorage>, clock: Arc<dyn Clock>, chain: HashChainLog) -> Self {
        Self {
            storage,
            chain,
            clock,
            relational_failures: AtomicU64::new(0),
        }
    }

    /// Open the chain under `chain_dir` and build the service.
    pub async fn open(
        storage: Arc<dyn VaultStorage>,
        clock: Arc<dyn Clock>,
        chain_dir: impl AsRef<Path>,
    ) -> AuditResult<Self> {
        let chain = HashChainLog::open(chain_dir, clock.as_ref()).await?;
        Ok(Self::new(storage, clock, chain))
    }

    /// Record one event. Returns the chain `record_hash` as a receipt.
    ///
    /// The relational mirror is written first; if it fails, the chain write
    /// still proceeds (the chain must not lose events because a secondary
    /// index is unavailable) and the failure itself is chain-logged as a
    /// system event on a best-effort basis. A chain failure is returned to
    /// the caller as the fatal outcome.
    pub async fn record(&self, event: AuditEvent) -> AuditResult<String> {
        let timestamp = self.clock.now();

        if let Err(err) = self.mirror(&event, timestamp).await {
            self.relational_failures.fetch_add(1, Ordering::Relaxed);
            warn!(%err, "relational mirror write failed; chain write proceeds");
            let note = AuditEvent::system(SystemEventKind::RelationalWriteFailed)
                .with_metadata("detail", err.to_string());
            if let Err(note_err) = self.chain.append(note, timestamp).await {
                warn!(%note_err, "could not chain-log the mirror failure");
            }
        }

        let record = self.chain.append(event, timestamp).await?;
        Ok(record.record_hash)
    }

    /// Mirror the event into the relational store. Only file-access events
    /// have a relational row; the other kinds live on the chain alone.
    async fn mirror(&self, event: &AuditEvent, timestamp: DateTime<Utc>) -> AuditResult<()> {
        let AuditEvent::FileAccess {
            actor,
            evidence,
            action,
            metadata,
        } = event
        else {
            return Ok(());
        };

        let entry = AccessLogEntry {
            actor: *actor,
            evidence: *evidence,
            action: *action,
            ip_address: metadata
                .get("ip_address")
                .and_then(|v| v.as_str())
                .map(String::from),
            user_agent: metadata
                .get("user_agent")
                .and_then(|v| v.as_str())
                .map(String::from),
            timestamp,
            metadata: serde_json::Value::Object(metadata.clone().into_iter().collect()),
        };
        self.storage
            .record_access(entry)
            .await
            .map_err(|e| AuditError::RelationalWrite(e.to_string()))?;
        Ok(())
    }

    /// Verify one channel's chain.
    pub async fn verify_channel(&self, channel: ChainChannel) -> AuditResult<ChainVerification> {
        self.chain.verify(channel).await
    }

    /// Export one channel with a verification trailer.
    pub async fn export_channel(
        &self,
        channel: ChainChannel,
        dest: impl AsRef<Path>,
    ) -> AuditResult<ExportReceipt> {
        self.chain.export(channel, dest, self.clock.now()).await
    }

    /// Query the relational mirror, newest-first.
    pub async fn query_access(&self, query: &AccessLogQuery) -> AuditResult<Vec<AccessLogRow>> {
        self.storage
            .query_access(query)
            .await
            .map_err(|e| AuditError::RelationalQuery(e.to_string()))
    }

    /// Retention-prune the relational mirror. The chained files are never
    /// pruned; the purge itself is chain-logged.
    pub async fn purge_relational(&self, older_than: DateTime<Utc>) -> AuditResult<u64> {
        let removed = self
            .storage
            .purge_access_before(older_than)
            .await
            .map_err(|e| AuditError::RelationalQuery(e.to_string()))?;

        let event = AuditEvent::system(SystemEventKind::RetentionPurge)
            .with_metadata("removed_rows", removed)
            .with_metadata("older_than", older_than.to_rfc3339());
        self.record(event).await?;
        Ok(removed)
    }

    pub fn health(&self) -> AuditHealth {
        AuditHealth {
            relational_write_failures: self.relational_failures.load(Ordering::Relaxed),
        }
    }

    pub fn chain(&self) -> &HashChainLog {
        &self.chain
    }
}
