use crate::model::{
    AccessLogEntry, AccessLogQuery, AccessLogRow, DetectionRecord, EvidenceRecord, PermissionGrant,
};
use crate::StoreResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use veritas_types::{ActorId, EvidenceId, PermissionLevel};

/// Generic query window for paged reads.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryWindow {
    pub limit: usize,
    pub offset: usize,
}

/// Storage interface for the evidence registry.
#[async_trait]
pub trait EvidenceStore: Send + Sync {
    /// Register a new evidence file. Fails with `Conflict` if the id exists.
    async fn create_evidence(&self, record: EvidenceRecord) -> StoreResult<()>;

    /// Fetch one evidence record by id.
    async fn get_evidence(&self, evidence: &EvidenceId) -> StoreResult<Option<EvidenceRecord>>;

    /// List evidence owned by an actor, newest-first.
    async fn list_owned(&self, owner: &ActorId, window: QueryWindow)
        -> StoreResult<Vec<EvidenceRecord>>;

    /// Delete an evidence record together with its grants, detections, and
    /// relational access rows, as one transaction. A delete that cannot
    /// remove the dependent rows must not remove the evidence row.
    async fn delete_evidence(&self, evidence: &EvidenceId) -> StoreResult<()>;
}

/// Storage interface for permission grant rows.
#[async_trait]
pub trait GrantStore: Send + Sync {
    /// Insert or refresh the `(evidence, grantee, level)` row.
    async fn upsert_grant(&self, grant: PermissionGrant) -> StoreResult<()>;

    /// All grant rows for `(evidence, grantee)`, any expiry state.
    async fn grants_for(
        &self,
        evidence: &EvidenceId,
        grantee: &ActorId,
    ) -> StoreResult<Vec<PermissionGrant>>;

    /// All grant rows on an evidence file.
    async fn grants_for_evidence(&self, evidence: &EvidenceId)
        -> StoreResult<Vec<PermissionGrant>>;

    /// All grant rows held by an actor.
    async fn grants_for_actor(&self, grantee: &ActorId) -> StoreResult<Vec<PermissionGrant>>;

    /// Remove one grant row. Returns `false` when no such row existed.
    async fn remove_grant(
        &self,
        evidence: &EvidenceId,
        grantee: &ActorId,
        level: PermissionLevel,
    ) -> StoreResult<bool>;

    /// Remove every grant row for `(evidence, grantee)`; returns the count.
    async fn remove_all_grants(
        &self,
        evidence: &EvidenceId,
        grantee: &ActorId,
    ) -> StoreResult<u64>;

    /// Delete all rows whose expiry has passed; returns the count removed.
    /// Advisory cleanup only: access checks re-evaluate expiry themselves.
    async fn sweep_expired_grants(&self, now: DateTime<Utc>) -> StoreResult<u64>;
}

/// Storage interface for the relational access-event mirror.
///
/// Not hash-chained; its integrity is not load-bearing for tamper detection.
#[async_trait]
pub trait AccessLogStore: Send + Sync {
    /// Insert one access-event row.
    async fn record_access(&self, entry: AccessLogEntry) -> StoreResult<AccessLogRow>;

    /// Query rows, newest-first.
    async fn query_access(&self, query: &AccessLogQuery) -> StoreResult<Vec<AccessLogRow>>;

    /// Delete rows strictly older than the cutoff; returns the count removed.
    /// Legal here, unlike the hash chain, which is never pruned.
    async fn purge_access_before(&self, cutoff: DateTime<Utc>) -> StoreResult<u64>;
}

/// Storage interface for detection verdicts.
#[async_trait]
pub trait DetectionStore: Send + Sync {
    async fn record_detection(&self, record: DetectionRecord) -> StoreResult<()>;
    async fn detections_for(&self, evidence: &EvidenceId) -> StoreResult<Vec<DetectionRecord>>;
}

/// Unified storage bundle used by the custody subsystem.
pub trait VaultStorage:
    EvidenceStore + GrantStore + AccessLogStore + DetectionStore + Send + Sync
{
}

impl<T> VaultStorage for T where
    T: EvidenceStore + GrantStore + AccessLogStore + DetectionStore + Send + Sync
{
}
