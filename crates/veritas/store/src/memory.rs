//! In-memory reference implementation for the Veritas storage traits.
//!
//! This adapter is deterministic and test-friendly. Durable deployments use
//! the SQLite adapter behind the `sqlite` feature.

use crate::model::{
    AccessLogEntry, AccessLogQuery, AccessLogRow, DetectionRecord, EvidenceRecord, PermissionGrant,
};
use crate::traits::{
    AccessLogStore, DetectionStore, EvidenceStore, GrantStore, QueryWindow,
};
use crate::{StoreError, StoreResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use uuid::Uuid;
use veritas_types::{ActorId, EvidenceId, PermissionLevel};

type GrantKey = (EvidenceId, ActorId, PermissionLevel);

/// In-memory Veritas storage adapter.
#[derive(Default)]
pub struct InMemoryVaultStorage {
    evidence: RwLock<HashMap<EvidenceId, EvidenceRecord>>,
    grants: RwLock<HashMap<GrantKey, PermissionGrant>>,
    access_log: RwLock<Vec<AccessLogRow>>,
    detections: RwLock<Vec<DetectionRecord>>,
}

impl InMemoryVaultStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EvidenceStore for InMemoryVaultStorage {
    async fn create_evidence(&self, record: EvidenceRecord) -> StoreResult<()> {
        let mut guard = self.evidence.write();
        if guard.contains_key(&record.evidence_id) {
            return Err(StoreError::Conflict(format!(
                "evidence {} already exists",
                record.evidence_id
            )));
        }
        guard.insert(record.evidence_id, record);
        Ok(())
    }

    async fn get_evidence(&self, evidence: &EvidenceId) -> StoreResult<Option<EvidenceRecord>> {
        Ok(self.evidence.read().get(evidence).cloned())
    }

    async fn list_owned(
        &self,
        owner: &ActorId,
        window: QueryWindow,
    ) -> StoreResult<Vec<EvidenceRecord>> {
        let guard = self.evidence.read();
        let mut records = guard
            .values()
            .filter(|r| r.owner == *owner)
            .cloned()
            .collect::<Vec<_>>();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(apply_window(records, window))
    }

    async fn delete_evidence(&self, evidence: &EvidenceId) -> StoreResult<()> {
        // Lock order: evidence, grants, access_log, detections.
        let mut evidence_guard = self.evidence.write();
        if !evidence_guard.contains_key(evidence) {
            return Err(StoreError::NotFound(format!(
                "evidence {} not found",
                evidence
            )));
        }

        let mut grants = self.grants.write();
        let mut access_log = self.access_log.write();
        let mut detections = self.detections.write();

        grants.retain(|(id, _, _), _| id != evidence);
        access_log.retain(|row| row.evidence != *evidence);
        detections.retain(|d| d.evidence != *evidence);
        evidence_guard.remove(evidence);
        Ok(())
    }
}

#[async_trait]
impl GrantStore for InMemoryVaultStorage {
    async fn upsert_grant(&self, grant: PermissionGrant) -> StoreResult<()> {
        let key = (grant.evidence, grant.grantee, grant.level);
        self.grants.write().insert(key, grant);
        Ok(())
    }

    async fn grants_for(
        &self,
        evidence: &EvidenceId,
        grantee: &ActorId,
    ) -> StoreResult<Vec<PermissionGrant>> {
        let guard = self.grants.read();
        Ok(guard
            .iter()
            .filter(|((id, actor, _), _)| id == evidence && actor == grantee)
            .map(|(_, grant)| grant.clone())
            .collect())
    }

    async fn grants_for_evidence(
        &self,
        evidence: &EvidenceId,
    ) -> StoreResult<Vec<PermissionGrant>> {
        let guard = self.grants.read();
        let mut grants = guard
            .iter()
            .filter(|((id, _, _), _)| id == evidence)
            .map(|(_, grant)| grant.clone())
            .collect::<Vec<_>>();
        grants.sort_by(|a, b| b.granted_at.cmp(&a.granted_at));
        Ok(grants)
    }

    async fn grants_for_actor(&self, grantee: &ActorId) -> StoreResult<Vec<PermissionGrant>> {
        let guard = self.grants.read();
        let mut grants = guard
            .iter()
            .filter(|((_, actor, _), _)| actor == grantee)
            .map(|(_, grant)| grant.clone())
            .collect::<Vec<_>>();
        grants.sort_by(|a, b| b.granted_at.cmp(&a.granted_at));
        Ok(grants)
    }

    async fn remove_grant(
        &self,
        evidence: &EvidenceId,
        grantee: &ActorId,
        level: PermissionLevel,
    ) -> StoreResult<bool> {
        let key = (*evidence, *grantee, level);
        Ok(self.grants.write().remove(&key).is_some())
    }

    async fn remove_all_grants(
        &self,
        evidence: &EvidenceId,
        grantee: &ActorId,
    ) -> StoreResult<u64> {
        let mut guard = self.grants.write();
        let before = guard.len();
        guard.retain(|(id, actor, _), _| !(id == evidence && actor == grantee));
        Ok((before - guard.len()) as u64)
    }

    async fn sweep_expired_grants(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        let mut guard = self.grants.write();
        let before = guard.len();
        guard.retain(|_, grant| grant.is_active(now));
        Ok((before - guard.len()) as u64)
    }
}

#[async_trait]
impl AccessLogStore for InMemoryVaultStorage {
    async fn record_access(&self, entry: AccessLogEntry) -> StoreResult<AccessLogRow> {
        let row = AccessLogRow {
            row_id: format!("log-{}", Uuid::new_v4()),
            actor: entry.actor,
            evidence: entry.evidence,
            action: entry.action,
            ip_address: entry.ip_address,
            user_agent: entry.user_agent,
            timestamp: entry.timestamp,
            metadata: entry.metadata,
        };
        self.access_log.write().push(row.clone());
        Ok(row)
    }

    async fn query_access(&self, query: &AccessLogQuery) -> StoreResult<Vec<AccessLogRow>> {
        let guard = self.access_log.read();
        let mut rows = guard
            .iter()
            .filter(|row| query.matches(row))
            .cloned()
            .collect::<Vec<_>>();
        rows.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        if let Some(limit) = query.limit {
            rows.truncate(limit);
        }
        Ok(rows)
    }

    async fn purge_access_before(&self, cutoff: DateTime<Utc>) -> StoreResult<u64> {
        let mut guard = self.access_log.write();
        let before = guard.len();
        guard.retain(|row| row.timestamp >= cutoff);
        Ok((before - guard.len()) as u64)
    }
}

#[async_trait]
impl DetectionStore for InMemoryVaultStorage {
    async fn record_detection(&self, record: DetectionRecord) -> StoreResult<()> {
        self.detections.write().push(record);
        Ok(())
    }

    async fn detections_for(&self, evidence: &EvidenceId) -> StoreResult<Vec<DetectionRecord>> {
        let guard = self.detections.read();
        let mut records = guard
            .iter()
            .filter(|d| d.evidence == *evidence)
            .cloned()
            .collect::<Vec<_>>();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }
}

fn apply_window<T>(values: Vec<T>, window: QueryWindow) -> Vec<T> {
    let iter = values.into_iter().skip(window.offset);
    if window.limit == 0 {
        iter.collect()
    } else {
        iter.take(window.limit).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;
    use veritas_types::AccessAction;

    fn evidence_record(owner: ActorId) -> EvidenceRecord {
        EvidenceRecord {
            evidence_id: EvidenceId::generate(),
            owner,
            filename: "frame_001.png".to_string(),
            storage_ref: "store/frame_001.png".to_string(),
            size_bytes: 2048,
            mime_type: Some("image/png".to_string()),
            sha256: "ab".repeat(32),
            created_at: Utc::now(),
        }
    }

    fn grant(evidence: EvidenceId, grantee: ActorId, level: PermissionLevel) -> PermissionGrant {
        PermissionGrant {
            evidence,
            grantee,
            level,
            granted_by: ActorId::generate(),
            granted_at: Utc::now(),
            expires_at: None,
        }
    }

    #[tokio::test]
    async fn evidence_ids_are_unique() {
        let store = InMemoryVaultStorage::new();
        let record = evidence_record(ActorId::generate());
        store.create_evidence(record.clone()).await.unwrap();
        let err = store.create_evidence(record).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn regrant_updates_in_place() {
        let store = InMemoryVaultStorage::new();
        let evidence = EvidenceId::generate();
        let grantee = ActorId::generate();

        let first = grant(evidence, grantee, PermissionLevel::Read);
        store.upsert_grant(first).await.unwrap();

        let mut second = grant(evidence, grantee, PermissionLevel::Read);
        second.expires_at = Some(Utc::now() + Duration::hours(1));
        store.upsert_grant(second.clone()).await.unwrap();

        let rows = store.grants_for(&evidence, &grantee).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].expires_at, second.expires_at);
    }

    #[tokio::test]
    async fn sweep_removes_only_expired_rows() {
        let store = InMemoryVaultStorage::new();
        let evidence = EvidenceId::generate();
        let now = Utc::now();

        let mut expired = grant(evidence, ActorId::generate(), PermissionLevel::Read);
        expired.expires_at = Some(now - Duration::minutes(5));
        let live = grant(evidence, ActorId::generate(), PermissionLevel::Write);
        store.upsert_grant(expired).await.unwrap();
        store.upsert_grant(live).await.unwrap();

        assert_eq!(store.sweep_expired_grants(now).await.unwrap(), 1);
        assert_eq!(store.grants_for_evidence(&evidence).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn delete_cascades_to_dependent_rows() {
        let store = InMemoryVaultStorage::new();
        let owner = ActorId::generate();
        let record = evidence_record(owner);
        let evidence = record.evidence_id;
        store.create_evidence(record).await.unwrap();
        store
            .upsert_grant(grant(evidence, ActorId::generate(), PermissionLevel::Read))
            .await
            .unwrap();
        store
            .record_access(AccessLogEntry {
                actor: owner,
                evidence,
                action: AccessAction::Upload,
                ip_address: None,
                user_agent: None,
                timestamp: Utc::now(),
                metadata: json!({}),
            })
            .await
            .unwrap();

        store.delete_evidence(&evidence).await.unwrap();

        assert!(store.get_evidence(&evidence).await.unwrap().is_none());
        assert!(store.grants_for_evidence(&evidence).await.unwrap().is_empty());
        let rows = store
            .query_access(&AccessLogQuery {
                evidence: Some(evidence),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(rows.is_empty());

        let err = store.delete_evidence(&evidence).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn access_query_filters_and_orders() {
        let store = InMemoryVaultStorage::new();
        let actor = ActorId::generate();
        let evidence = EvidenceId::generate();
        let base = Utc::now();

        for (i, action) in [AccessAction::Upload, AccessAction::View, AccessAction::View]
            .into_iter()
            .enumerate()
        {
            store
                .record_access(AccessLogEntry {
                    actor,
                    evidence,
                    action,
                    ip_address: None,
                    user_agent: None,
                    timestamp: base + Duration::seconds(i as i64),
                    metadata: json!({}),
                })
                .await
                .unwrap();
        }

        let rows = store
            .query_access(&AccessLogQuery {
                actor: Some(actor),
                action: Some(AccessAction::View),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows[0].timestamp > rows[1].timestamp);

        let purged = store
            .purge_access_before(base + Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(purged, 1);
    }
}
