//! Veritas ACL - access decisions for evidence files.
//!
//! Every decision is computed from an explicit rule set: ownership, granted
//! permissions, and expiry, evaluated at decision time. There is no ambient
//! trust and no caching; a storage failure is a fail-closed outcome, never a
//! silent allow.

#![deny(unsafe_code)]

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};
use veritas_store::{PermissionGrant, StoreError, VaultStorage};
use veritas_types::{ActorId, Clock, EvidenceId, PermissionLevel};

/// Why a decision came back negative.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenialReason {
    /// The evidence file does not exist. Fail closed; callers unify the wire
    /// message with other denials, the audit record keeps the distinction.
    ResourceMissing,
    /// The file exists but no active grant satisfies the required level.
    NoActiveGrant,
}

/// What a positive decision rests on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantBasis {
    /// The actor owns the file. Owners hold every level implicitly; this is
    /// never stored as a grant row.
    Ownership,
    /// An active grant at this level satisfied the requirement.
    Grant(PermissionLevel),
}

/// Outcome of an access check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDecision {
    Granted(GrantBasis),
    Denied(DenialReason),
}

impl AccessDecision {
    pub fn is_granted(&self) -> bool {
        matches!(self, Self::Granted(_))
    }

    pub fn denial_reason(&self) -> Option<DenialReason> {
        match self {
            Self::Denied(reason) => Some(*reason),
            Self::Granted(_) => None,
        }
    }
}

/// ACL errors.
#[derive(Debug, Error)]
pub enum AclError {
    /// The resource the mutation refers to does not exist. A denial from the
    /// caller's perspective, with a caller-facing message distinct from
    /// missing authorization.
    #[error("permission denied: resource not found")]
    ResourceMissing,

    #[error("permission denied: admin level required")]
    AdminRequired,

    #[error("grant not found")]
    GrantNotFound,

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A shared evidence entry as seen by a grantee.
#[derive(Debug, Clone)]
pub struct SharedGrant {
    pub evidence: EvidenceId,
    pub levels: Vec<PermissionLevel>,
}

/// Access controller over the grant table and the evidence registry.
///
/// Reads run at unlimited concurrency. Grant/revoke mutations on the same
/// evidence file are serialized through a per-resource mutex so concurrent
/// upserts of one `(evidence, grantee, level)` key resolve to a single row.
pub struct AccessController {
    storage: Arc<dyn VaultStorage>,
    clock: Arc<dyn Clock>,
    write_locks: DashMap<EvidenceId, Arc<Mutex<()>>>,
}

impl AccessController {
    pub fn new(storage: Arc<dyn VaultStorage>, clock: Arc<dyn Clock>) -> Self {
        Self {
            storage,
            clock,
            write_locks: DashMap::new(),
        }
    }

    /// Decide whether `actor` may perform an action requiring `required` on
    /// `evidence`. Pure read; expiry is evaluated against the injected clock
    /// at call time, independent of any sweep schedule.
    pub async fn can_access(
        &self,
        actor: ActorId,
        evidence: EvidenceId,
        required: PermissionLevel,
    ) -> Result<AccessDecision, AclError> {
        let record = match self.storage.get_evidence(&evidence).await? {
            Some(record) => record,
            None => return Ok(AccessDecision::Denied(DenialReason::ResourceMissing)),
        };

        if record.owner == actor {
            return Ok(AccessDecision::Granted(GrantBasis::Ownership));
        }

        let now = self.clock.now();
        let best = self
            .storage
            .grants_for(&evidence, &actor)
            .await?
            .into_iter()
            .filter(|grant| grant.is_active(now))
            .map(|grant| grant.level)
            .max();

        match best {
            Some(level) if level.satisfies(required) => {
                Ok(AccessDecision::Granted(GrantBasis::Grant(level)))
            }
            _ => Ok(AccessDecision::Denied(DenialReason::NoActiveGrant)),
        }
    }

    /// Grant `level` on `evidence` to `grantee`. The granter must hold admin
    /// (owners always do). Re-granting an existing `(evidence, grantee,
    /// level)` refreshes `granted_by`/`granted_at`/`expires_at` in place.
    pub async fn grant(
        &self,
        granter: ActorId,
        evidence: EvidenceId,
        grantee: ActorId,
        level: PermissionLevel,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<PermissionGrant, AclError> {
        self.require_admin(granter, evidence).await?;

        let lock = self.write_lock(evidence);
        let _serialized = lock.lock().await;

        let grant = PermissionGrant {
            evidence,
            grantee,
            level,
            granted_by: granter,
            granted_at: self.clock.now(),
            expires_at,
        };
        self.storage.upsert_grant(grant.clone()).await?;
        info!(%granter, %grantee, %evidence, level = %level, "permission granted");
        Ok(grant)
    }

    /// Remove exactly one grant row. Revoking a grant that does not exist
    /// reports `GrantNotFound`, which is neither success nor fatal.
    pub async fn revoke(
        &self,
        revoker: ActorId,
        evidence: EvidenceId,
        grantee: ActorId,
        level: PermissionLevel,
    ) -> Result<(), AclError> {
        self.require_owner_or_admin(revoker, evidence).await?;

        let lock = self.write_lock(evidence);
        let _serialized = lock.lock().await;

        if self.storage.remove_grant(&evidence, &grantee, level).await? {
            info!(%revoker, %grantee, %evidence, level = %level, "permission revoked");
            Ok(())
        } else {
            Err(AclError::GrantNotFound)
        }
    }

    /// Remove every grant row for `(evidence, grantee)` in one operation.
    pub async fn revoke_all(
        &self,
        revoker: ActorId,
        evidence: EvidenceId,
        grantee: ActorId,
    ) -> Result<u64, AclError> {
        self.require_owner_or_admin(revoker, evidence).await?;

        let lock = self.write_lock(evidence);
        let _serialized = lock.lock().await;

        let removed = self.storage.remove_all_grants(&evidence, &grantee).await?;
        if removed == 0 {
            return Err(AclError::GrantNotFound);
        }
        info!(%revoker, %grantee, %evidence, removed, "all permissions revoked");
        Ok(removed)
    }

    /// Delete grant rows whose expiry has passed. Advisory cleanup only:
    /// `can_access` re-checks expiry at evaluation time regardless.
    pub async fn sweep_expired(&self) -> Result<u64, AclError> {
        let removed = self
            .storage
            .sweep_expired_grants(self.clock.now())
            .await?;
        if removed > 0 {
            debug!(removed, "expired grants swept");
        }
        Ok(removed)
    }

    /// All grant rows on a file, any expiry state.
    pub async fn grants_for_evidence(
        &self,
        evidence: EvidenceId,
    ) -> Result<Vec<PermissionGrant>, AclError> {
        Ok(self.storage.grants_for_evidence(&evidence).await?)
    }

    /// Evidence shared with an actor through currently-active grants,
    /// grouped per file with the levels held.
    pub async fn shared_with(&self, grantee: ActorId) -> Result<Vec<SharedGrant>, AclError> {
        let now = self.clock.now();
        let mut shared: Vec<SharedGrant> = Vec::new();
        for grant in self.storage.grants_for_actor(&grantee).await? {
            if !grant.is_active(now) {
                continue;
            }
            match shared.iter_mut().find(|s| s.evidence == grant.evidence) {
                Some(entry) => entry.levels.push(grant.level),
                None => shared.push(SharedGrant {
                    evidence: grant.evidence,
                    levels: vec![grant.level],
                }),
            }
        }
        Ok(shared)
    }

    async fn require_admin(&self, actor: ActorId, evidence: EvidenceId) -> Result<(), AclError> {
        match self
            .can_access(actor, evidence, PermissionLevel::Admin)
            .await?
        {
            AccessDecision::Granted(_) => Ok(()),
            AccessDecision::Denied(DenialReason::ResourceMissing) => Err(AclError::ResourceMissing),
            AccessDecision::Denied(DenialReason::NoActiveGrant) => Err(AclError::AdminRequired),
        }
    }

    /// Owners may always revoke, without consulting the grant table.
    async fn require_owner_or_admin(
        &self,
        actor: ActorId,
        evidence: EvidenceId,
    ) -> Result<(), AclError> {
        let record = self
            .storage
            .get_evidence(&evidence)
            .await?
            .ok_or(AclError::ResourceMissing)?;
        if record.owner == actor {
            return Ok(());
        }
        self.require_admin(actor, evidence).await
    }

    fn write_lock(&self, evidence: EvidenceId) -> Arc<Mutex<()>> {
        self.write_locks
            .entry(evidence)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Duration;
    use veritas_store::memory::InMemoryVaultStorage;
    use veritas_store::{
        AccessLogEntry, AccessLogQuery, AccessLogRow, AccessLogStore, DetectionRecord,
        DetectionStore, EvidenceRecord, EvidenceStore, GrantStore, QueryWindow, StoreResult,
    };
    use veritas_types::ManualClock;

    fn fixture() -> (Arc<InMemoryVaultStorage>, Arc<ManualClock>, AccessController) {
        let storage = Arc::new(InMemoryVaultStorage::new());
        let clock = ManualClock::starting_now();
        let controller = AccessController::new(storage.clone(), clock.clone());
        (storage, clock, controller)
    }

    async fn seed_evidence(storage: &InMemoryVaultStorage, owner: ActorId) -> EvidenceId {
        let record = EvidenceRecord {
            evidence_id: EvidenceId::generate(),
            owner,
            filename: "scan.tiff".to_string(),
            storage_ref: "store/scan.tiff".to_string(),
            size_bytes: 512,
            mime_type: Some("image/tiff".to_string()),
            sha256: "cd".repeat(32),
            created_at: Utc::now(),
        };
        let id = record.evidence_id;
        storage.create_evidence(record).await.unwrap();
        id
    }

    #[tokio::test]
    async fn owner_holds_every_level_implicitly() {
        let (storage, _clock, controller) = fixture();
        let owner = ActorId::generate();
        let evidence = seed_evidence(&storage, owner).await;

        for level in PermissionLevel::all() {
            let decision = controller.can_access(owner, evidence, level).await.unwrap();
            assert_eq!(decision, AccessDecision::Granted(GrantBasis::Ownership));
        }
        // And no grant row was materialized for it.
        assert!(storage.grants_for_evidence(&evidence).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_resources_fail_closed() {
        let (_storage, _clock, controller) = fixture();
        let decision = controller
            .can_access(ActorId::generate(), EvidenceId::generate(), PermissionLevel::Read)
            .await
            .unwrap();
        assert_eq!(
            decision,
            AccessDecision::Denied(DenialReason::ResourceMissing)
        );
    }

    #[tokio::test]
    async fn higher_levels_imply_lower_capabilities() {
        let (storage, _clock, controller) = fixture();
        let owner = ActorId::generate();
        let analyst = ActorId::generate();
        let evidence = seed_evidence(&storage, owner).await;

        controller
            .grant(owner, evidence, analyst, PermissionLevel::Write, None)
            .await
            .unwrap();

        assert!(controller
            .can_access(analyst, evidence, PermissionLevel::Read)
            .await
            .unwrap()
            .is_granted());
        assert!(controller
            .can_access(analyst, evidence, PermissionLevel::Write)
            .await
            .unwrap()
            .is_granted());
        assert!(!controller
            .can_access(analyst, evidence, PermissionLevel::Admin)
            .await
            .unwrap()
            .is_granted());
    }

    #[tokio::test]
    async fn expired_grants_deny_before_any_sweep() {
        let (storage, clock, controller) = fixture();
        let owner = ActorId::generate();
        let analyst = ActorId::generate();
        let evidence = seed_evidence(&storage, owner).await;

        let expiry = clock.now() + Duration::minutes(10);
        controller
            .grant(owner, evidence, analyst, PermissionLevel::Read, Some(expiry))
            .await
            .unwrap();

        assert!(controller
            .can_access(analyst, evidence, PermissionLevel::Read)
            .await
            .unwrap()
            .is_granted());

        clock.advance(Duration::minutes(11));
        // Row still present, decision already negative.
        assert_eq!(storage.grants_for_evidence(&evidence).await.unwrap().len(), 1);
        assert_eq!(
            controller
                .can_access(analyst, evidence, PermissionLevel::Read)
                .await
                .unwrap(),
            AccessDecision::Denied(DenialReason::NoActiveGrant)
        );

        assert_eq!(controller.sweep_expired().await.unwrap(), 1);
        assert_eq!(
            controller
                .can_access(analyst, evidence, PermissionLevel::Read)
                .await
                .unwrap(),
            AccessDecision::Denied(DenialReason::NoActiveGrant)
        );
    }

    #[tokio::test]
    async fn granting_requires_admin_with_distinct_errors() {
        let (storage, _clock, controller) = fixture();
        let owner = ActorId::generate();
        let stranger = ActorId::generate();
        let grantee = ActorId::generate();
        let evidence = seed_evidence(&storage, owner).await;

        let err = controller
            .grant(stranger, evidence, grantee, PermissionLevel::Read, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AclError::AdminRequired));

        let err = controller
            .grant(owner, EvidenceId::generate(), grantee, PermissionLevel::Read, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AclError::ResourceMissing));
    }

    #[tokio::test]
    async fn admin_grantee_may_grant_onward() {
        let (storage, _clock, controller) = fixture();
        let owner = ActorId::generate();
        let deputy = ActorId::generate();
        let analyst = ActorId::generate();
        let evidence = seed_evidence(&storage, owner).await;

        controller
            .grant(owner, evidence, deputy, PermissionLevel::Admin, None)
            .await
            .unwrap();
        controller
            .grant(deputy, evidence, analyst, PermissionLevel::Read, None)
            .await
            .unwrap();

        assert!(controller
            .can_access(analyst, evidence, PermissionLevel::Read)
            .await
            .unwrap()
            .is_granted());
    }

    #[tokio::test]
    async fn regrant_updates_metadata_without_duplicating() {
        let (storage, clock, controller) = fixture();
        let owner = ActorId::generate();
        let analyst = ActorId::generate();
        let evidence = seed_evidence(&storage, owner).await;

        controller
            .grant(owner, evidence, analyst, PermissionLevel::Read, None)
            .await
            .unwrap();
        let expiry = clock.now() + Duration::days(7);
        controller
            .grant(owner, evidence, analyst, PermissionLevel::Read, Some(expiry))
            .await
            .unwrap();

        let rows = storage.grants_for(&evidence, &analyst).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].expires_at, Some(expiry));
    }

    #[tokio::test]
    async fn revoking_missing_grant_is_not_found() {
        let (storage, _clock, controller) = fixture();
        let owner = ActorId::generate();
        let analyst = ActorId::generate();
        let evidence = seed_evidence(&storage, owner).await;

        let err = controller
            .revoke(owner, evidence, analyst, PermissionLevel::Read)
            .await
            .unwrap_err();
        assert!(matches!(err, AclError::GrantNotFound));
    }

    #[tokio::test]
    async fn owner_revokes_without_any_grant_row_of_their_own() {
        let (storage, _clock, controller) = fixture();
        let owner = ActorId::generate();
        let analyst = ActorId::generate();
        let evidence = seed_evidence(&storage, owner).await;

        controller
            .grant(owner, evidence, analyst, PermissionLevel::Read, None)
            .await
            .unwrap();
        controller
            .grant(owner, evidence, analyst, PermissionLevel::Write, None)
            .await
            .unwrap();

        assert_eq!(
            controller.revoke_all(owner, evidence, analyst).await.unwrap(),
            2
        );
        assert!(!controller
            .can_access(analyst, evidence, PermissionLevel::Read)
            .await
            .unwrap()
            .is_granted());
    }

    #[tokio::test]
    async fn shared_listing_reports_active_grants_only() {
        let (storage, clock, controller) = fixture();
        let owner = ActorId::generate();
        let analyst = ActorId::generate();
        let evidence = seed_evidence(&storage, owner).await;
        let other = seed_evidence(&storage, owner).await;

        controller
            .grant(owner, evidence, analyst, PermissionLevel::Read, None)
            .await
            .unwrap();
        let expiry = clock.now() + Duration::minutes(1);
        controller
            .grant(owner, other, analyst, PermissionLevel::Write, Some(expiry))
            .await
            .unwrap();

        clock.advance(Duration::minutes(5));
        let shared = controller.shared_with(analyst).await.unwrap();
        assert_eq!(shared.len(), 1);
        assert_eq!(shared[0].evidence, evidence);
    }

    /// Storage stub whose every call fails, for fail-closed checks.
    struct FailingStore;

    fn backend_err<T>() -> StoreResult<T> {
        Err(veritas_store::StoreError::Backend("disk unavailable".into()))
    }

    #[async_trait]
    impl EvidenceStore for FailingStore {
        async fn create_evidence(&self, _: EvidenceRecord) -> StoreResult<()> {
            backend_err()
        }
        async fn get_evidence(&self, _: &EvidenceId) -> StoreResult<Option<EvidenceRecord>> {
            backend_err()
        }
        async fn list_owned(
            &self,
            _: &ActorId,
            _: QueryWindow,
        ) -> StoreResult<Vec<EvidenceRecord>> {
            backend_err()
        }
        async fn delete_evidence(&self, _: &EvidenceId) -> StoreResult<()> {
            backend_err()
        }
    }

    #[async_trait]
    impl GrantStore for FailingStore {
        async fn upsert_grant(&self, _: PermissionGrant) -> StoreResult<()> {
            backend_err()
        }
        async fn grants_for(
            &self,
            _: &EvidenceId,
            _: &ActorId,
        ) -> StoreResult<Vec<PermissionGrant>> {
            backend_err()
        }
        async fn grants_for_evidence(&self, _: &EvidenceId) -> StoreResult<Vec<PermissionGrant>> {
            backend_err()
        }
        async fn grants_for_actor(&self, _: &ActorId) -> StoreResult<Vec<PermissionGrant>> {
            backend_err()
        }
        async fn remove_grant(
            &self,
            _: &EvidenceId,
            _: &ActorId,
            _: PermissionLevel,
        ) -> StoreResult<bool> {
            backend_err()
        }
        async fn remove_all_grants(&self, _: &EvidenceId, _: &ActorId) -> StoreResult<u64> {
            backend_err()
        }
        async fn sweep_expired_grants(&self, _: DateTime<Utc>) -> StoreResult<u64> {
            backend_err()
        }
    }

    #[async_trait]
    impl AccessLogStore for FailingStore {
        async fn record_access(&self, _: AccessLogEntry) -> StoreResult<AccessLogRow> {
            backend_err()
        }
        async fn query_access(&self, _: &AccessLogQuery) -> StoreResult<Vec<AccessLogRow>> {
            backend_err()
        }
        async fn purge_access_before(&self, _: DateTime<Utc>) -> StoreResult<u64> {
            backend_err()
        }
    }

    #[async_trait]
    impl DetectionStore for FailingStore {
        async fn record_detection(&self, _: DetectionRecord) -> StoreResult<()> {
            backend_err()
        }
        async fn detections_for(&self, _: &EvidenceId) -> StoreResult<Vec<DetectionRecord>> {
            backend_err()
        }
    }

    #[tokio::test]
    async fn storage_failure_is_an_error_never_an_allow() {
        let controller =
            AccessController::new(Arc::new(FailingStore), Arc::new(veritas_types::SystemClock));
        let result = controller
            .can_access(ActorId::generate(), EvidenceId::generate(), PermissionLevel::Read)
            .await;
        assert!(matches!(result, Err(AclError::Store(_))));
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        fn level_strategy() -> impl Strategy<Value = PermissionLevel> {
            prop_oneof![
                Just(PermissionLevel::Read),
                Just(PermissionLevel::Write),
                Just(PermissionLevel::Admin),
            ]
        }

        proptest! {
            #[test]
            fn decision_follows_the_level_order(
                granted in level_strategy(),
                required in level_strategy(),
            ) {
                let rt = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .expect("runtime");

                rt.block_on(async move {
                    let (storage, _clock, controller) = fixture();
                    let owner = ActorId::generate();
                    let analyst = ActorId::generate();
                    let evidence = seed_evidence(&storage, owner).await;

                    controller
                        .grant(owner, evidence, analyst, granted, None)
                        .await
                        .unwrap();

                    let decision = controller
                        .can_access(analyst, evidence, required)
                        .await
                        .unwrap();
                    assert_eq!(decision.is_granted(), granted >= required);
                });
            }
        }
    }
}
