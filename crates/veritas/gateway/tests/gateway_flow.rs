//! End-to-end custody scenarios across the ACL, audit chain, and gateway.

use std::sync::Arc;
use veritas_audit::{AuditService, FaultKind};
use veritas_gateway::{
    DetectionError, DetectionModel, DetectionVerdict, FileOperationGateway, MemoryByteStore,
    UploadRequest, ACCESS_DENIED_MESSAGE,
};
use veritas_store::memory::InMemoryVaultStorage;
use veritas_store::{AccessLogQuery, EvidenceStore, GrantStore};
use veritas_types::{
    ActorId, AuditEvent, ChainChannel, EvidenceId, OutcomeKind, PermissionLevel,
    SecurityEventKind, SystemClock,
};

struct StubDetector;

#[async_trait::async_trait]
impl DetectionModel for StubDetector {
    async fn analyze(&self, _storage_ref: &str) -> Result<DetectionVerdict, DetectionError> {
        Ok(DetectionVerdict {
            detector_name: "hifi-net".to_string(),
            detector_version: "2.3.1".to_string(),
            score: 0.87,
            is_flagged: true,
        })
    }
}

struct Harness {
    storage: Arc<InMemoryVaultStorage>,
    audit: Arc<AuditService>,
    gateway: FileOperationGateway,
    _chain_dir: tempfile::TempDir,
}

async fn harness() -> Harness {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();

    let storage = Arc::new(InMemoryVaultStorage::new());
    let clock = Arc::new(SystemClock);
    let chain_dir = tempfile::tempdir().unwrap();
    let audit = Arc::new(
        AuditService::open(storage.clone(), clock.clone(), chain_dir.path())
            .await
            .unwrap(),
    );
    let gateway = FileOperationGateway::new(
        storage.clone(),
        Arc::new(MemoryByteStore::new()),
        Arc::new(StubDetector),
        audit.clone(),
        clock,
    );
    Harness {
        storage,
        audit,
        gateway,
        _chain_dir: chain_dir,
    }
}

async fn upload(harness: &Harness, owner: ActorId, filename: &str) -> EvidenceId {
    let result = harness
        .gateway
        .upload(
            owner,
            UploadRequest {
                filename: filename.to_string(),
                mime_type: Some("image/png".to_string()),
                bytes: b"frame pixels".to_vec(),
            },
        )
        .await;
    assert!(result.success, "{}", result.message);
    result.data.unwrap().evidence
}

#[tokio::test]
async fn share_revoke_lifecycle_is_fully_chained() {
    let h = harness().await;
    let owner = ActorId::generate();
    let analyst = ActorId::generate();

    let evidence = upload(&h, owner, "frame_001.png").await;
    let acl = h.gateway.access_controller();

    let shared = h
        .gateway
        .share(owner, evidence, analyst, PermissionLevel::Read, None)
        .await;
    assert!(shared.success, "{}", shared.message);

    assert!(acl
        .can_access(analyst, evidence, PermissionLevel::Read)
        .await
        .unwrap()
        .is_granted());
    assert!(!acl
        .can_access(analyst, evidence, PermissionLevel::Write)
        .await
        .unwrap()
        .is_granted());

    let revoked = h
        .gateway
        .revoke_access(owner, evidence, analyst, PermissionLevel::Read)
        .await;
    assert!(revoked.success, "{}", revoked.message);
    assert!(!acl
        .can_access(analyst, evidence, PermissionLevel::Read)
        .await
        .unwrap()
        .is_granted());

    // Upload, share, revoke: one chain-linked record each, plus the init
    // record anchoring the channel.
    let verification = h.audit.verify_channel(ChainChannel::Access).await.unwrap();
    assert!(verification.valid, "{}", verification.summary);
    assert_eq!(verification.event_records, 3);
    assert_eq!(verification.total_records, 4);

    let records = h
        .audit
        .chain()
        .sink(ChainChannel::Access)
        .read_all()
        .await
        .unwrap();
    for pair in records.windows(2) {
        assert_eq!(pair[1].prev_hash, pair[0].record_hash);
    }
}

#[tokio::test]
async fn denials_are_unified_on_the_wire_but_distinct_in_the_audit() {
    let h = harness().await;
    let owner = ActorId::generate();
    let outsider = ActorId::generate();

    let evidence = upload(&h, owner, "ledger.pdf").await;

    // Denied attempt on an existing resource.
    let refused = h.gateway.download(outsider, evidence).await;
    assert!(!refused.success);
    assert_eq!(refused.kind, OutcomeKind::Denied);
    assert_eq!(refused.message, ACCESS_DENIED_MESSAGE);

    // Missing resource reads identically to the caller.
    let missing = h.gateway.download(outsider, EvidenceId::generate()).await;
    assert_eq!(missing.kind, OutcomeKind::Denied);
    assert_eq!(missing.message, ACCESS_DENIED_MESSAGE);

    // The security channel keeps the two reasons apart.
    let records = h
        .audit
        .chain()
        .sink(ChainChannel::Security)
        .read_all()
        .await
        .unwrap();
    let reasons: Vec<&str> = records
        .iter()
        .filter_map(|record| match &record.event {
            AuditEvent::SecurityEvent {
                kind: SecurityEventKind::AccessDenied,
                metadata,
                ..
            } => metadata.get("reason").and_then(|v| v.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(reasons, vec!["permission_denied", "resource_missing"]);

    let verification = h.audit.verify_channel(ChainChannel::Security).await.unwrap();
    assert!(verification.valid);
}

#[tokio::test]
async fn tampering_with_history_is_detected_end_to_end() {
    let h = harness().await;
    let owner = ActorId::generate();
    let analyst = ActorId::generate();

    let evidence = upload(&h, owner, "frame_002.png").await;
    h.gateway
        .share(owner, evidence, analyst, PermissionLevel::Read, None)
        .await;
    h.gateway.view(analyst, evidence).await;
    h.gateway.download(analyst, evidence).await;

    let before = h.audit.verify_channel(ChainChannel::Access).await.unwrap();
    assert!(before.valid);
    assert_eq!(before.total_records, 5);

    // Rewrite the share record's payload as an attacker with file access
    // but no ability to recompute downstream hashes.
    let path = h.audit.chain().sink(ChainChannel::Access).path().to_path_buf();
    let content = std::fs::read_to_string(&path).unwrap();
    let mutated = content.replacen("FILE_SHARE", "FILE_PRUNE", 1);
    assert_ne!(content, mutated);
    std::fs::write(&path, mutated).unwrap();

    let after = h.audit.verify_channel(ChainChannel::Access).await.unwrap();
    assert!(!after.valid);
    assert_eq!(after.total_records, 5);
    // The share record is line 3 (init, upload, share, view, download).
    assert!(after.faults.iter().all(|f| f.position >= 3));
    assert!(after
        .faults
        .iter()
        .any(|f| f.kind == FaultKind::HashMismatch && f.position == 3));
}

#[tokio::test]
async fn concurrent_grants_of_one_key_leave_one_row_and_two_records() {
    let h = harness().await;
    let owner = ActorId::generate();
    let deputy_a = ActorId::generate();
    let deputy_b = ActorId::generate();
    let grantee = ActorId::generate();

    let evidence = upload(&h, owner, "frame_003.png").await;
    for deputy in [deputy_a, deputy_b] {
        let result = h
            .gateway
            .share(owner, evidence, deputy, PermissionLevel::Admin, None)
            .await;
        assert!(result.success);
    }

    let (first, second) = tokio::join!(
        h.gateway
            .share(deputy_a, evidence, grantee, PermissionLevel::Read, None),
        h.gateway
            .share(deputy_b, evidence, grantee, PermissionLevel::Read, None),
    );
    assert!(first.success, "{}", first.message);
    assert!(second.success, "{}", second.message);

    // Exactly one surviving row for the key.
    let rows = h.storage.grants_for(&evidence, &grantee).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert!([deputy_a, deputy_b].contains(&rows[0].granted_by));

    // Both attempts are on the chain, and the chain did not fork.
    let records = h
        .audit
        .chain()
        .sink(ChainChannel::Access)
        .read_all()
        .await
        .unwrap();
    let grantee_str = grantee.to_string();
    let share_count = records
        .iter()
        .filter(|record| match &record.event {
            AuditEvent::UserAction {
                action, metadata, ..
            } if action == "FILE_SHARE" => {
                metadata.get("grantee").and_then(|v| v.as_str()) == Some(grantee_str.as_str())
            }
            _ => false,
        })
        .count();
    assert_eq!(share_count, 2);

    let verification = h.audit.verify_channel(ChainChannel::Access).await.unwrap();
    assert!(verification.valid, "{}", verification.summary);
}

#[tokio::test]
async fn delete_removes_rows_and_audits_the_terminal_action() {
    let h = harness().await;
    let owner = ActorId::generate();
    let analyst = ActorId::generate();

    let evidence = upload(&h, owner, "frame_004.png").await;
    h.gateway
        .share(owner, evidence, analyst, PermissionLevel::Read, None)
        .await;
    h.gateway.download(analyst, evidence).await;

    let deleted = h.gateway.delete(owner, evidence).await;
    assert!(deleted.success, "{}", deleted.message);

    assert!(h.storage.get_evidence(&evidence).await.unwrap().is_none());
    assert!(h
        .storage
        .grants_for_evidence(&evidence)
        .await
        .unwrap()
        .is_empty());
    let rows = h
        .audit
        .query_access(&AccessLogQuery {
            evidence: Some(evidence),
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(rows.is_empty());

    // The chain retains the full history, delete included.
    let verification = h.audit.verify_channel(ChainChannel::Access).await.unwrap();
    assert!(verification.valid);
    assert_eq!(verification.event_records, 4);

    // Anything after the delete is a unified denial.
    let gone = h.gateway.view(analyst, evidence).await;
    assert_eq!(gone.kind, OutcomeKind::Denied);
    assert_eq!(gone.message, ACCESS_DENIED_MESSAGE);
}

#[tokio::test]
async fn detection_verdicts_attach_as_metadata_without_gating_access() {
    let h = harness().await;
    let owner = ActorId::generate();
    let reader = ActorId::generate();

    let evidence = upload(&h, owner, "frame_005.png").await;
    h.gateway
        .share(owner, evidence, reader, PermissionLevel::Read, None)
        .await;

    // Analysis needs write; a reader cannot trigger it.
    let refused = h.gateway.analyze(reader, evidence).await;
    assert_eq!(refused.kind, OutcomeKind::Denied);

    let analyzed = h.gateway.analyze(owner, evidence).await;
    assert!(analyzed.success, "{}", analyzed.message);
    assert!(analyzed.data.unwrap().is_flagged);

    // A flagged verdict changes nothing about who may read.
    let view = h.gateway.view(reader, evidence).await;
    assert!(view.success);
    let view = view.data.unwrap();
    assert_eq!(view.detections.len(), 1);
    assert!(view.detections[0].is_flagged);
}

#[tokio::test]
async fn download_returns_the_stored_bytes_with_matching_fingerprint() {
    let h = harness().await;
    let owner = ActorId::generate();

    let uploaded = h
        .gateway
        .upload(
            owner,
            UploadRequest {
                filename: "original.bin".to_string(),
                mime_type: None,
                bytes: b"frame pixels".to_vec(),
            },
        )
        .await;
    assert!(uploaded.success);
    let receipt = uploaded.data.unwrap();

    let downloaded = h.gateway.download(owner, receipt.evidence).await;
    assert!(downloaded.success);
    let payload = downloaded.data.unwrap();
    assert_eq!(payload.bytes, b"frame pixels");
    assert_eq!(payload.filename, "original.bin");

    let record = h
        .storage
        .get_evidence(&receipt.evidence)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.sha256, receipt.sha256);
}

#[tokio::test]
async fn exported_snapshots_verify_independently() {
    let h = harness().await;
    let owner = ActorId::generate();
    let evidence = upload(&h, owner, "frame_006.png").await;
    h.gateway.view(owner, evidence).await;

    let dest = h._chain_dir.path().join("evidence_export.jsonl");
    let receipt = h
        .audit
        .export_channel(ChainChannel::Access, &dest)
        .await
        .unwrap();
    assert!(receipt.verification.valid);
    assert_eq!(receipt.verification.total_records, 3);

    let content = std::fs::read_to_string(&dest).unwrap();
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(lines.len(), 4);
    assert!(lines.last().unwrap().contains("CHAIN_EXPORT"));
}
