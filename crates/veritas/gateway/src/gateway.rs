//! The file operation gateway.

use crate::interfaces::{DetectionModel, DetectionVerdict, EvidenceByteStore};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{info, warn};
use veritas_acl::{AccessController, AccessDecision, AclError, DenialReason};
use veritas_audit::{AuditError, AuditService};
use veritas_store::{
    AccessLogQuery, AccessLogRow, DetectionRecord, EvidenceRecord, PermissionGrant, QueryWindow,
    VaultStorage,
};
use veritas_types::{
    AccessAction, ActorId, AuditEvent, Clock, EvidenceId, EventTarget, OperationResult,
    PermissionLevel, SecurityEventKind, SystemEventKind,
};

/// Unified wire-level denial message. Missing resources and missing
/// authorization read identically to callers; the audit record keeps the
/// distinction, so the wire cannot be used to enumerate evidence IDs.
pub const ACCESS_DENIED_MESSAGE: &str = "access denied";

/// Upload input.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub filename: String,
    pub mime_type: Option<String>,
    pub bytes: Vec<u8>,
}

/// Outcome data of a successful upload.
#[derive(Debug, Clone)]
pub struct UploadReceipt {
    pub evidence: EvidenceId,
    pub sha256: String,
    /// Hash-chain receipt of the upload's audit record.
    pub audit_receipt: String,
}

/// Everything a reader with access may see about one evidence file.
#[derive(Debug, Clone)]
pub struct EvidenceView {
    pub record: EvidenceRecord,
    pub detections: Vec<DetectionRecord>,
    pub grants: Vec<PermissionGrant>,
}

/// Downloaded evidence content.
#[derive(Debug, Clone)]
pub struct DownloadPayload {
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// One shared file as seen by a grantee.
#[derive(Debug, Clone)]
pub struct SharedEvidence {
    pub record: EvidenceRecord,
    pub levels: Vec<PermissionLevel>,
}

/// Owned and shared evidence of one actor.
#[derive(Debug, Clone, Default)]
pub struct EvidenceListing {
    pub owned: Vec<EvidenceRecord>,
    pub shared: Vec<SharedEvidence>,
}

/// Per-actor summary for dashboards.
#[derive(Debug, Clone)]
pub struct EvidenceStats {
    pub owned_files: usize,
    pub shared_files: usize,
    pub total_size_bytes: u64,
    pub recent_activity: Vec<AccessLogRow>,
}

/// Orchestrates evidence operations: authorize, mutate, audit, in that
/// order. A failed audit chain write fails the operation even though the
/// business mutation already committed; it is never rolled back.
pub struct FileOperationGateway {
    storage: Arc<dyn VaultStorage>,
    bytes: Arc<dyn EvidenceByteStore>,
    detector: Arc<dyn DetectionModel>,
    acl: AccessController,
    audit: Arc<AuditService>,
    clock: Arc<dyn Clock>,
}

impl FileOperationGateway {
    pub fn new(
        storage: Arc<dyn VaultStorage>,
        bytes: Arc<dyn EvidenceByteStore>,
        detector: Arc<dyn DetectionModel>,
        audit: Arc<AuditService>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let acl = AccessController::new(storage.clone(), clock.clone());
        Self {
            storage,
            bytes,
            detector,
            acl,
            audit,
            clock,
        }
    }

    /// The decision surface, for routing layers that need raw checks.
    pub fn access_controller(&self) -> &AccessController {
        &self.acl
    }

    /// Store bytes, register the evidence record, audit the upload.
    pub async fn upload(&self, actor: ActorId, request: UploadRequest) -> OperationResult<UploadReceipt> {
        let stored = match self.bytes.store(&request.filename, &request.bytes).await {
            Ok(stored) => stored,
            Err(err) => {
                return OperationResult::failed(format!("could not store evidence bytes: {err}"))
            }
        };

        let record = EvidenceRecord {
            evidence_id: EvidenceId::generate(),
            owner: actor,
            filename: request.filename.clone(),
            storage_ref: stored.storage_ref.clone(),
            size_bytes: stored.size_bytes,
            mime_type: request.mime_type,
            sha256: stored.sha256.clone(),
            created_at: self.clock.now(),
        };
        let evidence = record.evidence_id;

        if let Err(err) = self.storage.create_evidence(record).await {
            if let Err(cleanup) = self.bytes.remove(&stored.storage_ref).await {
                warn!(%cleanup, storage_ref = %stored.storage_ref, "orphaned bytes after failed registration");
            }
            return OperationResult::failed(format!("could not register evidence: {err}"));
        }
        info!(%actor, %evidence, filename = %request.filename, "evidence uploaded");

        let event = AuditEvent::file_access(actor, evidence, AccessAction::Upload)
            .with_metadata("filename", request.filename)
            .with_metadata("size_bytes", stored.size_bytes)
            .with_metadata("sha256", stored.sha256.clone());
        match self.audit.record(event).await {
            Ok(audit_receipt) => OperationResult::ok(
                format!("evidence uploaded as {evidence}"),
                UploadReceipt {
                    evidence,
                    sha256: stored.sha256,
                    audit_receipt,
                },
            ),
            Err(err) => audit_failure(err),
        }
    }

    /// Read evidence metadata, detections, and grants.
    pub async fn view(&self, actor: ActorId, evidence: EvidenceId) -> OperationResult<EvidenceView> {
        if let Err(refusal) = self
            .authorize(actor, evidence, PermissionLevel::Read)
            .await
        {
            return refusal;
        }

        let record = match self.storage.get_evidence(&evidence).await {
            Ok(Some(record)) => record,
            Ok(None) => return OperationResult::failed("evidence vanished during view"),
            Err(err) => return OperationResult::failed(format!("could not load evidence: {err}")),
        };
        let detections = match self.storage.detections_for(&evidence).await {
            Ok(detections) => detections,
            Err(err) => return OperationResult::failed(format!("could not load detections: {err}")),
        };
        let grants = match self.acl.grants_for_evidence(evidence).await {
            Ok(grants) => grants,
            Err(err) => return OperationResult::failed(format!("could not load grants: {err}")),
        };

        let event = AuditEvent::file_access(actor, evidence, AccessAction::View)
            .with_metadata("view_type", "metadata");
        match self.audit.record(event).await {
            Ok(_) => OperationResult::ok(
                "evidence details retrieved",
                EvidenceView {
                    record,
                    detections,
                    grants,
                },
            ),
            Err(err) => audit_failure(err),
        }
    }

    /// Fetch the evidence bytes.
    pub async fn download(
        &self,
        actor: ActorId,
        evidence: EvidenceId,
    ) -> OperationResult<DownloadPayload> {
        if let Err(refusal) = self
            .authorize(actor, evidence, PermissionLevel::Read)
            .await
        {
            return refusal;
        }

        let record = match self.storage.get_evidence(&evidence).await {
            Ok(Some(record)) => record,
            Ok(None) => return OperationResult::failed("evidence vanished during download"),
            Err(err) => return OperationResult::failed(format!("could not load evidence: {err}")),
        };
        let bytes = match self.bytes.fetch(&record.storage_ref).await {
            Ok(bytes) => bytes,
            Err(err) => return OperationResult::failed(format!("could not fetch bytes: {err}")),
        };

        let event = AuditEvent::file_access(actor, evidence, AccessAction::Download)
            .with_metadata("size_bytes", bytes.len());
        match self.audit.record(event).await {
            Ok(_) => OperationResult::ok(
                format!("downloaded {}", record.filename),
                DownloadPayload {
                    filename: record.filename,
                    bytes,
                },
            ),
            Err(err) => audit_failure(err),
        }
    }

    /// Grant a level to another actor. The initiator must hold admin.
    pub async fn share(
        &self,
        actor: ActorId,
        evidence: EvidenceId,
        grantee: ActorId,
        level: PermissionLevel,
        expires_at: Option<DateTime<Utc>>,
    ) -> OperationResult<PermissionGrant> {
        let grant = match self.acl.grant(actor, evidence, grantee, level, expires_at).await {
            Ok(grant) => grant,
            Err(AclError::ResourceMissing) => {
                self.log_denial(actor, evidence, PermissionLevel::Admin, DenialReason::ResourceMissing)
                    .await;
                return OperationResult::denied(ACCESS_DENIED_MESSAGE);
            }
            Err(AclError::AdminRequired) => {
                self.log_denial(actor, evidence, PermissionLevel::Admin, DenialReason::NoActiveGrant)
                    .await;
                return OperationResult::denied(ACCESS_DENIED_MESSAGE);
            }
            Err(err) => return OperationResult::failed(format!("could not grant: {err}")),
        };

        let event = AuditEvent::user_action(actor, "FILE_SHARE", Some(EventTarget::evidence(evidence)))
            .with_metadata("grantee", grantee.to_string())
            .with_metadata("level", level.as_str())
            .with_metadata("expires_at", expires_at.map(|t| t.to_rfc3339()));
        match self.audit.record(event).await {
            Ok(_) => OperationResult::ok(format!("shared with {grantee} at {level}"), grant),
            Err(err) => audit_failure(err),
        }
    }

    /// Remove one granted level from another actor.
    pub async fn revoke_access(
        &self,
        actor: ActorId,
        evidence: EvidenceId,
        grantee: ActorId,
        level: PermissionLevel,
    ) -> OperationResult<()> {
        match self.acl.revoke(actor, evidence, grantee, level).await {
            Ok(()) => {}
            Err(AclError::GrantNotFound) => {
                return OperationResult::failed("permission not found");
            }
            Err(AclError::ResourceMissing) => {
                self.log_denial(actor, evidence, PermissionLevel::Admin, DenialReason::ResourceMissing)
                    .await;
                return OperationResult::denied(ACCESS_DENIED_MESSAGE);
            }
            Err(AclError::AdminRequired) => {
                self.log_denial(actor, evidence, PermissionLevel::Admin, DenialReason::NoActiveGrant)
                    .await;
                return OperationResult::denied(ACCESS_DENIED_MESSAGE);
            }
            Err(err) => return OperationResult::failed(format!("could not revoke: {err}")),
        }

        let event = AuditEvent::user_action(actor, "FILE_REVOKE", Some(EventTarget::evidence(evidence)))
            .with_metadata("grantee", grantee.to_string())
            .with_metadata("level", level.as_str());
        match self.audit.record(event).await {
            Ok(_) => OperationResult::ok_empty(format!("revoked {level} from {grantee}")),
            Err(err) => audit_failure(err),
        }
    }

    /// Remove every granted level from another actor in one operation.
    pub async fn revoke_all_access(
        &self,
        actor: ActorId,
        evidence: EvidenceId,
        grantee: ActorId,
    ) -> OperationResult<u64> {
        let removed = match self.acl.revoke_all(actor, evidence, grantee).await {
            Ok(removed) => removed,
            Err(AclError::GrantNotFound) => {
                return OperationResult::failed("no permissions found");
            }
            Err(AclError::ResourceMissing) => {
                self.log_denial(actor, evidence, PermissionLevel::Admin, DenialReason::ResourceMissing)
                    .await;
                return OperationResult::denied(ACCESS_DENIED_MESSAGE);
            }
            Err(AclError::AdminRequired) => {
                self.log_denial(actor, evidence, PermissionLevel::Admin, DenialReason::NoActiveGrant)
                    .await;
                return OperationResult::denied(ACCESS_DENIED_MESSAGE);
            }
            Err(err) => return OperationResult::failed(format!("could not revoke: {err}")),
        };

        let event =
            AuditEvent::user_action(actor, "FILE_REVOKE_ALL", Some(EventTarget::evidence(evidence)))
                .with_metadata("grantee", grantee.to_string())
                .with_metadata("removed", removed);
        match self.audit.record(event).await {
            Ok(_) => OperationResult::ok(
                format!("revoked {removed} permission(s) from {grantee}"),
                removed,
            ),
            Err(err) => audit_failure(err),
        }
    }

    /// Delete evidence, its grants, detections, and relational history, then
    /// audit the terminal action. A delete that cannot remove its dependent
    /// rows is a failed delete, never a partial success.
    pub async fn delete(&self, actor: ActorId, evidence: EvidenceId) -> OperationResult<()> {
        if let Err(refusal) = self
            .authorize(actor, evidence, PermissionLevel::Admin)
            .await
        {
            return refusal;
        }

        let record = match self.storage.get_evidence(&evidence).await {
            Ok(Some(record)) => record,
            Ok(None) => return OperationResult::failed("evidence vanished during delete"),
            Err(err) => return OperationResult::failed(format!("could not load evidence: {err}")),
        };

        if let Err(err) = self.bytes.remove(&record.storage_ref).await {
            return OperationResult::failed(format!("could not remove stored bytes: {err}"));
        }
        if let Err(err) = self.storage.delete_evidence(&evidence).await {
            return OperationResult::failed(format!("could not delete evidence rows: {err}"));
        }
        info!(%actor, %evidence, "evidence deleted");

        let event = AuditEvent::file_access(actor, evidence, AccessAction::Delete)
            .with_metadata("filename", record.filename)
            .with_metadata("deletion_type", "permanent");
        match self.audit.record(event).await {
            Ok(_) => OperationResult::ok_empty("evidence deleted"),
            Err(err) => audit_failure(err),
        }
    }

    /// Run the detection model on stored evidence and record the verdict.
    /// The verdict is informational metadata; it never gates access.
    pub async fn analyze(
        &self,
        actor: ActorId,
        evidence: EvidenceId,
    ) -> OperationResult<DetectionVerdict> {
        if let Err(refusal) = self
            .authorize(actor, evidence, PermissionLevel::Write)
            .await
        {
            return refusal;
        }

        let record = match self.storage.get_evidence(&evidence).await {
            Ok(Some(record)) => record,
            Ok(None) => return OperationResult::failed("evidence vanished during analysis"),
            Err(err) => return OperationResult::failed(format!("could not load evidence: {err}")),
        };

        let verdict = match self.detector.analyze(&record.storage_ref).await {
            Ok(verdict) => verdict,
            Err(err) => return OperationResult::failed(format!("detection failed: {err}")),
        };

        let detection = DetectionRecord {
            evidence,
            detector_name: verdict.detector_name.clone(),
            detector_version: verdict.detector_version.clone(),
            score: verdict.score,
            is_flagged: verdict.is_flagged,
            metadata: serde_json::json!({}),
            created_at: self.clock.now(),
        };
        if let Err(err) = self.storage.record_detection(detection).await {
            return OperationResult::failed(format!("could not record detection: {err}"));
        }

        let event = AuditEvent::system(SystemEventKind::DetectionRecorded)
            .with_metadata("evidence", evidence.to_string())
            .with_metadata("detector", verdict.detector_name.clone())
            .with_metadata("score", verdict.score)
            .with_metadata("is_flagged", verdict.is_flagged);
        match self.audit.record(event).await {
            Ok(_) => OperationResult::ok("detection recorded", verdict),
            Err(err) => audit_failure(err),
        }
    }

    /// Owned and shared evidence of one actor. Read-only, not audited.
    pub async fn list_evidence(&self, actor: ActorId) -> OperationResult<EvidenceListing> {
        let owned = match self.storage.list_owned(&actor, QueryWindow::default()).await {
            Ok(owned) => owned,
            Err(err) => return OperationResult::failed(format!("could not list evidence: {err}")),
        };

        let mut shared = Vec::new();
        let shared_grants = match self.acl.shared_with(actor).await {
            Ok(grants) => grants,
            Err(err) => return OperationResult::failed(format!("could not list shares: {err}")),
        };
        for entry in shared_grants {
            match self.storage.get_evidence(&entry.evidence).await {
                Ok(Some(record)) => shared.push(SharedEvidence {
                    record,
                    levels: entry.levels,
                }),
                // Grant rows may outlive a racing delete briefly; skip them.
                Ok(None) => continue,
                Err(err) => {
                    return OperationResult::failed(format!("could not list shares: {err}"))
                }
            }
        }

        let message = format!("found {} file(s)", owned.len() + shared.len());
        OperationResult::ok(message, EvidenceListing { owned, shared })
    }

    /// Per-actor dashboard summary.
    pub async fn evidence_statistics(&self, actor: ActorId) -> OperationResult<EvidenceStats> {
        let listing = match self.list_evidence(actor).await {
            OperationResult {
                success: true,
                data: Some(listing),
                ..
            } => listing,
            refused => {
                return OperationResult {
                    success: refused.success,
                    kind: refused.kind,
                    message: refused.message,
                    data: None,
                }
            }
        };

        let recent = match self
            .audit
            .query_access(&AccessLogQuery {
                actor: Some(actor),
                limit: Some(10),
                ..Default::default()
            })
            .await
        {
            Ok(rows) => rows,
            Err(err) => return OperationResult::failed(format!("could not load activity: {err}")),
        };

        let total_size_bytes = listing
            .owned
            .iter()
            .map(|r| r.size_bytes)
            .chain(listing.shared.iter().map(|s| s.record.size_bytes))
            .sum();

        OperationResult::ok(
            "statistics computed",
            EvidenceStats {
                owned_files: listing.owned.len(),
                shared_files: listing.shared.len(),
                total_size_bytes,
                recent_activity: recent,
            },
        )
    }

    /// Check, log a denial when refused, and unify the wire message.
    async fn authorize<T>(
        &self,
        actor: ActorId,
        evidence: EvidenceId,
        required: PermissionLevel,
    ) -> Result<(), OperationResult<T>> {
        let decision = match self.acl.can_access(actor, evidence, required).await {
            Ok(decision) => decision,
            Err(err) => {
                warn!(%err, %actor, %evidence, "access check failed; failing closed");
                return Err(OperationResult::failed("access check unavailable"));
            }
        };

        match decision {
            AccessDecision::Granted(_) => Ok(()),
            AccessDecision::Denied(reason) => {
                self.log_denial(actor, evidence, required, reason).await;
                Err(OperationResult::denied(ACCESS_DENIED_MESSAGE))
            }
        }
    }

    async fn log_denial(
        &self,
        actor: ActorId,
        evidence: EvidenceId,
        required: PermissionLevel,
        reason: DenialReason,
    ) {
        let reason_label = match reason {
            DenialReason::ResourceMissing => "resource_missing",
            DenialReason::NoActiveGrant => "permission_denied",
        };
        let event = AuditEvent::security(SecurityEventKind::AccessDenied, Some(actor))
            .with_metadata("evidence", evidence.to_string())
            .with_metadata("required_level", required.as_str())
            .with_metadata("reason", reason_label);
        if let Err(err) = self.audit.record(event).await {
            warn!(%err, %actor, %evidence, "could not audit denied attempt");
        }
    }
}

fn audit_failure<T>(err: AuditError) -> OperationResult<T> {
    if err.is_retryable() {
        OperationResult::retryable(format!("audit log busy: {err}"))
    } else {
        OperationResult::failed(format!("operation applied but audit record failed: {err}"))
    }
}
