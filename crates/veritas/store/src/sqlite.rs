//! SQLite adapter for Veritas storage.
//!
//! This adapter is the durable backend for the grant table and the relational
//! access-event mirror. The hash-chained audit files are managed by
//! `veritas-audit` and never live in this database.

use crate::model::{
    AccessLogEntry, AccessLogQuery, AccessLogRow, DetectionRecord, EvidenceRecord, PermissionGrant,
};
use crate::traits::{
    AccessLogStore, DetectionStore, EvidenceStore, GrantStore, QueryWindow,
};
use crate::{StoreError, StoreResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use uuid::Uuid;
use veritas_types::{AccessAction, ActorId, EvidenceId, PermissionLevel};

/// SQLite-backed storage adapter.
#[derive(Clone)]
pub struct SqliteVaultStorage {
    pool: SqlitePool,
}

impl SqliteVaultStorage {
    /// Connect to SQLite and initialize the required schema.
    pub async fn connect(database_url: &str) -> StoreResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .map_err(|e| StoreError::Backend(format!("failed to connect sqlite: {e}")))?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Create adapter from an existing pool.
    pub async fn from_pool(pool: SqlitePool) -> StoreResult<Self> {
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn init_schema(&self) -> StoreResult<()> {
        let ddl = [
            r#"
            CREATE TABLE IF NOT EXISTS evidence (
                evidence_id TEXT PRIMARY KEY,
                owner TEXT NOT NULL,
                filename TEXT NOT NULL,
                storage_ref TEXT NOT NULL,
                size_bytes INTEGER NOT NULL,
                mime_type TEXT,
                sha256 TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS grants (
                evidence_id TEXT NOT NULL,
                grantee TEXT NOT NULL,
                level TEXT NOT NULL CHECK(level IN ('read', 'write', 'admin')),
                granted_by TEXT NOT NULL,
                granted_at TEXT NOT NULL,
                expires_at TEXT,
                PRIMARY KEY (evidence_id, grantee, level)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS access_log (
                row_id TEXT PRIMARY KEY,
                actor TEXT NOT NULL,
                evidence_id TEXT NOT NULL,
                action TEXT NOT NULL,
                ip_address TEXT,
                user_agent TEXT,
                ts TEXT NOT NULL,
                metadata TEXT NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS detections (
                evidence_id TEXT NOT NULL,
                detector_name TEXT NOT NULL,
                detector_version TEXT NOT NULL,
                score REAL NOT NULL,
                is_flagged INTEGER NOT NULL,
                metadata TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_evidence_owner ON evidence(owner)",
            "CREATE INDEX IF NOT EXISTS idx_grants_grantee ON grants(grantee)",
            "CREATE INDEX IF NOT EXISTS idx_access_log_actor ON access_log(actor)",
            "CREATE INDEX IF NOT EXISTS idx_access_log_evidence ON access_log(evidence_id)",
            "CREATE INDEX IF NOT EXISTS idx_access_log_ts ON access_log(ts)",
            "CREATE INDEX IF NOT EXISTS idx_detections_evidence ON detections(evidence_id)",
        ];

        for statement in ddl {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::Backend(format!("schema init failed: {e}")))?;
        }
        Ok(())
    }
}

#[async_trait]
impl EvidenceStore for SqliteVaultStorage {
    async fn create_evidence(&self, record: EvidenceRecord) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO evidence
                (evidence_id, owner, filename, storage_ref, size_bytes, mime_type, sha256, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(record.evidence_id.as_uuid().to_string())
        .bind(record.owner.as_uuid().to_string())
        .bind(&record.filename)
        .bind(&record.storage_ref)
        .bind(record.size_bytes as i64)
        .bind(&record.mime_type)
        .bind(&record.sha256)
        .bind(record.created_at)
        .execute(&self.pool)
        .await
        .map_err(map_unique_violation)?;
        Ok(())
    }

    async fn get_evidence(&self, evidence: &EvidenceId) -> StoreResult<Option<EvidenceRecord>> {
        let row = sqlx::query("SELECT * FROM evidence WHERE evidence_id = ?1")
            .bind(evidence.as_uuid().to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        row.map(evidence_from_row).transpose()
    }

    async fn list_owned(
        &self,
        owner: &ActorId,
        window: QueryWindow,
    ) -> StoreResult<Vec<EvidenceRecord>> {
        let limit = if window.limit == 0 {
            i64::MAX
        } else {
            window.limit as i64
        };
        let rows = sqlx::query(
            "SELECT * FROM evidence WHERE owner = ?1 ORDER BY created_at DESC LIMIT ?2 OFFSET ?3",
        )
        .bind(owner.as_uuid().to_string())
        .bind(limit)
        .bind(window.offset as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;
        rows.into_iter().map(evidence_from_row).collect()
    }

    async fn delete_evidence(&self, evidence: &EvidenceId) -> StoreResult<()> {
        let id = evidence.as_uuid().to_string();
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        for statement in [
            "DELETE FROM grants WHERE evidence_id = ?1",
            "DELETE FROM detections WHERE evidence_id = ?1",
            "DELETE FROM access_log WHERE evidence_id = ?1",
        ] {
            sqlx::query(statement)
                .bind(&id)
                .execute(&mut *tx)
                .await
                .map_err(|e| StoreError::Backend(e.to_string()))?;
        }

        let result = sqlx::query("DELETE FROM evidence WHERE evidence_id = ?1")
            .bind(&id)
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        if result.rows_affected() == 0 {
            // Roll back the cascade: the evidence row never existed.
            tx.rollback()
                .await
                .map_err(|e| StoreError::Backend(e.to_string()))?;
            return Err(StoreError::NotFound(format!(
                "evidence {} not found",
                evidence
            )));
        }

        tx.commit()
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl GrantStore for SqliteVaultStorage {
    async fn upsert_grant(&self, grant: PermissionGrant) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO grants (evidence_id, grantee, level, granted_by, granted_at, expires_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(evidence_id, grantee, level) DO UPDATE SET
                granted_by = excluded.granted_by,
                granted_at = excluded.granted_at,
                expires_at = excluded.expires_at
            "#,
        )
        .bind(grant.evidence.as_uuid().to_string())
        .bind(grant.grantee.as_uuid().to_string())
        .bind(grant.level.as_str())
        .bind(grant.granted_by.as_uuid().to_string())
        .bind(grant.granted_at)
        .bind(grant.expires_at)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn grants_for(
        &self,
        evidence: &EvidenceId,
        grantee: &ActorId,
    ) -> StoreResult<Vec<PermissionGrant>> {
        let rows = sqlx::query("SELECT * FROM grants WHERE evidence_id = ?1 AND grantee = ?2")
            .bind(evidence.as_uuid().to_string())
            .bind(grantee.as_uuid().to_string())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        rows.into_iter().map(grant_from_row).collect()
    }

    async fn grants_for_evidence(
        &self,
        evidence: &EvidenceId,
    ) -> StoreResult<Vec<PermissionGrant>> {
        let rows =
            sqlx::query("SELECT * FROM grants WHERE evidence_id = ?1 ORDER BY granted_at DESC")
                .bind(evidence.as_uuid().to_string())
                .fetch_all(&self.pool)
                .await
                .map_err(|e| StoreError::Backend(e.to_string()))?;
        rows.into_iter().map(grant_from_row).collect()
    }

    async fn grants_for_actor(&self, grantee: &ActorId) -> StoreResult<Vec<PermissionGrant>> {
        let rows = sqlx::query("SELECT * FROM grants WHERE grantee = ?1 ORDER BY granted_at DESC")
            .bind(grantee.as_uuid().to_string())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        rows.into_iter().map(grant_from_row).collect()
    }

    async fn remove_grant(
        &self,
        evidence: &EvidenceId,
        grantee: &ActorId,
        level: PermissionLevel,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            "DELETE FROM grants WHERE evidence_id = ?1 AND grantee = ?2 AND level = ?3",
        )
        .bind(evidence.as_uuid().to_string())
        .bind(grantee.as_uuid().to_string())
        .bind(level.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(result.rows_affected() > 0)
    }

    async fn remove_all_grants(
        &self,
        evidence: &EvidenceId,
        grantee: &ActorId,
    ) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM grants WHERE evidence_id = ?1 AND grantee = ?2")
            .bind(evidence.as_uuid().to_string())
            .bind(grantee.as_uuid().to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(result.rows_affected())
    }

    async fn sweep_expired_grants(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        let result =
            sqlx::query("DELETE FROM grants WHERE expires_at IS NOT NULL AND expires_at <= ?1")
                .bind(now)
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl AccessLogStore for SqliteVaultStorage {
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
        let metadata = serde_json::to_string(&row.metadata)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO access_log
                (row_id, actor, evidence_id, action, ip_address, user_agent, ts, metadata)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(&row.row_id)
        .bind(row.actor.as_uuid().to_string())
        .bind(row.evidence.as_uuid().to_string())
        .bind(row.action.as_str())
        .bind(&row.ip_address)
        .bind(&row.user_agent)
        .bind(row.timestamp)
        .bind(metadata)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(row)
    }

    async fn query_access(&self, query: &AccessLogQuery) -> StoreResult<Vec<AccessLogRow>> {
        // Filters compose as optional AND clauses, newest-first.
        let mut sql = String::from("SELECT * FROM access_log WHERE 1=1");
        if query.actor.is_some() {
            sql.push_str(" AND actor = ?1");
        }
        if query.evidence.is_some() {
            sql.push_str(" AND evidence_id = ?2");
        }
        if query.action.is_some() {
            sql.push_str(" AND action = ?3");
        }
        if query.from.is_some() {
            sql.push_str(" AND ts >= ?4");
        }
        if query.to.is_some() {
            sql.push_str(" AND ts < ?5");
        }
        sql.push_str(" ORDER BY ts DESC LIMIT ?6");

        let limit = query.limit.map(|l| l as i64).unwrap_or(i64::MAX);
        let rows = sqlx::query(&sql)
            .bind(query.actor.map(|a| a.as_uuid().to_string()))
            .bind(query.evidence.map(|e| e.as_uuid().to_string()))
            .bind(query.action.map(|a| a.as_str()))
            .bind(query.from)
            .bind(query.to)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        rows.into_iter().map(access_row_from_row).collect()
    }

    async fn purge_access_before(&self, cutoff: DateTime<Utc>) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM access_log WHERE ts < ?1")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl DetectionStore for SqliteVaultStorage {
    async fn record_detection(&self, record: DetectionRecord) -> StoreResult<()> {
        let metadata = serde_json::to_string(&record.metadata)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        sqlx::query(
            r#"
            INSERT INTO detections
                (evidence_id, detector_name, detector_version, score, is_flagged, metadata, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(record.evidence.as_uuid().to_string())
        .bind(&record.detector_name)
        .bind(&record.detector_version)
        .bind(record.score)
        .bind(record.is_flagged)
        .bind(metadata)
        .bind(record.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn detections_for(&self, evidence: &EvidenceId) -> StoreResult<Vec<DetectionRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM detections WHERE evidence_id = ?1 ORDER BY created_at DESC",
        )
        .bind(evidence.as_uuid().to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;
        rows.into_iter().map(detection_from_row).collect()
    }
}

fn map_unique_violation(err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            StoreError::Conflict(db.message().to_string())
        }
        _ => StoreError::Backend(err.to_string()),
    }
}

fn parse_actor(raw: &str) -> StoreResult<ActorId> {
    Uuid::parse_str(raw)
        .map(ActorId::from_uuid)
        .map_err(|e| StoreError::Serialization(format!("bad actor id {raw}: {e}")))
}

fn parse_evidence(raw: &str) -> StoreResult<EvidenceId> {
    Uuid::parse_str(raw)
        .map(EvidenceId::from_uuid)
        .map_err(|e| StoreError::Serialization(format!("bad evidence id {raw}: {e}")))
}

fn parse_action(raw: &str) -> StoreResult<AccessAction> {
    match raw {
        "UPLOAD" => Ok(AccessAction::Upload),
        "VIEW" => Ok(AccessAction::View),
        "DOWNLOAD" => Ok(AccessAction::Download),
        "DELETE" => Ok(AccessAction::Delete),
        "SHARE" => Ok(AccessAction::Share),
        "REVOKE" => Ok(AccessAction::Revoke),
        other => Err(StoreError::Serialization(format!("bad action {other}"))),
    }
}

fn evidence_from_row(row: SqliteRow) -> StoreResult<EvidenceRecord> {
    Ok(EvidenceRecord {
        evidence_id: parse_evidence(&row.try_get::<String, _>("evidence_id").map_err(backend)?)?,
        owner: parse_actor(&row.try_get::<String, _>("owner").map_err(backend)?)?,
        filename: row.try_get("filename").map_err(backend)?,
        storage_ref: row.try_get("storage_ref").map_err(backend)?,
        size_bytes: row.try_get::<i64, _>("size_bytes").map_err(backend)? as u64,
        mime_type: row.try_get("mime_type").map_err(backend)?,
        sha256: row.try_get("sha256").map_err(backend)?,
        created_at: row.try_get("created_at").map_err(backend)?,
    })
}

fn grant_from_row(row: SqliteRow) -> StoreResult<PermissionGrant> {
    let level: String = row.try_get("level").map_err(backend)?;
    Ok(PermissionGrant {
        evidence: parse_evidence(&row.try_get::<String, _>("evidence_id").map_err(backend)?)?,
        grantee: parse_actor(&row.try_get::<String, _>("grantee").map_err(backend)?)?,
        level: level
            .parse()
            .map_err(|e| StoreError::Serialization(format!("{e}")))?,
        granted_by: parse_actor(&row.try_get::<String, _>("granted_by").map_err(backend)?)?,
        granted_at: row.try_get("granted_at").map_err(backend)?,
        expires_at: row.try_get("expires_at").map_err(backend)?,
    })
}

fn access_row_from_row(row: SqliteRow) -> StoreResult<AccessLogRow> {
    let metadata: String = row.try_get("metadata").map_err(backend)?;
    Ok(AccessLogRow {
        row_id: row.try_get("row_id").map_err(backend)?,
        actor: parse_actor(&row.try_get::<String, _>("actor").map_err(backend)?)?,
        evidence: parse_evidence(&row.try_get::<String, _>("evidence_id").map_err(backend)?)?,
        action: parse_action(&row.try_get::<String, _>("action").map_err(backend)?)?,
        ip_address: row.try_get("ip_address").map_err(backend)?,
        user_agent: row.try_get("user_agent").map_err(backend)?,
        timestamp: row.try_get("ts").map_err(backend)?,
        metadata: serde_json::from_str(&metadata)
            .map_err(|e| StoreError::Serialization(e.to_string()))?,
    })
}

fn detection_from_row(row: SqliteRow) -> StoreResult<DetectionRecord> {
    let metadata: String = row.try_get("metadata").map_err(backend)?;
    Ok(DetectionRecord {
        evidence: parse_evidence(&row.try_get::<String, _>("evidence_id").map_err(backend)?)?,
        detector_name: row.try_get("detector_name").map_err(backend)?,
        detector_version: row.try_get("detector_version").map_err(backend)?,
        score: row.try_get("score").map_err(backend)?,
        is_flagged: row.try_get("is_flagged").map_err(backend)?,
        metadata: serde_json::from_str(&metadata)
            .map_err(|e| StoreError::Serialization(e.to_string()))?,
        created_at: row.try_get("created_at").map_err(backend)?,
    })
}

fn backend(err: sqlx::Error) -> StoreError {
    StoreError::Backend(err.to_string())
}
