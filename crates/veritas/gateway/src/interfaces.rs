//! External collaborator interfaces.
//!
//! The custody core only needs references, sizes, and fingerprints from the
//! byte store, and a score from the detection model. Both are injected.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use thiserror::Error;
use uuid::Uuid;

/// Errors from the evidence byte store.
#[derive(Debug, Error)]
pub enum StorageIoError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Handle and fingerprint of a stored object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredObject {
    pub storage_ref: String,
    pub size_bytes: u64,
    /// Hex SHA-256 of the stored bytes.
    pub sha256: String,
}

/// Byte storage for evidentiary content. Mechanics are out of scope; the
/// core only holds the returned reference.
#[async_trait]
pub trait EvidenceByteStore: Send + Sync {
    async fn store(&self, filename: &str, bytes: &[u8]) -> Result<StoredObject, StorageIoError>;
    async fn fetch(&self, storage_ref: &str) -> Result<Vec<u8>, StorageIoError>;
    async fn remove(&self, storage_ref: &str) -> Result<(), StorageIoError>;
}

/// In-memory byte store for tests and embedded use.
#[derive(Default)]
pub struct MemoryByteStore {
    objects: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryByteStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EvidenceByteStore for MemoryByteStore {
    async fn store(&self, filename: &str, bytes: &[u8]) -> Result<StoredObject, StorageIoError> {
        let storage_ref = format!("mem://{}/{}", Uuid::new_v4(), filename);
        let sha256 = hex::encode(Sha256::digest(bytes));
        self.objects
            .write()
            .insert(storage_ref.clone(), bytes.to_vec());
        Ok(StoredObject {
            storage_ref,
            size_bytes: bytes.len() as u64,
            sha256,
        })
    }

    async fn fetch(&self, storage_ref: &str) -> Result<Vec<u8>, StorageIoError> {
        self.objects
            .read()
            .get(storage_ref)
            .cloned()
            .ok_or_else(|| StorageIoError::NotFound(storage_ref.to_string()))
    }

    async fn remove(&self, storage_ref: &str) -> Result<(), StorageIoError> {
        self.objects
            .write()
            .remove(storage_ref)
            .map(|_| ())
            .ok_or_else(|| StorageIoError::NotFound(storage_ref.to_string()))
    }
}

/// Errors from the detection model boundary.
#[derive(Debug, Error)]
pub enum DetectionError {
    #[error("analysis failed: {0}")]
    Analysis(String),
}

/// Verdict of the external forgery-detection model. Purely informational;
/// access decisions never consult it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionVerdict {
    pub detector_name: String,
    pub detector_version: String,
    pub score: f64,
    pub is_flagged: bool,
}

/// The forgery-detection model as seen by the core.
#[async_trait]
pub trait DetectionModel: Send + Sync {
    async fn analyze(&self, storage_ref: &str) -> Result<DetectionVerdict, DetectionError>;
}
