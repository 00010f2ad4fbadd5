//! Veritas Gateway - unified evidence operations.
//!
//! Every file operation runs the same linear sequence: authorize against the
//! ACL, mutate state, then record the outcome through the audit fan-out. No
//! mutation commits before authorization succeeds; no operation reports
//! success before its audit write is attempted.

#![deny(unsafe_code)]

mod gateway;
mod interfaces;

pub use gateway::{
    DownloadPayload, EvidenceListing, EvidenceStats, EvidenceView, FileOperationGateway,
    SharedEvidence, UploadReceipt, UploadRequest, ACCESS_DENIED_MESSAGE,
};
pub use interfaces::{
    DetectionError, DetectionModel, DetectionVerdict, EvidenceByteStore, MemoryByteStore,
    StorageIoError, StoredObject,
};
