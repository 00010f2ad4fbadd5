//! Veritas storage abstractions.
//!
//! This crate defines the persistence contract for the custody subsystem:
//! - evidence registry (one owner per file, immutable after creation)
//! - permission grants (the ACL table)
//! - relational access-event mirror (queryable, not tamper-evident)
//! - detection verdicts from the external forgery model
//!
//! Design stance:
//! - The relational store is a query surface. The hash-chained audit log,
//!   which lives in `veritas-audit`, is the tamper-evidence source of truth.
//! - The in-memory adapter is deterministic and test-friendly; the SQLite
//!   adapter behind the `sqlite` feature is the durable backend.

#![deny(unsafe_code)]
#![warn(rust_2018_idioms)]

mod error;
pub mod memory;
mod model;
#[cfg(feature = "sqlite")]
pub mod sqlite;
mod traits;

pub use error::{StoreError, StoreResult};
pub use model::{
    AccessLogEntry, AccessLogQuery, AccessLogRow, DetectionRecord, EvidenceRecord, PermissionGrant,
};
pub use traits::{
    AccessLogStore, DetectionStore, EvidenceStore, GrantStore, QueryWindow, VaultStorage,
};
