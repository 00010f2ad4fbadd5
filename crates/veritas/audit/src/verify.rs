//! Chain verification and export.
//!
//! Verification walks a channel file in order and collects every fault with
//! its position, so a single corruption point cannot hide earlier or later
//! ones. The chain is treated as compromised from the first fault onward;
//! nothing is ever auto-repaired.

use crate::record::{ChainRecord, GENESIS_PREV_HASH};
use crate::AuditResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::warn;
use veritas_types::ChainChannel;

/// Kind of integrity fault found at one position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    /// The line is not a parseable record.
    Malformed,
    /// The stored record hash does not match the recomputed digest.
    HashMismatch,
    /// The stored `prev_hash` does not match the predecessor's stored hash.
    BrokenLink,
}

/// One positioned integrity fault. Positions are 1-based line numbers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainFault {
    pub position: usize,
    pub kind: FaultKind,
    pub detail: String,
}

/// Result of walking one channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainVerification {
    pub channel: ChainChannel,
    pub valid: bool,
    /// Every line in the file, the initialization record included.
    pub total_records: usize,
    /// Records minus the initialization record.
    pub event_records: usize,
    pub faults: Vec<ChainFault>,
    pub summary: String,
}

/// Walk every record of a channel file and report integrity.
pub async fn verify_channel_file(
    channel: ChainChannel,
    path: &Path,
) -> AuditResult<ChainVerification> {
    if !path.exists() {
        return Ok(ChainVerification {
            channel,
            valid: true,
            total_records: 0,
            event_records: 0,
            faults: Vec::new(),
            summary: format!("channel {channel} not initialized; nothing to verify"),
        });
    }

    let file = File::open(path).await?;
    let reader = BufReader::new(file);
    let mut lines = reader.lines();

    let mut faults = Vec::new();
    let mut position = 0usize;
    let mut genesis_records = 0usize;
    // Expected predecessor hash for the next record's link check.
    let mut expected_prev = GENESIS_PREV_HASH.to_string();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        position += 1;

        let record: ChainRecord = match serde_json::from_str(&line) {
            Ok(record) => record,
            Err(err) => {
                faults.push(ChainFault {
                    position,
                    kind: FaultKind::Malformed,
                    detail: format!("unparseable record: {err}"),
                });
                continue;
            }
        };

        match record.hash_is_intact() {
            Ok(true) => {}
            Ok(false) => faults.push(ChainFault {
                position,
                kind: FaultKind::HashMismatch,
                detail: format!("record {} fails digest recomputation", record.record_id),
            }),
            Err(err) => faults.push(ChainFault {
                position,
                kind: FaultKind::HashMismatch,
                detail: format!("record {} cannot be canonicalized: {err}", record.record_id),
            }),
        }

        if record.prev_hash != expected_prev {
            faults.push(ChainFault {
                position,
                kind: FaultKind::BrokenLink,
                detail: format!(
                    "expected prev_hash {expected_prev}, found {}",
                    record.prev_hash
                ),
            });
        }

        if record.is_genesis() {
            genesis_records += 1;
        }
        expected_prev = record.record_hash.clone();
    }

    let valid = faults.is_empty();
    if !valid {
        warn!(%channel, faults = faults.len(), "chain verification found faults");
    }

    let summary = if position == 0 {
        format!("channel {channel} is empty; nothing to falsify")
    } else if valid {
        format!("channel {channel} verified: {position} records intact")
    } else {
        format!(
            "channel {channel} COMPROMISED: {} fault(s), first at record {}",
            faults.len(),
            faults[0].position
        )
    };

    Ok(ChainVerification {
        channel,
        valid,
        total_records: position,
        event_records: position.saturating_sub(genesis_records),
        faults,
        summary,
    })
}

/// Trailer appended to an exported snapshot, stating the verification
/// outcome at export time so a third party can audit the copy offline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportTrailer {
    pub export_type: String,
    pub channel: ChainChannel,
    pub exported_at: DateTime<Utc>,
    pub valid: bool,
    pub total_records: usize,
    pub fault_count: usize,
    pub summary: String,
}

/// Outcome of an export.
#[derive(Debug, Clone)]
pub struct ExportReceipt {
    pub dest: std::path::PathBuf,
    pub verification: ChainVerification,
}

/// Copy a channel to `dest` and append the verification trailer.
pub async fn export_channel_file(
    channel: ChainChannel,
    src: &Path,
    dest: &Path,
    exported_at: DateTime<Utc>,
) -> AuditResult<ExportReceipt> {
    let verification = verify_channel_file(channel, src).await?;

    if src.exists() {
        tokio::fs::copy(src, dest).await?;
    } else {
        File::create(dest).await?;
    }

    let trailer = ExportTrailer {
        export_type: "CHAIN_EXPORT".to_string(),
        channel,
        exported_at,
        valid: verification.valid,
        total_records: verification.total_records,
        fault_count: verification.faults.len(),
        summary: verification.summary.clone(),
    };
    let line = serde_json::to_string(&trailer)
        .map_err(|e| crate::AuditError::Serialization(e.to_string()))?;

    let mut file = OpenOptions::new().append(true).open(dest).await?;
    file.write_all(line.as_bytes()).await?;
    file.write_all(b"\n").await?;
    file.flush().await?;

    Ok(ExportReceipt {
        dest: dest.to_path_buf(),
        verification,
    })
}
