//! Per-channel append-only chain sinks.
//!
//! Chain integrity depends on strictly sequential `prev_hash` linkage, so
//! appends to one channel go through a single writer: a channel-scoped mutex
//! with a bounded wait. Unrelated channels never contend.

use crate::record::ChainRecord;
use crate::verify::{self, ChainVerification, ExportReceipt};
use crate::{AuditError, AuditResult};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tracing::{debug, info};
use veritas_types::{AuditEvent, ChainChannel, Clock};

/// Bound on the wait for a channel's writer lock. Exceeding it surfaces as a
/// retryable `ConcurrencyTimeout`, never a deadlock.
pub const CHANNEL_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug)]
struct WriterState {
    last_hash: String,
    records: u64,
}

/// Append-only sink for one audit channel.
pub struct ChannelSink {
    channel: ChainChannel,
    path: PathBuf,
    writer: Mutex<WriterState>,
    lock_timeout: Duration,
}

impl ChannelSink {
    /// Open a channel under `dir`, creating and anchoring it with an
    /// initialization record when the file does not exist yet, or resuming
    /// the chain head from the last stored record otherwise.
    pub async fn open(
        dir: &Path,
        channel: ChainChannel,
        now: DateTime<Utc>,
    ) -> AuditResult<Self> {
        let path = dir.join(channel.file_name());
        let state = if path.exists() {
            Self::resume_state(&path).await?
        } else {
            tokio::fs::create_dir_all(dir).await?;
            let genesis = ChainRecord::genesis(channel, now)?;
            let line = serde_json::to_string(&genesis)
                .map_err(|e| AuditError::Serialization(e.to_string()))?;
            let mut file = File::create(&path).await?;
            file.write_all(line.as_bytes()).await?;
            file.write_all(b"\n").await?;
            file.flush().await?;
            info!(%channel, path = %path.display(), "audit channel initialized");
            WriterState {
                last_hash: genesis.record_hash,
                records: 1,
            }
        };

        Ok(Self {
            channel,
            path,
            writer: Mutex::new(state),
            lock_timeout: CHANNEL_LOCK_TIMEOUT,
        })
    }

    /// Override the writer lock bound (tests and tuned deployments).
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    async fn resume_state(path: &Path) -> AuditResult<WriterState> {
        let file = File::open(path).await?;
        let reader = BufReader::new(file);
        let mut lines = reader.lines();

        let mut last_line = None;
        let mut count = 0u64;
        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            count += 1;
            last_line = Some(line);
        }

        let Some(last_line) = last_line else {
            return Err(AuditError::Serialization(format!(
                "channel file {} exists but holds no records",
                path.display()
            )));
        };
        let last: ChainRecord = serde_json::from_str(&last_line)
            .map_err(|e| AuditError::Serialization(format!("unreadable chain head: {e}")))?;

        Ok(WriterState {
            last_hash: last.record_hash,
            records: count,
        })
    }

    /// Append one event as a sealed, chain-linked record. The write is one
    /// line, flushed before the writer lock is released.
    pub async fn append(
        &self,
        event: AuditEvent,
        timestamp: DateTime<Utc>,
    ) -> AuditResult<ChainRecord> {
        let mut state = tokio::time::timeout(self.lock_timeout, self.writer.lock())
            .await
            .map_err(|_| AuditError::ConcurrencyTimeout(self.lock_timeout))?;

        let record = ChainRecord::seal(event, timestamp, state.last_hash.clone())?;
        let line = serde_json::to_string(&record)
            .map_err(|e| AuditError::Serialization(e.to_string()))?;

        self.write_line(&line).await.map_err(|e| AuditError::ChainWrite {
            channel: self.channel,
            detail: e.to_string(),
        })?;

        state.last_hash = record.record_hash.clone();
        state.records += 1;
        debug!(channel = %self.channel, records = state.records, "chain record appended");
        Ok(record)
    }

    async fn write_line(&self, line: &str) -> std::io::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await?;
        file.flush().await
    }

    /// Read every record in file order. Strict: a malformed line is an
    /// error here; use `verify` for fault-tolerant inspection.
    pub async fn read_all(&self) -> AuditResult<Vec<ChainRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let file = File::open(&self.path).await?;
        let reader = BufReader::new(file);
        let mut lines = reader.lines();
        let mut records = Vec::new();
        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let record: ChainRecord = serde_json::from_str(&line)
                .map_err(|e| AuditError::Serialization(e.to_string()))?;
            records.push(record);
        }
        Ok(records)
    }

    /// Walk the whole channel and report integrity.
    pub async fn verify(&self) -> AuditResult<ChainVerification> {
        verify::verify_channel_file(self.channel, &self.path).await
    }

    pub fn channel(&self) -> ChainChannel {
        self.channel
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// The per-channel hash chain log: one append-only file per channel.
pub struct HashChainLog {
    access: ChannelSink,
    security: ChannelSink,
}

impl HashChainLog {
    /// Open (or create) every channel under `dir`.
    pub async fn open(dir: impl AsRef<Path>, clock: &dyn Clock) -> AuditResult<Self> {
        let dir = dir.as_ref();
        Ok(Self {
            access: ChannelSink::open(dir, ChainChannel::Access, clock.now()).await?,
            security: ChannelSink::open(dir, ChainChannel::Security, clock.now()).await?,
        })
    }

    pub fn sink(&self, channel: ChainChannel) -> &ChannelSink {
        match channel {
            ChainChannel::Access => &self.access,
            ChainChannel::Security => &self.security,
        }
    }

    /// Append an event to the channel it belongs to.
    pub async fn append(
        &self,
        event: AuditEvent,
        timestamp: DateTime<Utc>,
    ) -> AuditResult<ChainRecord> {
        self.sink(event.channel()).append(event, timestamp).await
    }

    pub async fn verify(&self, channel: ChainChannel) -> AuditResult<ChainVerification> {
        self.sink(channel).verify().await
    }

    /// Export a channel snapshot with a verification trailer.
    pub async fn export(
        &self,
        channel: ChainChannel,
        dest: impl AsRef<Path>,
        exported_at: DateTime<Utc>,
    ) -> AuditResult<ExportReceipt> {
        verify::export_channel_file(channel, self.sink(channel).path(), dest.as_ref(), exported_at)
            .await
    }
}
