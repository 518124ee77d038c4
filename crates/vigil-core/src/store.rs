//! Record storage.
//!
//! The bridge only needs two operations from a store: append one record and
//! list the most recent ones. Reads are capped at [`MAX_RECENT`] entries.

use crate::record::{EventRecord, NewRecord, RecordId};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// Upper bound on records returned by a single read.
pub const MAX_RECENT: usize = 100;

/// Default number of records kept by [`MemoryStore`].
const DEFAULT_RETENTION: usize = 10_000;

/// Store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Record serialization error.
    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// The store cannot accept records right now.
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Durable record storage.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Store one record and return it with its assigned identity.
    async fn append(&self, record: NewRecord) -> Result<EventRecord, StoreError>;

    /// List up to `limit` records, newest first. `limit` is capped at [`MAX_RECENT`].
    async fn list_recent(&self, limit: usize) -> Result<Vec<EventRecord>, StoreError>;
}

/// Insert keeping the queue ordered by `received_at`, oldest first.
fn insert_ordered(records: &mut VecDeque<EventRecord>, record: EventRecord) {
    let idx = records.partition_point(|r| r.received_at <= record.received_at);
    records.insert(idx, record);
}

fn newest(records: &VecDeque<EventRecord>, limit: usize) -> Vec<EventRecord> {
    records
        .iter()
        .rev()
        .take(limit.min(MAX_RECENT))
        .cloned()
        .collect()
}

/// In-process store with bounded retention.
///
/// Once `retention` records are held, the oldest is evicted per append.
#[derive(Debug)]
pub struct MemoryStore {
    records: RwLock<VecDeque<EventRecord>>,
    retention: usize,
}

impl MemoryStore {
    /// Create a store with the default retention.
    #[must_use]
    pub fn new() -> Self {
        Self::with_retention(DEFAULT_RETENTION)
    }

    /// Create a store keeping at most `retention` records.
    #[must_use]
    pub fn with_retention(retention: usize) -> Self {
        Self {
            records: RwLock::new(VecDeque::new()),
            retention: retention.max(1),
        }
    }

    /// Number of records held.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// Check if the store is empty.
    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn append(&self, record: NewRecord) -> Result<EventRecord, StoreError> {
        let record = record.with_id(RecordId::generate());
        let mut records = self.records.write().await;

        insert_ordered(&mut records, record.clone());
        while records.len() > self.retention {
            records.pop_front();
        }

        Ok(record)
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<EventRecord>, StoreError> {
        Ok(newest(&*self.records.read().await, limit))
    }
}

/// Append-only JSON-lines store.
///
/// Every record is written and synced before `append` returns. The most
/// recent [`MAX_RECENT`] records are also kept in memory to serve reads.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    writer: Mutex<Writer>,
    recent: RwLock<VecDeque<EventRecord>>,
}

#[derive(Debug)]
struct Writer {
    file: File,
    /// The file may end mid-line, after a torn write or a crash.
    needs_newline: bool,
}

impl FileStore {
    /// Open (or create) a store at `path`, loading its recent history.
    ///
    /// Lines that cannot be parsed are skipped with a warning.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or opened for appending.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let mut recent = VecDeque::new();
        let mut needs_newline = false;

        match tokio::fs::read(&path).await {
            Ok(contents) => {
                needs_newline = contents.last().is_some_and(|b| *b != b'\n');
                for (line_no, line) in contents.split(|b| *b == b'\n').enumerate() {
                    if line.iter().all(u8::is_ascii_whitespace) {
                        continue;
                    }
                    match serde_json::from_slice::<EventRecord>(line) {
                        Ok(record) => {
                            insert_ordered(&mut recent, record);
                            if recent.len() > MAX_RECENT {
                                recent.pop_front();
                            }
                        }
                        Err(e) => {
                            warn!(path = %path.display(), line = line_no + 1, error = %e, "Skipping unreadable record");
                        }
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        info!(path = %path.display(), loaded = recent.len(), "Opened record store");

        Ok(Self {
            path,
            writer: Mutex::new(Writer {
                file,
                needs_newline,
            }),
            recent: RwLock::new(recent),
        })
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl RecordStore for FileStore {
    async fn append(&self, record: NewRecord) -> Result<EventRecord, StoreError> {
        let record = record.with_id(RecordId::generate());
        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');

        {
            let mut writer = self.writer.lock().await;
            if writer.needs_newline {
                line.insert(0, b'\n');
            }
            // A failed write may leave part of the line behind.
            writer.needs_newline = true;
            writer.file.write_all(&line).await?;
            writer.needs_newline = false;
            writer.file.sync_data().await?;
        }

        let mut recent = self.recent.write().await;
        insert_ordered(&mut recent, record.clone());
        if recent.len() > MAX_RECENT {
            recent.pop_front();
        }

        debug!(id = %record.id, "Record appended");
        Ok(record)
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<EventRecord>, StoreError> {
        Ok(newest(&*self.recent.read().await, limit))
    }
}
