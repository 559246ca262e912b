//! Durable execution history keyed by identity
//!
//! Records are written atomically, so a reader sees either the previous
//! record or the new one. A record that cannot be decoded is reported as
//! absent: the caller re-executes rather than trusting a damaged entry.

use crate::fingerprint::Fingerprint;
use crate::hashing::HashCode;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use kiln_core::{Error, Result};
use kiln_utils::write_atomic;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Identifies a history record file.
const RECORD_MAGIC: [u8; 4] = *b"KILN";

/// Increment on breaking changes to [`HistoryEntry`].
const RECORD_FORMAT_VERSION: u32 = 1;

const LOCK_SHARDS: usize = 64;

/// How the last execution of an identity ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionOutcome {
    /// The body ran and produced the recorded outputs
    Executed,
    /// A valid earlier result was reused
    UpToDate,
}

/// Last successful execution of one identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Fingerprints of the inputs, keyed by property name
    pub input_fingerprints: BTreeMap<String, Fingerprint>,
    /// Fingerprints of the workspace outputs, keyed by property name
    pub output_fingerprints: BTreeMap<String, Fingerprint>,
    pub outcome: ExecutionOutcome,
    pub executed_at: DateTime<Utc>,
    pub execution_time_ms: u64,
    /// Timeout declared by the unit of work, recorded for reporting only
    pub timeout_ms: Option<u64>,
}

/// Persisted identity -> history entry map
pub trait ExecutionHistoryStore: Send + Sync {
    /// Entry for `key`, or `None` when there is no usable record
    fn get(&self, key: &str) -> Result<Option<HistoryEntry>>;

    /// Insert or replace the entry for `key`
    fn put(&self, key: &str, entry: &HistoryEntry) -> Result<()>;

    /// Drop the entry for `key`; removing an absent entry succeeds
    fn remove(&self, key: &str) -> Result<()>;
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredRecord {
    magic: [u8; 4],
    format_version: u32,
    key: String,
    entry: HistoryEntry,
}

/// One file per key below a history directory
///
/// Records live at `<dir>/<first two chars of key>/<key>`. Access is guarded
/// by a fixed set of lock shards picked by key hash, so unrelated keys rarely
/// contend and there is no store-wide lock.
#[derive(Debug)]
pub struct FileHistoryStore {
    dir: PathBuf,
    shards: [RwLock<()>; LOCK_SHARDS],
}

impl FileHistoryStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            shards: std::array::from_fn(|_| RwLock::new(())),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, key: &str) -> Result<PathBuf> {
        if key.len() < 2 || !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(Error::history(key, "key is not a valid record name"));
        }
        Ok(self.dir.join(&key[..2]).join(key))
    }

    fn shard(&self, key: &str) -> &RwLock<()> {
        let index = HashCode::of(key.as_bytes()).as_bytes()[0] as usize % LOCK_SHARDS;
        &self.shards[index]
    }

    fn decode(key: &str, path: &Path, bytes: &[u8]) -> Option<HistoryEntry> {
        let record: StoredRecord = match bincode::deserialize(bytes) {
            Ok(record) => record,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "unreadable history record, treating as absent");
                return None;
            }
        };

        if record.magic != RECORD_MAGIC || record.format_version != RECORD_FORMAT_VERSION {
            warn!(
                path = %path.display(),
                version = record.format_version,
                "history record has an unsupported format, treating as absent"
            );
            return None;
        }

        if record.key != key {
            warn!(path = %path.display(), stored = %record.key, "history record belongs to another key");
            return None;
        }

        Some(record.entry)
    }
}

impl ExecutionHistoryStore for FileHistoryStore {
    fn get(&self, key: &str) -> Result<Option<HistoryEntry>> {
        let path = self.record_path(key)?;
        let _read = self.shard(key).read();

        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::file_system(&path, "read history record", e)),
        };
        Ok(Self::decode(key, &path, &bytes))
    }

    fn put(&self, key: &str, entry: &HistoryEntry) -> Result<()> {
        let path = self.record_path(key)?;
        let record = StoredRecord {
            magic: RECORD_MAGIC,
            format_version: RECORD_FORMAT_VERSION,
            key: key.to_string(),
            entry: entry.clone(),
        };
        let bytes = bincode::serialize(&record)?;

        let _write = self.shard(key).write();
        write_atomic(&path, &bytes, "history record")?;
        debug!(key, "stored history record");
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let path = self.record_path(key)?;
        let _write = self.shard(key).write();

        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::file_system(&path, "remove history record", e)),
        }
    }
}

/// History kept only for the lifetime of the process
#[derive(Debug, Default)]
pub struct InMemoryHistoryStore {
    entries: DashMap<String, HistoryEntry>,
}

impl InMemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl ExecutionHistoryStore for InMemoryHistoryStore {
    fn get(&self, key: &str) -> Result<Option<HistoryEntry>> {
        Ok(self.entries.get(key).map(|entry| entry.value().clone()))
    }

    fn put(&self, key: &str, entry: &HistoryEntry) -> Result<()> {
        self.entries.insert(key.to_string(), entry.clone());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }
}
