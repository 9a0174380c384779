//! Checkpoint persistence
//!
//! Each (feed, window) owns two files under the checkpoint directory:
//!
//! - `<key>.checkpoint.json` - the [`Checkpoint`], replaced atomically on every save
//! - `<key>.records.jsonl` - an append-only record spool, one JSON record per line
//!
//! Records are spooled before the checkpoint that references them is saved,
//! so after a crash the spool is always a superset of the checkpoint.

use fd_lock::RwLock;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::checkpoint::{checkpoint_key, Checkpoint};
use crate::identifier::FeedId;
use crate::Record;
use chrono::NaiveDate;

/// Maximum allowed checkpoint file size (10 MB) to prevent memory exhaustion
pub const MAX_CHECKPOINT_FILE_SIZE: u64 = 10 * 1024 * 1024;

const CHECKPOINT_SUFFIX: &str = ".checkpoint.json";
const SPOOL_SUFFIX: &str = ".records.jsonl";

/// Errors related to checkpoint persistence
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    /// Schema version mismatch
    #[error("schema version mismatch: expected {expected}, found {found}")]
    SchemaVersionMismatch {
        /// Expected schema version
        expected: String,
        /// Found schema version
        found: String,
    },

    /// Checkpoint file too large
    #[error("checkpoint file too large: {size} bytes (max: {max} bytes)")]
    StateTooLarge {
        /// Actual file size
        size: u64,
        /// Maximum allowed size
        max: u64,
    },

    /// IO error
    #[error("IO error: {0}")]
    IoError(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// Deserialization error
    #[error("deserialization error: {0}")]
    DeserializationError(String),

    /// Lock error
    #[error("lock error: {0}")]
    LockError(String),
}

/// File-backed checkpoint store
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    root: PathBuf,
}

impl CheckpointStore {
    /// Store rooted at `root`; the directory is created on first save
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    /// Checkpoint directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the checkpoint file for a pair
    pub fn checkpoint_path(&self, feed: &FeedId, publish_date: NaiveDate) -> PathBuf {
        self.root
            .join(format!("{}{CHECKPOINT_SUFFIX}", checkpoint_key(feed, publish_date)))
    }

    /// Path of the record spool for a pair
    pub fn spool_path(&self, feed: &FeedId, publish_date: NaiveDate) -> PathBuf {
        self.root
            .join(format!("{}{SPOOL_SUFFIX}", checkpoint_key(feed, publish_date)))
    }

    fn ensure_root(&self) -> Result<(), CheckpointError> {
        std::fs::create_dir_all(&self.root).map_err(|e| CheckpointError::IoError(e.to_string()))
    }

    fn open_lock_file(path: &Path) -> Result<File, CheckpointError> {
        OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path.with_extension("lock"))
            .map_err(|e| CheckpointError::LockError(format!("Failed to create lock file: {e}")))
    }

    /// Save a checkpoint with an atomic replace under an exclusive lock
    pub fn save(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        let path = self.checkpoint_path(&checkpoint.feed, checkpoint.publish_date);
        debug!(
            path = %path.display(),
            accumulated = checkpoint.accumulated(),
            gaps = checkpoint.gaps.len(),
            "Saving checkpoint"
        );

        self.ensure_root()?;

        let json = serde_json::to_string_pretty(checkpoint)
            .map_err(|e| CheckpointError::SerializationError(e.to_string()))?;

        let mut lock = RwLock::new(Self::open_lock_file(&path)?);
        let _guard = lock
            .write()
            .map_err(|e| CheckpointError::LockError(format!("Failed to acquire write lock: {e}")))?;

        let mut temp_file = tempfile::NamedTempFile::new_in(&self.root)
            .map_err(|e| CheckpointError::IoError(format!("Failed to create temp file: {e}")))?;
        temp_file
            .write_all(json.as_bytes())
            .map_err(|e| CheckpointError::IoError(format!("Failed to write to temp file: {e}")))?;
        temp_file
            .flush()
            .map_err(|e| CheckpointError::IoError(format!("Failed to flush temp file: {e}")))?;
        temp_file
            .as_file()
            .sync_all()
            .map_err(|e| CheckpointError::IoError(format!("Failed to sync temp file: {e}")))?;
        temp_file
            .persist(&path)
            .map_err(|e| CheckpointError::IoError(format!("Failed to persist temp file: {e}")))?;

        // Fsync the directory so the rename itself is durable
        if let Ok(dir) = File::open(&self.root) {
            let _ = dir.sync_all();
        }

        debug!(path = %path.display(), "Checkpoint saved");
        Ok(())
    }

    /// Load the checkpoint for a pair, if one exists
    pub fn load(
        &self,
        feed: &FeedId,
        publish_date: NaiveDate,
    ) -> Result<Option<Checkpoint>, CheckpointError> {
        let path = self.checkpoint_path(feed, publish_date);
        if !path.exists() {
            return Ok(None);
        }
        Self::load_path(&path).map(Some)
    }

    fn load_path(path: &Path) -> Result<Checkpoint, CheckpointError> {
        debug!(path = %path.display(), "Loading checkpoint");

        let lock = RwLock::new(Self::open_lock_file(path)?);
        let _guard = lock
            .read()
            .map_err(|e| CheckpointError::LockError(format!("Failed to acquire read lock: {e}")))?;

        let metadata = std::fs::metadata(path).map_err(|e| CheckpointError::IoError(e.to_string()))?;
        if metadata.len() > MAX_CHECKPOINT_FILE_SIZE {
            return Err(CheckpointError::StateTooLarge {
                size: metadata.len(),
                max: MAX_CHECKPOINT_FILE_SIZE,
            });
        }

        let contents =
            std::fs::read_to_string(path).map_err(|e| CheckpointError::IoError(e.to_string()))?;
        let checkpoint: Checkpoint = serde_json::from_str(&contents).map_err(|e| {
            warn!(path = %path.display(), error = %e, "Failed to deserialize checkpoint");
            CheckpointError::DeserializationError(e.to_string())
        })?;

        if let Err(e) = checkpoint.validate_schema_version() {
            warn!(
                found_version = %checkpoint.schema_version(),
                "Checkpoint schema version mismatch"
            );
            return Err(e);
        }

        Ok(checkpoint)
    }

    /// Append records to the spool for a pair and sync them to disk
    pub fn append_records(
        &self,
        feed: &FeedId,
        publish_date: NaiveDate,
        records: &[Record],
    ) -> Result<(), CheckpointError> {
        if records.is_empty() {
            return Ok(());
        }
        self.ensure_root()?;

        let path = self.spool_path(feed, publish_date);
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)
            .map_err(|e| CheckpointError::IoError(format!("Failed to open spool: {e}")))?;

        let mut buffer = String::new();
        // A torn line from an earlier crash must not swallow the next record
        if ends_without_newline(&mut file)? {
            buffer.push('\n');
        }
        for record in records {
            let line = serde_json::to_string(record)
                .map_err(|e| CheckpointError::SerializationError(e.to_string()))?;
            buffer.push_str(&line);
            buffer.push('\n');
        }

        file.write_all(buffer.as_bytes())
            .map_err(|e| CheckpointError::IoError(format!("Failed to append to spool: {e}")))?;
        file.sync_data()
            .map_err(|e| CheckpointError::IoError(format!("Failed to sync spool: {e}")))?;

        debug!(path = %path.display(), appended = records.len(), "Spooled records");
        Ok(())
    }

    /// Read the spool for a pair
    ///
    /// A line that fails to parse is tolerated only at the end of the file,
    /// where an interrupted append leaves it.
    pub fn load_records(
        &self,
        feed: &FeedId,
        publish_date: NaiveDate,
    ) -> Result<Vec<Record>, CheckpointError> {
        let path = self.spool_path(feed, publish_date);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let contents =
            std::fs::read_to_string(&path).map_err(|e| CheckpointError::IoError(e.to_string()))?;

        let lines: Vec<&str> = contents.lines().filter(|line| !line.trim().is_empty()).collect();
        let mut records = Vec::with_capacity(lines.len());
        for (index, line) in lines.iter().enumerate() {
            match serde_json::from_str::<Record>(line) {
                Ok(record) => records.push(record),
                Err(e) if index + 1 == lines.len() => {
                    warn!(path = %path.display(), error = %e, "Ignoring torn trailing spool line");
                }
                Err(e) => {
                    return Err(CheckpointError::DeserializationError(format!(
                        "{}: line {}: {e}",
                        path.display(),
                        index + 1
                    )))
                }
            }
        }
        Ok(records)
    }

    /// Mark a checkpoint complete and persist it; the files are kept
    pub fn retire(&self, checkpoint: &mut Checkpoint) -> Result<(), CheckpointError> {
        if checkpoint.completed_at.is_none() {
            checkpoint.completed_at = Some(chrono::Utc::now());
        }
        checkpoint.touch();
        self.save(checkpoint)?;
        info!(
            feed = %checkpoint.feed,
            publish_date = %checkpoint.publish_date,
            accumulated = checkpoint.accumulated(),
            "Checkpoint retired as complete"
        );
        Ok(())
    }

    /// Delete the checkpoint and spool for a pair
    pub fn remove(&self, feed: &FeedId, publish_date: NaiveDate) -> Result<(), CheckpointError> {
        let checkpoint = self.checkpoint_path(feed, publish_date);
        for path in [checkpoint.with_extension("lock"), checkpoint, self.spool_path(feed, publish_date)] {
            match std::fs::remove_file(&path) {
                Ok(()) => debug!(path = %path.display(), "Removed"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(CheckpointError::IoError(e.to_string())),
            }
        }
        Ok(())
    }

    /// All checkpoints in the store, sorted by (publish date, feed)
    pub fn list(&self) -> Result<Vec<Checkpoint>, CheckpointError> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let entries =
            std::fs::read_dir(&self.root).map_err(|e| CheckpointError::IoError(e.to_string()))?;

        let mut checkpoints = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| CheckpointError::IoError(e.to_string()))?.path();
            let is_checkpoint = path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.ends_with(CHECKPOINT_SUFFIX));
            if is_checkpoint {
                checkpoints.push(Self::load_path(&path)?);
            }
        }
        checkpoints.sort_by(|a, b| (a.publish_date, &a.feed).cmp(&(b.publish_date, &b.feed)));
        Ok(checkpoints)
    }
}

fn ends_without_newline(file: &mut File) -> Result<bool, CheckpointError> {
    let len = file
        .metadata()
        .map_err(|e| CheckpointError::IoError(e.to_string()))?
        .len();
    if len == 0 {
        return Ok(false);
    }
    let mut last = [0u8; 1];
    file.seek(SeekFrom::Start(len - 1))
        .and_then(|_| file.read_exact(&mut last))
        .map_err(|e| CheckpointError::IoError(e.to_string()))?;
    Ok(last[0] != b'\n')
}
