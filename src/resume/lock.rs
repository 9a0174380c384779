//! Single-instance guard for a checkpoint directory
//!
//! Two harvester processes sharing one checkpoint directory would race on
//! the record spools, so the directory carries an advisory lock held for
//! the whole run.

use super::store::CheckpointError;
use fd_lock::RwLock;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

/// Lock file name inside the checkpoint directory
pub const INSTANCE_LOCK_FILE: &str = "harvester.lock";

/// Exclusive lock on a checkpoint directory, released on drop
#[derive(Debug)]
pub struct InstanceLock {
    path: PathBuf,
    _lock: RwLock<File>,
}

impl InstanceLock {
    /// Try to lock `dir` without blocking
    ///
    /// Fails immediately if another process holds the lock.
    pub fn try_acquire(dir: &Path) -> Result<Self, CheckpointError> {
        std::fs::create_dir_all(dir).map_err(|e| CheckpointError::IoError(e.to_string()))?;

        let path = dir.join(INSTANCE_LOCK_FILE);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| CheckpointError::LockError(format!("Failed to open lock file: {e}")))?;

        let mut lock = RwLock::new(file);
        let guard = lock.try_write().map_err(|e| {
            CheckpointError::LockError(format!(
                "{} is in use by another harvester: {e}",
                dir.display()
            ))
        })?;
        // The OS lock lives as long as the descriptor; keep it past the guard
        std::mem::forget(guard);

        Ok(Self { path, _lock: lock })
    }

    /// Path of the lock file
    pub fn path(&self) -> &Path {
        &self.path
    }
}
