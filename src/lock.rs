//! Advisory file locks around index rebuilds and history writes.
//!
//! A lock on `foo.json` is taken on the sibling file `foo.json.lock`, so the
//! protected file itself can be replaced by rename while the lock is held.
//! The lock is released when the guard is dropped.

use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use crate::error::{RagError, Result};

/// Exclusive advisory lock held for the guard's lifetime.
#[derive(Debug)]
pub struct FileLock {
    file: File,
    path: PathBuf,
}

impl FileLock {
    /// Block until the exclusive lock for `target` is acquired.
    pub fn acquire(target: &Path) -> Result<Self> {
        let path = lock_path(target);
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| RagError::PersistenceError(format!("{}: {}", path.display(), e)))?;

        file.lock_exclusive()
            .map_err(|e| RagError::PersistenceError(format!("lock {}: {}", path.display(), e)))?;
        tracing::trace!(lock = %path.display(), "acquired file lock");

        Ok(Self { file, path })
    }

    /// [`FileLock::acquire`] on the blocking thread pool, so waiting for
    /// another process does not stall the async runtime.
    pub async fn acquire_async(target: &Path) -> Result<Self> {
        let target = target.to_path_buf();
        tokio::task::spawn_blocking(move || Self::acquire(&target))
            .await
            .map_err(|e| RagError::PersistenceError(format!("lock task failed: {}", e)))?
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Err(e) = self.file.unlock() {
            tracing::warn!(lock = %self.path.display(), error = %e, "failed to release file lock");
        }
    }
}

fn lock_path(target: &Path) -> PathBuf {
    let mut name = target
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".lock");
    target.with_file_name(name)
}
