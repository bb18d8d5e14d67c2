use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;

use crate::error::{FleetError, Result};

/// Exclusive advisory lock on a file, honored by every `multibase` process
/// on the host. Released when dropped.
///
/// Locks are per open file, so two handles in one process also exclude
/// each other.
#[derive(Debug)]
pub struct FileLock {
    file: File,
    path: PathBuf,
}

impl FileLock {
    /// Block until the lock is held. The file and its parent directory are
    /// created when missing and never removed.
    pub async fn acquire(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        tokio::task::spawn_blocking(move || Self::acquire_blocking(path))
            .await
            .map_err(|e| FleetError::State(format!("lock task failed: {e}")))?
    }

    fn acquire_blocking(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| FleetError::State(format!("failed to open lock file {}: {e}", path.display())))?;
        FileExt::lock_exclusive(&file)
            .map_err(|e| FleetError::State(format!("failed to lock {}: {e}", path.display())))?;
        tracing::trace!(path = %path.display(), "lock acquired");
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            tracing::debug!(path = %self.path.display(), error = %e, "unlock failed");
        }
    }
}
