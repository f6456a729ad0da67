//! Cross-process directory locking and garbage-collection marking.
//!
//! A directory is locked iff its `.litani-lock` sentinel is absent;
//! acquisition unlinks the sentinel. POSIX guarantees that `unlink` of a
//! regular file succeeds for exactly one of any set of concurrent callers,
//! which is what makes this a mutex without any per-host configuration.
//! The lock also survives the death of its holder, unlike `flock`.

use std::path::{Path, PathBuf};
use std::time::Duration;

const LOCK_FILE: &str = ".litani-lock";
const EXPIRED_FILE: &str = ".litani-expired";

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("failed to acquire lock on directory '{0}'")]
    AcquisitionFailed(PathBuf),
    #[error("timed out after {timeout}s waiting for lock on directory '{dir}'")]
    TimeoutExpired { dir: PathBuf, timeout: u64 },
}

/// A directory guarded by a sentinel-file lock. Newly created directories
/// have no sentinel and so start out locked; call `release()` first to
/// make them available.
#[derive(Debug, Clone)]
pub struct LockableDirectory {
    path: PathBuf,
}

impl LockableDirectory {
    pub fn new(path: &Path) -> Self {
        LockableDirectory {
            path: path.to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock_file(&self) -> PathBuf {
        self.path.join(LOCK_FILE)
    }

    /// Try to take the lock. Returns true iff this caller took it.
    pub fn acquire(&self) -> bool {
        std::fs::remove_file(self.lock_file()).is_ok()
    }

    /// Give the lock back, making the directory available to others.
    pub fn release(&self) -> anyhow::Result<()> {
        std::fs::File::create(self.lock_file())?;
        Ok(())
    }

    /// Take the lock for the duration of the returned guard, which releases
    /// it on drop.
    pub fn try_acquire(&self) -> Result<LockGuard<'_>, LockError> {
        if !self.acquire() {
            return Err(LockError::AcquisitionFailed(self.path.clone()));
        }
        Ok(LockGuard { dir: self })
    }

    /// Retry acquisition at one-second cadence. A `timeout` of zero waits
    /// indefinitely.
    pub async fn acquire_wait(&self, timeout: u64) -> Result<(), LockError> {
        let mut remaining = timeout;
        loop {
            if self.acquire() {
                return Ok(());
            }
            if timeout > 0 {
                remaining -= 1;
                if remaining == 0 {
                    return Err(LockError::TimeoutExpired {
                        dir: self.path.clone(),
                        timeout,
                    });
                }
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }
}

/// Scoped lock acquisition; releases on drop.
pub struct LockGuard<'a> {
    dir: &'a LockableDirectory,
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.dir.release() {
            tracing::warn!(
                "failed to release lock on '{}': {err:#}",
                self.dir.path.display()
            );
        }
    }
}

/// Marks directories as eligible for garbage collection.
#[derive(Debug, Clone)]
pub struct ExpirableDirectory {
    touch_file: PathBuf,
}

impl ExpirableDirectory {
    pub fn new(path: &Path) -> Self {
        ExpirableDirectory {
            touch_file: path.join(EXPIRED_FILE),
        }
    }

    pub fn expire(&self) -> anyhow::Result<()> {
        std::fs::File::create(&self.touch_file)?;
        Ok(())
    }

    pub fn is_expired(&self) -> bool {
        self.touch_file.exists()
    }
}
