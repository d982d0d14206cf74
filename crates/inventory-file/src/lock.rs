use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use fs2::FileExt;
use inventory_core::{poll_lock, Backoff, StorageError};
use tracing::{debug, warn};

/// Delay between two attempts on a busy lock file.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// An exclusive advisory lock on a lock file, held through its open handle.
///
/// Dropping the guard unlocks and closes the file. The OS also releases the
/// lock if the process dies while holding it.
#[derive(Debug)]
pub struct LockGuard {
    file: File,
    path: PathBuf,
}

impl LockGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        match FileExt::unlock(&self.file) {
            Ok(()) => debug!("Released lock on {}", self.path.display()),
            Err(e) => warn!("Failed to unlock {}: {}", self.path.display(), e),
        }
    }
}

/// Try once to take the exclusive lock on `path`, creating the file if
/// needed. `Ok(None)` means another handle holds it.
pub fn try_lock(path: &Path) -> Result<Option<LockGuard>, StorageError> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .map_err(|e| {
            StorageError::Io(format!("Failed to open lock file {}: {}", path.display(), e))
        })?;

    match file.try_lock_exclusive() {
        Ok(()) => {
            debug!("Acquired lock on {}", path.display());
            Ok(Some(LockGuard {
                file,
                path: path.to_path_buf(),
            }))
        }
        Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
            debug!("Lock on {} held elsewhere", path.display());
            Ok(None)
        }
        Err(e) => Err(StorageError::Io(format!(
            "Failed to lock {}: {}",
            path.display(),
            e
        ))),
    }
}

/// Poll [`try_lock`] every [`POLL_INTERVAL`] until it succeeds or `timeout`
/// elapses.
pub async fn lock(path: &Path, timeout: Duration) -> Result<LockGuard, StorageError> {
    let slot: Mutex<Option<LockGuard>> = Mutex::new(None);
    let acquired = &slot;
    poll_lock(
        &format!("lock on {}", path.display()),
        timeout,
        Backoff::Fixed(POLL_INTERVAL),
        move || async move {
            let Some(guard) = try_lock(path)? else {
                return Ok(false);
            };
            *acquired
                .lock()
                .map_err(|_| StorageError::Internal("lock slot poisoned".to_string()))? =
                Some(guard);
            Ok(true)
        },
    )
    .await?;

    slot.into_inner()
        .ok()
        .flatten()
        .ok_or_else(|| StorageError::Internal(format!("Lost guard for {}", path.display())))
}
