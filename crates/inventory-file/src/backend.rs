use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use inventory_core::{Document, InventoryBackend, StorageError, DEFAULT_LOCK_TIMEOUT};
use tokio::fs;
use tracing::{debug, instrument};

use crate::lock::{self, LockGuard};

/// Where the inventory lives when no path is configured.
pub const DEFAULT_INVENTORY_PATH: &str = "~/.ansible/inventory.json";

/// Inventory stored as one pretty-printed JSON file.
///
/// Two lock files sit next to the data file:
/// - `<file>.lock` is held for a whole transaction (`lock` to `unlock`).
/// - `<file>.io.lock` is held for the duration of each read or write, so
///   tools reading the file directly never race a half-finished save.
///
/// Saves go through a temp file and a rename.
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    lock_path: PathBuf,
    io_lock_path: PathBuf,
    lock_timeout: Duration,
    held: Mutex<Option<LockGuard>>,
}

impl FileBackend {
    /// Backend for the file at `path`. A leading `~` is expanded to the
    /// home directory.
    pub fn new(path: impl AsRef<Path>) -> Self {
        let path = expand_home(path.as_ref());
        Self {
            lock_path: with_suffix(&path, ".lock"),
            io_lock_path: with_suffix(&path, ".io.lock"),
            path,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            held: Mutex::new(None),
        }
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    fn held(&self) -> Result<MutexGuard<'_, Option<LockGuard>>, StorageError> {
        self.held
            .lock()
            .map_err(|_| StorageError::Internal("file lock slot poisoned".to_string()))
    }

    fn parent_dir(&self) -> Option<&Path> {
        self.path.parent().filter(|p| !p.as_os_str().is_empty())
    }

    async fn parent_dir_exists(&self) -> Result<bool, StorageError> {
        let Some(parent) = self.parent_dir() else {
            return Ok(true);
        };
        fs::try_exists(parent).await.map_err(|e| {
            StorageError::Io(format!("Failed to inspect {}: {}", parent.display(), e))
        })
    }

    /// Lock files are created on demand, so the directory has to exist
    /// before locking or saving.
    async fn ensure_parent_dir(&self) -> Result<(), StorageError> {
        let Some(parent) = self.parent_dir() else {
            return Ok(());
        };
        fs::create_dir_all(parent).await.map_err(|e| {
            StorageError::Io(format!(
                "Failed to create parent directory for {}: {}",
                self.path.display(),
                e
            ))
        })
    }
}

#[async_trait]
impl InventoryBackend for FileBackend {
    fn backend_name(&self) -> &'static str {
        "file"
    }

    #[instrument(skip(self), level = "debug", fields(path = %self.path.display()))]
    async fn load(&self) -> Result<Document, StorageError> {
        if !self.parent_dir_exists().await? {
            debug!("No inventory directory yet, starting empty");
            return Ok(Document::default());
        }
        let _io = lock::lock(&self.io_lock_path, self.lock_timeout).await?;

        let json = match fs::read_to_string(&self.path).await {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No inventory file yet, starting empty");
                return Ok(Document::default());
            }
            Err(e) => {
                return Err(StorageError::Io(format!(
                    "Failed to read {}: {}",
                    self.path.display(),
                    e
                )))
            }
        };
        if json.trim().is_empty() {
            return Ok(Document::default());
        }

        debug!("Loaded inventory ({} bytes)", json.len());
        Document::from_json(&json)
    }

    #[instrument(skip(self, doc), level = "debug", fields(path = %self.path.display()))]
    async fn save(&self, doc: &Document) -> Result<(), StorageError> {
        let json = doc.to_json()?;
        self.ensure_parent_dir().await?;
        let _io = lock::lock(&self.io_lock_path, self.lock_timeout).await?;

        let temp_path = with_suffix(&self.path, ".tmp");
        fs::write(&temp_path, &json).await.map_err(|e| {
            StorageError::Io(format!(
                "Failed to write temp file {}: {}",
                temp_path.display(),
                e
            ))
        })?;
        fs::rename(&temp_path, &self.path).await.map_err(|e| {
            StorageError::Io(format!(
                "Failed to rename temp file to {}: {}",
                self.path.display(),
                e
            ))
        })?;

        debug!("Saved inventory ({} bytes)", json.len());
        Ok(())
    }

    #[instrument(skip(self), level = "debug", fields(path = %self.lock_path.display()))]
    async fn lock(&self) -> Result<(), StorageError> {
        if self.held()?.is_some() {
            debug!("Transaction lock already held");
            return Ok(());
        }
        self.ensure_parent_dir().await?;
        let guard = lock::lock(&self.lock_path, self.lock_timeout).await?;
        *self.held()? = Some(guard);
        Ok(())
    }

    #[instrument(skip(self), level = "debug", fields(path = %self.lock_path.display()))]
    async fn unlock(&self) -> Result<(), StorageError> {
        // Dropping the guard releases the OS lock.
        let released = self.held()?.take();
        if released.is_none() {
            debug!("Transaction lock not held, nothing to release");
        }
        Ok(())
    }
}

/// Replace a leading `~` component with the user's home directory.
pub fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => match dirs::home_dir() {
            Some(home) if rest.as_os_str().is_empty() => home,
            Some(home) => home.join(rest),
            None => path.to_path_buf(),
        },
        Err(_) => path.to_path_buf(),
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}
