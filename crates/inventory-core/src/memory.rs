use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, instrument};

use crate::backend::{poll_lock, Backoff, InventoryBackend, DEFAULT_LOCK_TIMEOUT};
use crate::document::Document;
use crate::error::StorageError;

static NEXT_SESSION: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Default)]
struct Shared {
    /// Serialized document, as a real backend would hold it.
    stored: Option<String>,
    /// Session currently holding the lock.
    holder: Option<u64>,
}

/// In-process backend.
///
/// Every [`MemoryBackend::session`] of one store shares the stored document
/// and the lock, but is a distinct lock holder, so several engines built on
/// sessions of the same store behave like separate processes.
#[derive(Debug)]
pub struct MemoryBackend {
    shared: Arc<Mutex<Shared>>,
    session_id: u64,
    lock_timeout: Duration,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Mutex::new(Shared::default())),
            session_id: NEXT_SESSION.fetch_add(1, Ordering::Relaxed),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    /// Create a store already holding `doc`.
    pub fn with_document(doc: &Document) -> Result<Self, StorageError> {
        let backend = Self::new();
        backend.state()?.stored = Some(doc.to_json()?);
        Ok(backend)
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Another client of the same store, with its own lock identity.
    pub fn session(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            session_id: NEXT_SESSION.fetch_add(1, Ordering::Relaxed),
            lock_timeout: self.lock_timeout,
        }
    }

    /// The stored JSON, if anything was saved.
    pub fn stored_json(&self) -> Result<Option<String>, StorageError> {
        Ok(self.state()?.stored.clone())
    }

    /// Whether any session currently holds the lock.
    pub fn is_locked(&self) -> Result<bool, StorageError> {
        Ok(self.state()?.holder.is_some())
    }

    fn state(&self) -> Result<MutexGuard<'_, Shared>, StorageError> {
        self.shared
            .lock()
            .map_err(|_| StorageError::Internal("memory store mutex poisoned".to_string()))
    }

    fn try_lock(&self) -> Result<bool, StorageError> {
        let mut state = self.state()?;
        match state.holder {
            None => {
                state.holder = Some(self.session_id);
                Ok(true)
            }
            Some(holder) => Ok(holder == self.session_id),
        }
    }
}

#[async_trait]
impl InventoryBackend for MemoryBackend {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn load(&self) -> Result<Document, StorageError> {
        match self.state()?.stored.as_deref() {
            Some(json) => Document::from_json(json),
            None => Ok(Document::default()),
        }
    }

    async fn save(&self, doc: &Document) -> Result<(), StorageError> {
        let json = doc.to_json()?;
        self.state()?.stored = Some(json);
        Ok(())
    }

    #[instrument(skip(self), level = "debug", fields(session = self.session_id))]
    async fn lock(&self) -> Result<(), StorageError> {
        poll_lock(
            "memory store lock",
            self.lock_timeout,
            Backoff::Fixed(Duration::from_millis(10)),
            move || async move { self.try_lock() },
        )
        .await?;
        debug!("Acquired memory store lock");
        Ok(())
    }

    #[instrument(skip(self), level = "debug", fields(session = self.session_id))]
    async fn unlock(&self) -> Result<(), StorageError> {
        let mut state = self.state()?;
        if state.holder == Some(self.session_id) {
            state.holder = None;
            debug!("Released memory store lock");
        }
        Ok(())
    }
}
