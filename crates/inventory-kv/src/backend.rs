use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use inventory_core::{
    poll_lock, Backoff, Document, InventoryBackend, StorageError, DEFAULT_LOCK_TIMEOUT,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::store::KvStore;

/// Key holding the document when none is configured.
pub const DEFAULT_INVENTORY_KEY: &str = "ansible_inventory";

/// Linear backoff between lock attempts: 50 ms, 100 ms, ... up to 500 ms.
const LOCK_BACKOFF: Backoff = Backoff::Linear {
    step: Duration::from_millis(50),
    max: Duration::from_millis(500),
};

/// Value stored under the lock key while a session holds it.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct LockData {
    holder_id: String,
    acquired_at: i64,
    expires_at: i64,
}

/// Inventory stored as one JSON value in a key-value store.
///
/// The transaction lock is a second key, `<key>_redis_backend_lock`, set
/// only if absent and with an expiry equal to the lock timeout, so a crashed
/// holder cannot block everyone forever. Its value identifies this session;
/// `unlock` deletes the key only while it still carries that value.
pub struct KvBackend<S> {
    store: S,
    key: String,
    lock_key: String,
    holder_id: String,
    lock_timeout: Duration,
    /// Exact lock value written on acquisition.
    held: Mutex<Option<String>>,
}

impl<S: KvStore> KvBackend<S> {
    /// Backend for the document stored under `key`.
    pub fn new(store: S, key: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            lock_key: format!("{}_redis_backend_lock", key),
            key,
            store,
            holder_id: uuid::Uuid::new_v4().to_string(),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            held: Mutex::new(None),
        }
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn lock_key(&self) -> &str {
        &self.lock_key
    }

    pub fn holder_id(&self) -> &str {
        &self.holder_id
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    fn held(&self) -> Result<MutexGuard<'_, Option<String>>, StorageError> {
        self.held
            .lock()
            .map_err(|_| StorageError::Internal("KV lock slot poisoned".to_string()))
    }

    fn lock_value(&self) -> Result<String, StorageError> {
        let now = chrono::Utc::now().timestamp_millis();
        let ttl_ms = i64::try_from(self.lock_timeout.as_millis()).unwrap_or(i64::MAX);
        let lock_data = LockData {
            holder_id: self.holder_id.clone(),
            acquired_at: now,
            expires_at: now.saturating_add(ttl_ms),
        };
        serde_json::to_string(&lock_data).map_err(|e| {
            StorageError::Serialization(format!("Failed to serialize lock data: {}", e))
        })
    }

    async fn try_lock(&self) -> Result<bool, StorageError> {
        let value = self.lock_value()?;
        if !self
            .store
            .set_if_absent(&self.lock_key, &value, self.lock_timeout)
            .await?
        {
            return Ok(false);
        }
        *self.held()? = Some(value);
        Ok(true)
    }
}

#[async_trait]
impl<S: KvStore> InventoryBackend for KvBackend<S> {
    fn backend_name(&self) -> &'static str {
        "kv"
    }

    #[instrument(skip(self), level = "debug", fields(key = %self.key))]
    async fn load(&self) -> Result<Document, StorageError> {
        match self.store.get(&self.key).await? {
            Some(json) if !json.trim().is_empty() => {
                debug!("Loaded inventory ({} bytes)", json.len());
                Document::from_json(&json)
            }
            _ => {
                debug!("No inventory stored yet, starting empty");
                Ok(Document::default())
            }
        }
    }

    #[instrument(skip(self, doc), level = "debug", fields(key = %self.key))]
    async fn save(&self, doc: &Document) -> Result<(), StorageError> {
        let json = doc.to_json()?;
        self.store.set(&self.key, &json).await?;
        debug!("Saved inventory ({} bytes)", json.len());
        Ok(())
    }

    #[instrument(skip(self), level = "debug", fields(key = %self.lock_key, holder = %self.holder_id))]
    async fn lock(&self) -> Result<(), StorageError> {
        if self.held()?.is_some() {
            debug!("Lock already held by this session");
            return Ok(());
        }
        poll_lock(
            &self.lock_key,
            self.lock_timeout,
            LOCK_BACKOFF,
            move || self.try_lock(),
        )
        .await?;
        debug!("Acquired lock {}", self.lock_key);
        Ok(())
    }

    #[instrument(skip(self), level = "debug", fields(key = %self.lock_key, holder = %self.holder_id))]
    async fn unlock(&self) -> Result<(), StorageError> {
        let Some(value) = self.held()?.take() else {
            debug!("Lock not held, nothing to release");
            return Ok(());
        };
        let deleted = self
            .store
            .delete_if_equals(&self.lock_key, &value)
            .await
            .inspect_err(|e| warn!("Failed to release lock {}: {}", self.lock_key, e))?;
        if deleted {
            debug!("Released lock {}", self.lock_key);
        } else {
            warn!("Lock {} expired before release", self.lock_key);
        }
        Ok(())
    }
}
