use std::future::Future;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::document::Document;
use crate::error::StorageError;

/// How long `lock()` keeps polling before giving up.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(3);

/// Storage medium for an inventory document.
///
/// Implementations must be usable from several processes at once: `lock`
/// is a cross-process mutex over the whole document, while `load` and
/// `save` never expose a partially written document to other readers.
#[async_trait]
pub trait InventoryBackend: Send + Sync {
    /// Returns the backend identifier (e.g., "file", "kv").
    fn backend_name(&self) -> &'static str;

    /// Load the persisted document, or an empty one if nothing is stored.
    async fn load(&self) -> Result<Document, StorageError>;

    /// Overwrite the persisted document.
    async fn save(&self, doc: &Document) -> Result<(), StorageError>;

    /// Block until the exclusive lock is held, failing with
    /// [`StorageError::Lock`] once the backend's timeout elapses.
    async fn lock(&self) -> Result<(), StorageError>;

    /// Release the lock. Silently succeeds if it is not held.
    async fn unlock(&self) -> Result<(), StorageError>;
}

/// Delay between lock attempts.
#[derive(Debug, Clone, Copy)]
pub enum Backoff {
    Fixed(Duration),
    /// `step * attempt`, capped at `max`.
    Linear { step: Duration, max: Duration },
}

impl Backoff {
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            Backoff::Fixed(delay) => delay,
            Backoff::Linear { step, max } => step.saturating_mul(attempt).min(max),
        }
    }
}

/// Call `attempt` until it reports success, sleeping per `backoff` between
/// tries. Fails with [`StorageError::Lock`] once `timeout` has elapsed, even
/// if an attempt is still waiting on a slow store.
pub async fn poll_lock<F, Fut>(
    what: &str,
    timeout: Duration,
    backoff: Backoff,
    mut attempt: F,
) -> Result<(), StorageError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, StorageError>>,
{
    let started = Instant::now();
    let mut tries: u32 = 0;
    loop {
        let remaining = timeout.saturating_sub(started.elapsed());
        // An attempt cut short by the deadline counts as a failed one.
        let acquired = match tokio::time::timeout(remaining, attempt()).await {
            Ok(result) => result?,
            Err(_) => false,
        };
        if acquired {
            return Ok(());
        }
        tries = tries.saturating_add(1);
        let remaining = timeout.saturating_sub(started.elapsed());
        if remaining.is_zero() {
            return Err(StorageError::Lock(format!(
                "Could not acquire {} within {:?} ({} attempts)",
                what, timeout, tries
            )));
        }
        tokio::time::sleep(backoff.delay(tries).min(remaining)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_linear_backoff_is_capped() {
        let backoff = Backoff::Linear {
            step: Duration::from_millis(50),
            max: Duration::from_millis(120),
        };
        assert_eq!(backoff.delay(1), Duration::from_millis(50));
        assert_eq!(backoff.delay(2), Duration::from_millis(100));
        assert_eq!(backoff.delay(9), Duration::from_millis(120));
    }

    #[tokio::test]
    async fn test_poll_lock_succeeds_after_retries() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        poll_lock(
            "test lock",
            Duration::from_secs(1),
            Backoff::Fixed(Duration::from_millis(1)),
            move || async move { Ok(calls.fetch_add(1, Ordering::SeqCst) >= 2) },
        )
        .await
        .unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_poll_lock_times_out() {
        let err = poll_lock(
            "test lock",
            Duration::from_millis(30),
            Backoff::Fixed(Duration::from_millis(5)),
            || async { Ok(false) },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, StorageError::Lock(_)));
    }

    #[tokio::test]
    async fn test_poll_lock_does_not_wait_out_a_stuck_attempt() {
        let started = Instant::now();
        let err = poll_lock(
            "stuck lock",
            Duration::from_millis(100),
            Backoff::Fixed(Duration::from_millis(5)),
            std::future::pending::<Result<bool, StorageError>>,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, StorageError::Lock(_)));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_poll_lock_zero_timeout_still_tries_once() {
        poll_lock(
            "free lock",
            Duration::ZERO,
            Backoff::Fixed(Duration::from_millis(5)),
            || async { Ok(true) },
        )
        .await
        .unwrap();
    }
}
