use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;

/// A waiter gave up before the lock was granted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Timed out after {0:?} waiting for lock")]
pub struct LockTimeout(pub Duration);

/// Mutual exclusion for async critical sections.
///
/// Waiters are granted the lock in arrival order. A waiter that times out
/// leaves the queue without reordering the others. The lock is released when
/// the body finishes, returns an error, or panics.
#[derive(Debug, Default)]
pub struct AsyncMutex {
    inner: Mutex<()>,
}

impl AsyncMutex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `body` under the lock, waiting as long as it takes.
    pub async fn run<F, Fut, T>(&self, body: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let _guard = self.inner.lock().await;
        body().await
    }

    /// Run `body` under the lock, giving up if it is not granted within `timeout`.
    pub async fn acquire_and_run<F, Fut, T>(
        &self,
        body: F,
        timeout: Option<Duration>,
    ) -> Result<T, LockTimeout>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let _guard = match timeout {
            Some(limit) => tokio::time::timeout(limit, self.inner.lock())
                .await
                .map_err(|_| LockTimeout(limit))?,
            None => self.inner.lock().await,
        };
        Ok(body().await)
    }

    pub fn is_locked(&self) -> bool {
        self.inner.try_lock().is_err()
    }
}
