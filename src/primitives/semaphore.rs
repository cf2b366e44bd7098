//! Classical counting semaphore gating admission by integer amount.
//!
//! Unlike `tokio::sync::Semaphore`, permits are released and reacquired in
//! bulk as capacity changes (see [`CountingSemaphore::resize`]), which the
//! resource manager's load monitor relies on when scaling pools up or down.

use std::sync::Arc;

use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;

use crate::error::{Result, ToolkitError};

struct Inner {
    available: Mutex<u64>,
    capacity: Mutex<u64>,
    notify: Notify,
}

/// A counting semaphore supporting multi-permit acquire/release and resize.
#[derive(Clone)]
pub struct CountingSemaphore {
    inner: Arc<Inner>,
}

impl CountingSemaphore {
    /// Create a semaphore with `capacity` permits, all initially available.
    pub fn new(capacity: u64) -> Self {
        Self {
            inner: Arc::new(Inner {
                available: Mutex::new(capacity),
                capacity: Mutex::new(capacity),
                notify: Notify::new(),
            }),
        }
    }

    /// Total permit capacity.
    pub async fn capacity(&self) -> u64 {
        *self.inner.capacity.lock().await
    }

    /// Permits currently available for acquisition.
    pub async fn available(&self) -> u64 {
        *self.inner.available.lock().await
    }

    /// Acquire `n` permits, blocking until available or cancelled.
    pub async fn acquire(&self, n: u64, cancel: &CancellationToken) -> Result<()> {
        loop {
            {
                let mut available = self.inner.available.lock().await;
                if *available >= n {
                    *available -= n;
                    return Ok(());
                }
            }
            tokio::select! {
                _ = self.inner.notify.notified() => {}
                _ = cancel.cancelled() => return Err(ToolkitError::Cancelled),
            }
        }
    }

    /// Non-blocking acquire: succeeds immediately or not at all.
    pub async fn try_acquire(&self, n: u64) -> bool {
        let mut available = self.inner.available.lock().await;
        if *available >= n {
            *available -= n;
            true
        } else {
            false
        }
    }

    /// Return `n` permits, waking any waiters.
    pub async fn release(&self, n: u64) {
        let mut available = self.inner.available.lock().await;
        let capacity = *self.inner.capacity.lock().await;
        *available = (*available + n).min(capacity);
        drop(available);
        self.inner.notify.notify_waiters();
    }

    /// Change total capacity. `held` is the number of permits the caller
    /// believes are currently checked out (`capacity - available` before the
    /// resize), used only to validate the invariant `new_capacity >= held`;
    /// the semaphore recomputes `available` from the delta so outstanding
    /// holders remain consistent without having to reacquire anything.
    pub async fn resize(&self, new_capacity: u64, held: u64) -> Result<()> {
        if new_capacity < held {
            return Err(ToolkitError::InvalidCapacity {
                reason: format!(
                    "cannot shrink capacity to {new_capacity} below current allocation {held}"
                ),
            });
        }
        let mut capacity = self.inner.capacity.lock().await;
        let mut available = self.inner.available.lock().await;
        *capacity = new_capacity;
        *available = new_capacity - held;
        drop(available);
        drop(capacity);
        self.inner.notify.notify_waiters();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquire_and_release_round_trip() {
        let sem = CountingSemaphore::new(10);
        let cancel = CancellationToken::new();
        sem.acquire(4, &cancel).await.unwrap();
        assert_eq!(sem.available().await, 6);
        sem.release(4).await;
        assert_eq!(sem.available().await, 10);
    }

    #[tokio::test]
    async fn try_acquire_fails_when_insufficient() {
        let sem = CountingSemaphore::new(3);
        assert!(sem.try_acquire(3).await);
        assert!(!sem.try_acquire(1).await);
    }

    #[tokio::test]
    async fn acquire_blocks_then_unblocks_on_release() {
        let sem = CountingSemaphore::new(2);
        assert!(sem.try_acquire(2).await);

        let sem2 = sem.clone();
        let cancel = CancellationToken::new();
        let cancel2 = cancel.clone();
        let handle = tokio::spawn(async move { sem2.acquire(1, &cancel2).await });

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        sem.release(1).await;

        let result = tokio::time::timeout(std::time::Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn cancellation_unblocks_waiter() {
        let sem = CountingSemaphore::new(1);
        assert!(sem.try_acquire(1).await);

        let cancel = CancellationToken::new();
        let sem2 = sem.clone();
        let cancel2 = cancel.clone();
        let handle = tokio::spawn(async move { sem2.acquire(1, &cancel2).await });

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        cancel.cancel();

        let result = handle.await.unwrap();
        assert!(matches!(result, Err(ToolkitError::Cancelled)));
    }

    #[tokio::test]
    async fn resize_grows_and_preserves_held_permits() {
        let sem = CountingSemaphore::new(5);
        assert!(sem.try_acquire(3).await); // 2 available, 3 held
        sem.resize(10, 3).await.unwrap();
        assert_eq!(sem.available().await, 7);
        assert_eq!(sem.capacity().await, 10);
    }

    #[tokio::test]
    async fn resize_refuses_shrink_below_held() {
        let sem = CountingSemaphore::new(5);
        assert!(sem.try_acquire(4).await); // 4 held
        let result = sem.resize(3, 4).await;
        assert!(matches!(result, Err(ToolkitError::InvalidCapacity { .. })));
        assert_eq!(sem.capacity().await, 5);
    }
}
