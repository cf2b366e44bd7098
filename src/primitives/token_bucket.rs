//! Token bucket admission-rate control.
//!
//! Fixed integer capacity, steady refill rate in tokens/sec. A background
//! refiller task adds `elapsed * rate` tokens every 100ms, clamped to
//! capacity, and wakes any waiters. Mirrors the refill-ticker pattern the
//! kernel scheduler uses for its notify-driven worker loop, generalized to a
//! periodic tick instead of an event-driven wake.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, ToolkitError};

const REFILL_TICK: Duration = Duration::from_millis(100);

struct Inner {
    tokens: Mutex<f64>,
    capacity: u64,
    rate_per_sec: f64,
    notify: Notify,
    shutdown: AtomicBool,
}

/// Integer-capacity, float-accumulating token bucket.
///
/// Cheaply cloneable (`Arc`-backed). Call [`TokenBucket::start`] once to spawn
/// the background refiller; dropping the returned handle does not stop it —
/// call [`TokenBucket::shutdown`] instead.
#[derive(Clone)]
pub struct TokenBucket {
    inner: Arc<Inner>,
}

impl TokenBucket {
    /// Create a bucket starting full, with the given integer capacity and
    /// refill rate in tokens/sec.
    pub fn new(capacity: u64, rate_per_sec: f64) -> Result<Self> {
        if capacity == 0 {
            return Err(ToolkitError::InvalidCapacity {
                reason: "token bucket capacity must be > 0".into(),
            });
        }
        if rate_per_sec <= 0.0 {
            return Err(ToolkitError::InvalidRate {
                reason: "token bucket rate must be > 0".into(),
            });
        }
        Ok(Self {
            inner: Arc::new(Inner {
                tokens: Mutex::new(capacity as f64),
                capacity,
                rate_per_sec,
                notify: Notify::new(),
                shutdown: AtomicBool::new(false),
            }),
        })
    }

    /// Spawn the background refiller loop. Idempotent to call repeatedly only
    /// if the previous handle was dropped without calling `shutdown`; callers
    /// should keep at most one refiller per bucket.
    pub fn start(&self) -> JoinHandle<()> {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let mut last = Instant::now();
            let mut tick = tokio::time::interval(REFILL_TICK);
            loop {
                tick.tick().await;
                if inner.shutdown.load(Ordering::Acquire) {
                    break;
                }
                let now = Instant::now();
                let elapsed = now.duration_since(last).as_secs_f64();
                last = now;

                let mut tokens = inner.tokens.lock().await;
                *tokens = (*tokens + elapsed * inner.rate_per_sec).min(inner.capacity as f64);
                drop(tokens);
                inner.notify.notify_waiters();
            }
        })
    }

    /// Stop the background refiller and wake any waiters so they observe the
    /// shutdown (acquires will keep failing to make progress but won't hang).
    pub fn shutdown(&self) {
        self.inner.shutdown.store(true, Ordering::Release);
        self.inner.notify.notify_waiters();
    }

    /// Capacity this bucket was constructed with.
    pub fn capacity(&self) -> u64 {
        self.inner.capacity
    }

    /// Current token count, truncated to an integer.
    pub async fn available(&self) -> u64 {
        *self.inner.tokens.lock().await as u64
    }

    /// Acquire `n` tokens, blocking until enough have accumulated, the
    /// cancellation token fires, or the bucket is shut down.
    pub async fn acquire(&self, n: u64, cancel: &CancellationToken) -> Result<()> {
        loop {
            {
                let mut tokens = self.inner.tokens.lock().await;
                if *tokens >= n as f64 {
                    *tokens -= n as f64;
                    return Ok(());
                }
            }
            if self.inner.shutdown.load(Ordering::Acquire) {
                return Err(ToolkitError::Cancelled);
            }
            tokio::select! {
                _ = self.inner.notify.notified() => {}
                _ = cancel.cancelled() => return Err(ToolkitError::Cancelled),
            }
        }
    }

    /// Non-blocking variant: acquire `n` tokens if immediately available.
    pub async fn try_acquire(&self, n: u64) -> bool {
        let mut tokens = self.inner.tokens.lock().await;
        if *tokens >= n as f64 {
            *tokens -= n as f64;
            true
        } else {
            false
        }
    }

    /// Return `n` tokens to the bucket (used to undo a grant when a
    /// downstream acquisition, e.g. the semaphore, fails).
    pub async fn release(&self, n: u64) {
        let mut tokens = self.inner.tokens.lock().await;
        *tokens = (*tokens + n as f64).min(self.inner.capacity as f64);
        drop(tokens);
        self.inner.notify.notify_waiters();
    }
}
