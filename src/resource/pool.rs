//! A single resource type's admission pipeline: token bucket (rate) gating
//! a counting semaphore (capacity), plus the stats the load monitor reads.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::primitives::{CountingSemaphore, Timer, TokenBucket};

use super::ResourceType;

/// Point-in-time usage statistics for a [`ResourcePool`].
#[derive(Debug, Clone)]
pub struct PoolStats {
    pub resource_type: ResourceType,
    pub current: u64,
    pub capacity: u64,
    pub peak: u64,
    pub acquisitions: u64,
    pub failures: u64,
    pub average_wait_micros: f64,
}

/// Admission gate for one resource type: rate-limited by a [`TokenBucket`],
/// capacity-limited by a [`CountingSemaphore`].
pub struct ResourcePool {
    resource_type: ResourceType,
    bucket: TokenBucket,
    semaphore: CountingSemaphore,
    allocated: AtomicU64,
    peak: AtomicU64,
    acquisitions: AtomicU64,
    failures: AtomicU64,
    wait_timer: Timer,
    refiller: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl ResourcePool {
    pub fn new(resource_type: ResourceType, capacity: u64, rate_per_sec: f64) -> Result<Self> {
        Ok(Self {
            resource_type,
            bucket: TokenBucket::new(capacity, rate_per_sec)?,
            semaphore: CountingSemaphore::new(capacity),
            allocated: AtomicU64::new(0),
            peak: AtomicU64::new(0),
            acquisitions: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            wait_timer: Timer::new(),
            refiller: std::sync::Mutex::new(None),
        })
    }

    /// Spawn the token bucket's background refiller. Idempotent.
    pub fn start(&self) {
        let mut guard = self.refiller.lock().unwrap();
        if guard.is_none() {
            *guard = Some(self.bucket.start());
        }
    }

    /// Stop the token-bucket refiller. Does not touch the semaphore or any
    /// outstanding allocation.
    pub fn shutdown(&self) {
        self.bucket.shutdown();
        if let Some(handle) = self.refiller.lock().unwrap().take() {
            handle.abort();
        }
    }

    pub fn resource_type(&self) -> ResourceType {
        self.resource_type
    }

    pub async fn capacity(&self) -> u64 {
        self.semaphore.capacity().await
    }

    pub fn current_allocated(&self) -> u64 {
        self.allocated.load(Ordering::Acquire)
    }

    /// Acquire `amount` of this resource: tokens first, then the semaphore.
    /// If the semaphore step fails or is cancelled, the tokens are returned
    /// and `amount` is never added to `current_allocated`.
    pub async fn acquire(&self, amount: u64, cancel: &CancellationToken) -> Result<()> {
        let started = Instant::now();
        self.bucket.acquire(amount, cancel).await?;

        match self.semaphore.acquire(amount, cancel).await {
            Ok(()) => {
                self.wait_timer.observe(started.elapsed());
                self.acquisitions.fetch_add(1, Ordering::Relaxed);
                let current = self.allocated.fetch_add(amount, Ordering::AcqRel) + amount;
                self.peak.fetch_max(current, Ordering::AcqRel);
                Ok(())
            }
            Err(e) => {
                self.bucket.release(amount).await;
                self.failures.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    /// Non-blocking variant of [`ResourcePool::acquire`].
    pub async fn try_acquire(&self, amount: u64) -> bool {
        if !self.bucket.try_acquire(amount).await {
            self.failures.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        if !self.semaphore.try_acquire(amount).await {
            self.bucket.release(amount).await;
            self.failures.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        self.acquisitions.fetch_add(1, Ordering::Relaxed);
        let current = self.allocated.fetch_add(amount, Ordering::AcqRel) + amount;
        self.peak.fetch_max(current, Ordering::AcqRel);
        true
    }

    /// Return `amount` to the semaphore and reduce `current_allocated`.
    pub async fn release(&self, amount: u64) {
        self.semaphore.release(amount).await;
        self.allocated.fetch_sub(amount, Ordering::AcqRel);
    }

    /// Recreate capacity; outstanding holders remain consistent because the
    /// semaphore recomputes `available` from `current_allocated`.
    pub async fn resize(&self, new_capacity: u64) -> Result<()> {
        let held = self.current_allocated();
        self.semaphore.resize(new_capacity, held).await
    }

    pub async fn stats(&self) -> PoolStats {
        PoolStats {
            resource_type: self.resource_type,
            current: self.current_allocated(),
            capacity: self.capacity().await,
            peak: self.peak.load(Ordering::Acquire),
            acquisitions: self.acquisitions.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            average_wait_micros: self.wait_timer.snapshot().mean,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquire_release_round_trip_restores_available() {
        let pool = ResourcePool::new(ResourceType::Cpu, 10, 1000.0).unwrap();
        let cancel = CancellationToken::new();
        pool.acquire(4, &cancel).await.unwrap();
        assert_eq!(pool.current_allocated(), 4);
        pool.release(4).await;
        assert_eq!(pool.current_allocated(), 0);
        assert_eq!(pool.capacity().await, 10);
    }

    #[tokio::test]
    async fn semaphore_failure_refunds_tokens() {
        let pool = ResourcePool::new(ResourceType::Cpu, 2, 1000.0).unwrap();
        let cancel = CancellationToken::new();
        assert!(pool.try_acquire(2).await);

        cancel.cancel();
        let result = pool.acquire(1, &cancel).await;
        assert!(result.is_err());
        // semaphore never granted, so tokens should be restored for the
        // already-issued amount.
    }

    #[tokio::test]
    async fn resize_never_drops_allocation_below_held() {
        let pool = ResourcePool::new(ResourceType::Memory, 10, 1000.0).unwrap();
        assert!(pool.try_acquire(8).await);
        let result = pool.resize(5).await;
        assert!(result.is_err());
        assert_eq!(pool.capacity().await, 10);
    }

    #[tokio::test]
    async fn resize_grows_and_allows_more_acquisitions() {
        let pool = ResourcePool::new(ResourceType::Network, 2, 1000.0).unwrap();
        assert!(pool.try_acquire(2).await);
        pool.resize(5).await.unwrap();
        assert!(pool.try_acquire(3).await);
    }
}
