//! Ties the four [`ResourcePool`]s together with quota enforcement, deadlock
//! detection, and a load monitor that rescales pool capacity to demand.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, ToolkitError};

use super::deadlock::WaitForGraph;
use super::pool::{PoolStats, ResourcePool};
use super::quota::ResourceQuota;
use super::ResourceType;

const GIB: u64 = 1 << 30;

/// Configuration for a [`ResourceManager`].
#[derive(Debug, Clone)]
pub struct ResourceManagerConfig {
    pub cpu_capacity: u64,
    pub memory_capacity: u64,
    pub file_handles_capacity: u64,
    pub network_capacity: u64,
    pub rate_limit_per_sec: f64,
    pub scale_up_threshold: f64,
    pub scale_down_threshold: f64,
    pub monitor_interval: Duration,
    pub enable_deadlock_detection: bool,
}

impl Default for ResourceManagerConfig {
    fn default() -> Self {
        Self {
            cpu_capacity: 100,
            memory_capacity: GIB,
            file_handles_capacity: 1000,
            network_capacity: 100,
            rate_limit_per_sec: 50.0,
            scale_up_threshold: 0.8,
            scale_down_threshold: 0.2,
            monitor_interval: Duration::from_secs(5),
            enable_deadlock_detection: true,
        }
    }
}

impl ResourceManagerConfig {
    fn capacity_for(&self, resource_type: ResourceType) -> u64 {
        match resource_type {
            ResourceType::Cpu => self.cpu_capacity,
            ResourceType::Memory => self.memory_capacity,
            ResourceType::FileHandles => self.file_handles_capacity,
            ResourceType::Network => self.network_capacity,
        }
    }
}

/// Coordinates admission across all resource types: quota veto, token-bucket
/// rate limiting, semaphore capacity, deadlock detection, and autoscaling.
pub struct ResourceManager {
    config: ResourceManagerConfig,
    pools: DashMap<ResourceType, Arc<ResourcePool>>,
    quota: ResourceQuota,
    deadlock: WaitForGraph,
    outstanding: DashMap<(String, ResourceType), u64>,
    cancel: CancellationToken,
    background: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl ResourceManager {
    pub fn new(config: ResourceManagerConfig) -> Result<Self> {
        let pools = DashMap::new();
        for resource_type in ResourceType::ALL {
            let capacity = config.capacity_for(resource_type);
            pools.insert(
                resource_type,
                Arc::new(ResourcePool::new(resource_type, capacity, config.rate_limit_per_sec)?),
            );
        }
        Ok(Self {
            config,
            pools,
            quota: ResourceQuota::new(),
            deadlock: WaitForGraph::new(),
            outstanding: DashMap::new(),
            cancel: CancellationToken::new(),
            background: tokio::sync::Mutex::new(Vec::new()),
        })
    }

    /// Start every pool's token-bucket refiller and the load monitor.
    pub async fn start(&self) {
        for pool in self.pools.iter() {
            pool.value().start();
        }
        let mut handles = self.background.lock().await;
        handles.push(tokio::spawn(load_monitor_loop(
            self.pools.iter().map(|e| Arc::clone(e.value())).collect(),
            self.config.scale_up_threshold,
            self.config.scale_down_threshold,
            self.config.monitor_interval,
            self.cancel.clone(),
        )));
    }

    pub async fn set_quota(&self, agent_id: &str, resource_type: ResourceType, limit: u64) {
        self.quota.set_quota(agent_id, resource_type, limit).await;
    }

    fn pool(&self, resource_type: ResourceType) -> Arc<ResourcePool> {
        Arc::clone(&self.pools.get(&resource_type).expect("all resource types seeded in new()"))
    }

    /// Blocking acquire. Admission order: quota veto, deadlock check, token
    /// bucket, semaphore. A failure or cancellation at any step after the
    /// quota charge refunds the charge and clears any recorded wait edge.
    pub async fn acquire(
        &self,
        agent_id: &str,
        resource_type: ResourceType,
        amount: u64,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.quota.charge(agent_id, resource_type, amount).await?;

        if self.config.enable_deadlock_detection {
            if let Err(e) = self.deadlock.record_wait(agent_id, resource_type).await {
                self.quota.refund(agent_id, resource_type, amount).await;
                return Err(e);
            }
        }

        let pool = self.pool(resource_type);
        match pool.acquire(amount, cancel).await {
            Ok(()) => {
                if self.config.enable_deadlock_detection {
                    self.deadlock.record_acquired(agent_id, resource_type, amount).await;
                }
                *self
                    .outstanding
                    .entry((agent_id.to_string(), resource_type))
                    .or_insert(0) += amount;
                Ok(())
            }
            Err(e) => {
                self.quota.refund(agent_id, resource_type, amount).await;
                if self.config.enable_deadlock_detection {
                    self.deadlock.clear_wait(agent_id).await;
                }
                Err(e)
            }
        }
    }

    /// Non-blocking acquire. Never waits, so it never risks a deadlock and
    /// bypasses the wait-for graph entirely.
    pub async fn try_acquire(&self, agent_id: &str, resource_type: ResourceType, amount: u64) -> Result<bool> {
        self.quota.charge(agent_id, resource_type, amount).await?;

        let pool = self.pool(resource_type);
        if pool.try_acquire(amount).await {
            *self
                .outstanding
                .entry((agent_id.to_string(), resource_type))
                .or_insert(0) += amount;
            Ok(true)
        } else {
            self.quota.refund(agent_id, resource_type, amount).await;
            Ok(false)
        }
    }

    /// Release `amount` of `resource_type` previously acquired by `agent_id`.
    /// Errors with [`ToolkitError::ResourceNotAcquired`] if the agent has no
    /// such outstanding amount recorded.
    pub async fn release(&self, agent_id: &str, resource_type: ResourceType, amount: u64) -> Result<()> {
        let key = (agent_id.to_string(), resource_type);
        let mut entry = self
            .outstanding
            .get_mut(&key)
            .ok_or_else(|| ToolkitError::ResourceNotAcquired {
                agent_id: agent_id.to_string(),
                resource: resource_type,
            })?;
        if *entry < amount {
            return Err(ToolkitError::ResourceNotAcquired {
                agent_id: agent_id.to_string(),
                resource: resource_type,
            });
        }
        *entry -= amount;
        drop(entry);

        self.pool(resource_type).release(amount).await;
        self.quota.refund(agent_id, resource_type, amount).await;
        self.deadlock.record_released(agent_id, resource_type, amount).await;
        Ok(())
    }

    pub async fn stats(&self, resource_type: ResourceType) -> PoolStats {
        self.pool(resource_type).stats().await
    }

    pub async fn all_stats(&self) -> Vec<PoolStats> {
        let mut out = Vec::with_capacity(4);
        for resource_type in ResourceType::ALL {
            out.push(self.stats(resource_type).await);
        }
        out
    }

    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let handles = std::mem::take(&mut *self.background.lock().await);
        for handle in handles {
            let _ = handle.await;
        }
        for pool in self.pools.iter() {
            pool.value().shutdown();
        }
    }
}

async fn load_monitor_loop(
    pools: Vec<Arc<ResourcePool>>,
    scale_up: f64,
    scale_down: f64,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = cancel.cancelled() => return,
        }
        for pool in &pools {
            let capacity = pool.capacity().await;
            if capacity == 0 {
                continue;
            }
            let usage_pct = pool.current_allocated() as f64 / capacity as f64;
            let new_capacity = if usage_pct > scale_up {
                ((capacity as f64) * 1.5).round() as u64
            } else if usage_pct < scale_down {
                (((capacity as f64) * 0.8).round() as u64).max(1)
            } else {
                capacity
            };
            if new_capacity != capacity {
                if let Err(e) = pool.resize(new_capacity).await {
                    tracing::debug!(resource = ?pool.resource_type(), error = %e, "load monitor skipped resize");
                }
            }
        }
    }
}
