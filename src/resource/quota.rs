//! Per-agent, per-resource-type quota bookkeeping. The quota never grants or
//! withholds a physical resource; it only vetoes acquisitions that would
//! push an agent's usage past its configured limit.

use std::collections::HashMap;

use tokio::sync::Mutex;

use crate::error::{Result, ToolkitError};

use super::ResourceType;

#[derive(Default)]
struct State {
    limits: HashMap<(String, ResourceType), u64>,
    usage: HashMap<(String, ResourceType), u64>,
}

/// `quota[agent][type]` hard limits plus `usage[agent][type]` live counters.
pub struct ResourceQuota {
    state: Mutex<State>,
}

impl ResourceQuota {
    pub fn new() -> Self {
        Self { state: Mutex::new(State::default()) }
    }

    /// Set (or replace) the hard limit for `agent_id`/`resource_type`.
    pub async fn set_quota(&self, agent_id: &str, resource_type: ResourceType, limit: u64) {
        self.state
            .lock()
            .await
            .limits
            .insert((agent_id.to_string(), resource_type), limit);
    }

    /// Current usage for `agent_id`/`resource_type` (0 if never charged).
    pub async fn usage(&self, agent_id: &str, resource_type: ResourceType) -> u64 {
        let state = self.state.lock().await;
        *state
            .usage
            .get(&(agent_id.to_string(), resource_type))
            .unwrap_or(&0)
    }

    /// Configured limit, if any has been set.
    pub async fn limit(&self, agent_id: &str, resource_type: ResourceType) -> Option<u64> {
        let state = self.state.lock().await;
        state.limits.get(&(agent_id.to_string(), resource_type)).copied()
    }

    /// Check and, on success, charge `amount` against the agent's quota.
    /// An agent with no configured limit for this type is unrestricted.
    pub async fn charge(&self, agent_id: &str, resource_type: ResourceType, amount: u64) -> Result<()> {
        let mut state = self.state.lock().await;
        let key = (agent_id.to_string(), resource_type);
        let limit = state.limits.get(&key).copied();
        let current = *state.usage.get(&key).unwrap_or(&0);

        if let Some(limit) = limit {
            if current + amount > limit {
                return Err(ToolkitError::QuotaExceeded {
                    agent_id: agent_id.to_string(),
                    resource: resource_type,
                    limit,
                    usage: current,
                    requested: amount,
                });
            }
        }

        *state.usage.entry(key).or_insert(0) += amount;
        Ok(())
    }

    /// Refund `amount` previously charged to `agent_id`/`resource_type`.
    pub async fn refund(&self, agent_id: &str, resource_type: ResourceType, amount: u64) {
        let mut state = self.state.lock().await;
        let key = (agent_id.to_string(), resource_type);
        if let Some(current) = state.usage.get_mut(&key) {
            *current = current.saturating_sub(amount);
        }
    }
}

impl Default for ResourceQuota {
    fn default() -> Self {
        Self::new()
    }
}
