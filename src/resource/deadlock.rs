//! Wait-for graph deadlock detector.
//!
//! `waiting[a]` is the set of agents `a` is currently blocked on (direct
//! edges); `holders[type][a]` is how much of `type` agent `a` currently has
//! acquired. `record_wait` adds an edge from the waiter to every other
//! current holder of the requested type, then runs a DFS to check whether
//! that new edge closes a cycle back on the waiter. On a cycle the edges are
//! rolled back and the acquisition must not proceed.

use std::collections::{HashMap, HashSet};

use tokio::sync::Mutex;

use crate::error::{Result, ToolkitError};

use super::ResourceType;

#[derive(Default)]
struct State {
    waiting: HashMap<String, HashSet<String>>,
    holders: HashMap<ResourceType, HashMap<String, u64>>,
}

/// Directed wait-for graph used to detect circular resource waits.
pub struct WaitForGraph {
    state: Mutex<State>,
}

impl WaitForGraph {
    pub fn new() -> Self {
        Self { state: Mutex::new(State::default()) }
    }

    /// Record that `waiter` is about to block waiting for `resource_type`.
    /// Adds an edge from `waiter` to every current holder of that type
    /// (excluding itself) and checks for a cycle. On a cycle, the edges are
    /// rolled back and [`ToolkitError::DeadlockDetected`] is returned; the
    /// caller must not attempt the acquisition.
    pub async fn record_wait(&self, waiter: &str, resource_type: ResourceType) -> Result<()> {
        let mut state = self.state.lock().await;

        let holder_ids: Vec<String> = state
            .holders
            .get(&resource_type)
            .map(|m| m.keys().filter(|id| id.as_str() != waiter).cloned().collect())
            .unwrap_or_default();

        let entry = state.waiting.entry(waiter.to_string()).or_default();
        let added: Vec<String> = holder_ids
            .into_iter()
            .filter(|id| entry.insert(id.clone()))
            .collect();

        if has_cycle(&state.waiting, waiter) {
            let entry = state.waiting.get_mut(waiter).unwrap();
            for id in &added {
                entry.remove(id);
            }
            if entry.is_empty() {
                state.waiting.remove(waiter);
            }
            return Err(ToolkitError::DeadlockDetected {
                agent_id: waiter.to_string(),
                resource: resource_type,
            });
        }

        Ok(())
    }

    /// Called once an acquisition succeeds: clears the waiter's outgoing
    /// edges and records it as a holder of `amount` of `resource_type`.
    pub async fn record_acquired(&self, agent_id: &str, resource_type: ResourceType, amount: u64) {
        let mut state = self.state.lock().await;
        state.waiting.remove(agent_id);
        *state
            .holders
            .entry(resource_type)
            .or_default()
            .entry(agent_id.to_string())
            .or_insert(0) += amount;
    }

    /// Called on release: decrements the agent's held amount, removing the
    /// entry once it reaches zero.
    pub async fn record_released(&self, agent_id: &str, resource_type: ResourceType, amount: u64) {
        let mut state = self.state.lock().await;
        if let Some(holders) = state.holders.get_mut(&resource_type) {
            if let Some(held) = holders.get_mut(agent_id) {
                *held = held.saturating_sub(amount);
                if *held == 0 {
                    holders.remove(agent_id);
                }
            }
        }
    }

    /// Drop a waiter's outgoing edges without recording it as a holder, used
    /// when an acquisition attempt fails or is cancelled after `record_wait`.
    pub async fn clear_wait(&self, agent_id: &str) {
        self.state.lock().await.waiting.remove(agent_id);
    }
}

impl Default for WaitForGraph {
    fn default() -> Self {
        Self::new()
    }
}

fn has_cycle(waiting: &HashMap<String, HashSet<String>>, start: &str) -> bool {
    let mut visited = HashSet::new();
    let mut stack = vec![start.to_string()];
    while let Some(node) = stack.pop() {
        let Some(neighbors) = waiting.get(&node) else { continue };
        for next in neighbors {
            if next == start {
                return true;
            }
            if visited.insert(next.clone()) {
                stack.push(next.clone());
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn no_cycle_when_no_holders() {
        let graph = WaitForGraph::new();
        assert!(graph.record_wait("a", ResourceType::Cpu).await.is_ok());
    }

    #[tokio::test]
    async fn detects_direct_cycle() {
        let graph = WaitForGraph::new();
        graph.record_acquired("a", ResourceType::Cpu, 1).await;
        // b waits on a (a holds Cpu)
        graph.record_wait("b", ResourceType::Cpu).await.unwrap();
        graph.record_acquired("b", ResourceType::Memory, 1).await;
        // a now tries to wait on Memory, held by b -> cycle a->b->a
        let result = graph.record_wait("a", ResourceType::Memory).await;
        assert!(matches!(result, Err(ToolkitError::DeadlockDetected { .. })));
    }

    #[tokio::test]
    async fn release_clears_holder_entry() {
        let graph = WaitForGraph::new();
        graph.record_acquired("a", ResourceType::Cpu, 5).await;
        graph.record_released("a", ResourceType::Cpu, 5).await;
        // a no longer holds Cpu, so b waiting on it introduces no edges.
        assert!(graph.record_wait("b", ResourceType::Cpu).await.is_ok());
    }
}
