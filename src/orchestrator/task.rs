//! Orchestrator-level task envelope and dispatch result.

use std::time::Duration;

use uuid::Uuid;

/// A unit of work dispatched to a managed agent.
pub struct OrchestratorTask {
    pub id: Uuid,
    pub prompt: String,
    /// Agent ids tried, in order, before falling back to the configured policy.
    pub affinity: Vec<String>,
    pub timeout: Duration,
}

impl OrchestratorTask {
    pub fn new(prompt: impl Into<String>, timeout: Duration) -> Self {
        Self { id: Uuid::now_v7(), prompt: prompt.into(), affinity: Vec::new(), timeout }
    }

    pub fn with_affinity(mut self, agent_ids: impl IntoIterator<Item = String>) -> Self {
        self.affinity.extend(agent_ids);
        self
    }
}

#[derive(Debug, Clone)]
pub struct TaskOutcome {
    pub task_id: Uuid,
    pub agent_id: Option<String>,
    pub success: bool,
    pub output: String,
}
