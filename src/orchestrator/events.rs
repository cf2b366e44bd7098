//! Orchestrator lifecycle events, delivered on a bounded drop-on-full channel.

use uuid::Uuid;

#[derive(Debug, Clone)]
pub enum OrchestratorEvent {
    AgentAdded { agent_id: String },
    AgentRemoved { agent_id: String },
    AgentPaused { agent_id: String },
    AgentResumed { agent_id: String },
    TaskCompleted { task_id: Uuid, agent_id: String, success: bool },
    HealthCheckFailed { agent_id: String },
    AgentRecovered { agent_id: String },
}
