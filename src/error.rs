//! Toolkit-wide error type.
//!
//! Every public API in this crate returns [`Result<T>`], backed by the single
//! [`ToolkitError`] enum. Each variant carries enough context for a caller to
//! decide how to handle the failure without inspecting opaque strings.

use uuid::Uuid;

/// Unified error type for the swarmkit concurrency toolkit.
#[derive(Debug, thiserror::Error)]
pub enum ToolkitError {
    // -- Capacity -------------------------------------------------------
    /// A bounded channel or queue is full and rejected the submission.
    #[error("queue is full")]
    QueueFull,

    /// A resource pool has no remaining capacity for the requested amount.
    #[error("resource exhausted: {resource:?} (requested {requested}, available {available})")]
    ResourceExhausted {
        resource: crate::resource::ResourceType,
        requested: u64,
        available: u64,
    },

    /// A capacity value supplied by the caller is not usable (zero, or would
    /// shrink a pool below its current allocation).
    #[error("invalid capacity: {reason}")]
    InvalidCapacity { reason: String },

    /// A token-bucket rate value supplied by the caller is not usable.
    #[error("invalid rate: {reason}")]
    InvalidRate { reason: String },

    // -- Authorization ----------------------------------------------------
    /// The requested amount would exceed the agent's quota for this resource
    /// type. The primitives were never touched.
    #[error("quota exceeded for agent {agent_id} on {resource:?}: limit {limit}, usage {usage}, requested {requested}")]
    QuotaExceeded {
        agent_id: String,
        resource: crate::resource::ResourceType,
        limit: u64,
        usage: u64,
        requested: u64,
    },

    /// `Release` was called for more than the agent currently has recorded
    /// as outstanding.
    #[error("resource not acquired: agent {agent_id} has no outstanding {resource:?} to release")]
    ResourceNotAcquired {
        agent_id: String,
        resource: crate::resource::ResourceType,
    },

    // -- State --------------------------------------------------------------
    /// The component has already been shut down and will not accept new
    /// work.
    #[error("pool is shut down")]
    PoolShutDown,

    /// `Start` was called on a component that is already running.
    #[error("already started")]
    AlreadyStarted,

    /// A registration used an id that already exists.
    #[error("duplicate id: {id}")]
    DuplicateId { id: String },

    /// A lookup by id found nothing.
    #[error("not found: {what} {id}")]
    NotFound { what: &'static str, id: String },

    /// The agent exists but cannot currently accept work.
    #[error("agent unhealthy: {agent_id}")]
    AgentUnhealthy { agent_id: String },

    /// No eligible agent could be found for a dispatch.
    #[error("no agents available for task {task_id}")]
    NoAgentsAvailable { task_id: Uuid },

    // -- Correctness ----------------------------------------------------
    /// Registering a task would introduce a cycle in the dependency graph.
    #[error("circular dependency detected introducing task {task_id}")]
    CircularDependency { task_id: String },

    /// The resource manager's wait-for graph detected a cycle.
    #[error("deadlock detected: agent {agent_id} waiting on {resource:?}")]
    DeadlockDetected {
        agent_id: String,
        resource: crate::resource::ResourceType,
    },

    // -- Execution --------------------------------------------------------
    /// A job's `execute` function returned an error.
    #[error("job {job_id} failed: {reason}")]
    JobFailed { job_id: String, reason: String },

    /// A task exceeded its bounded execution timeout.
    #[error("task {task_id} timed out after {elapsed_ms}ms")]
    TaskTimeout { task_id: String, elapsed_ms: u64 },

    /// A task exhausted its retry budget.
    #[error("task {task_id} exceeded max retries ({max_retries})")]
    TaskMaxRetriesExceeded { task_id: String, max_retries: u32 },

    // -- Cancellation -------------------------------------------------------
    /// The caller's cancellation token fired before the operation completed.
    #[error("operation cancelled")]
    Cancelled,

    // -- Persistence --------------------------------------------------------
    /// Reading or writing the task-queue persistence file failed.
    #[error("persistence io error: {0}")]
    Io(#[from] std::io::Error),

    /// The persisted task-queue document failed to (de)serialize.
    #[error("persistence serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // -- Shutdown aggregation -----------------------------------------------
    /// Shutdown completed but one or more sub-components reported errors.
    #[error("shutdown reported {0} error(s): {1:?}")]
    ShutdownAggregate(usize, Vec<String>),

    // -- Generic --------------------------------------------------------
    /// Catch-all for unexpected internal errors. Prefer a typed variant
    /// whenever possible.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, ToolkitError>;
