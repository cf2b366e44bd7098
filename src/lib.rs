//! Swarmkit: an embeddable concurrency toolkit for coordinating pools of
//! long-running agent subprocesses.
//!
//! This crate provides six cooperating subsystems:
//!
//! - **[`pool`]** -- Priority worker pool: a bounded set of workers draining
//!   a max-heap job queue, ties broken by submission order.
//! - **[`queue`]** -- Durable, dependency-aware task queue with strict
//!   priority tiers, pluggable retry backoff, and atomic JSON persistence.
//! - **[`orchestrator`]** -- Agent registry with affinity-first dispatch,
//!   per-agent circuit breakers, health checks, and recovery.
//! - **[`resource`]** -- Quota, rate-limit, and capacity admission for named
//!   resource types, with wait-for-graph deadlock detection.
//! - **[`bus`]** -- Topic-matched publish/subscribe event bus with
//!   per-subscription backpressure policies and history replay.
//! - **[`health`]** -- Scheduled component health probes, worst-of
//!   aggregation, trend analysis, and throttled alerting.
//!
//! [`control::AgentControl`] is the capability interface every orchestrated
//! agent backend implements. All public types are `Send + Sync` and designed
//! for use within a multi-threaded tokio runtime.

pub mod bus;
pub mod control;
pub mod error;
pub mod health;
pub mod orchestrator;
pub mod pool;
pub mod primitives;
pub mod queue;
pub mod resource;

pub use control::AgentControl;
pub use error::{Result, ToolkitError};

pub use bus::{BackpressurePolicy, Event, EventBus, EventBusConfig, EventHandler, SubscriptionOptions};
pub use health::{HealthCheck, HealthMonitor, HealthMonitorConfig, HealthStatus};
pub use orchestrator::{AgentOrchestrator, DispatchPolicy, OrchestratorConfig, OrchestratorTask};
pub use pool::{Job, JobResult, WorkerPool, WorkerPoolConfig};
pub use queue::{QueueTask, TaskFn, TaskPriority, TaskQueue, TaskQueueConfig, TaskStatus};
pub use resource::{ResourceManager, ResourceManagerConfig, ResourceType};
