//! Durable, priority-tiered, dependency-aware task queue.

mod backoff;
mod persistence;
mod queue;
mod resolver;
mod task;

pub use backoff::{Backoff, ExponentialBackoff, LinearBackoff};
pub use queue::{TaskQueue, TaskQueueConfig};
pub use task::{QueueTask, TaskFn, TaskPriority, TaskStatus};
