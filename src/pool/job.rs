//! Job and job-result types. The pool never inspects job payloads beyond
//! `id()` and `priority()`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// A unit of work submitted to the [`super::WorkerPool`].
///
/// Priority is `i64`; larger runs earlier. Ties break on submission order.
#[async_trait]
pub trait Job: Send + Sync {
    /// Stable identity string for this job, used in [`JobResult`].
    fn id(&self) -> String;

    /// Scheduling priority; larger values are dequeued first.
    fn priority(&self) -> i64;

    /// Execute the job. Implementations should check `cancel` cooperatively
    /// during long-running work.
    async fn execute(&self, cancel: CancellationToken) -> Result<String, String>;
}

/// Terminal outcome of a single job, delivered exactly once via
/// [`super::WorkerPool::results`].
#[derive(Debug, Clone)]
pub struct JobResult {
    pub job_id: String,
    pub outcome: Result<String, String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration: Duration,
}
