//! Durable, dependency-aware, priority-tiered task queue.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, ToolkitError};
use crate::primitives::MetricsRegistry;

use super::backoff::{Backoff, ExponentialBackoff};
use super::persistence;
use super::resolver::DependencyResolver;
use super::task::{QueueTask, TaskFn, TaskPriority, TaskStatus};

const DEQUEUE_POLL: Duration = Duration::from_millis(100);
const DEFAULT_DEAD_LETTER_CAPACITY: usize = 1000;

/// Configuration for a [`TaskQueue`].
pub struct TaskQueueConfig {
    pub worker_count: usize,
    pub persistence_path: Option<PathBuf>,
    pub backoff: Arc<dyn Backoff>,
    pub execution_timeout: Duration,
    pub dead_letter_capacity: usize,
}

impl Default for TaskQueueConfig {
    fn default() -> Self {
        Self {
            worker_count: 4,
            persistence_path: None,
            backoff: Arc::new(ExponentialBackoff::default()),
            execution_timeout: Duration::from_secs(5 * 60),
            dead_letter_capacity: DEFAULT_DEAD_LETTER_CAPACITY,
        }
    }
}

struct Tiers {
    queues: [Mutex<VecDeque<String>>; 4],
}

impl Tiers {
    fn new() -> Self {
        Self { queues: [Mutex::new(VecDeque::new()), Mutex::new(VecDeque::new()), Mutex::new(VecDeque::new()), Mutex::new(VecDeque::new())] }
    }

    async fn push(&self, priority: TaskPriority, id: String) {
        self.queues[priority as usize].lock().await.push_back(id);
    }
}

struct QueueInner {
    config: TaskQueueConfig,
    tasks: DashMap<String, Arc<Mutex<QueueTask>>>,
    tiers: Tiers,
    unbound: Mutex<HashSet<String>>,
    resolver: Mutex<DependencyResolver>,
    registry: DashMap<String, Arc<dyn TaskFn>>,
    dead_letter: Mutex<VecDeque<QueueTask>>,
    notify: Notify,
    cancel: CancellationToken,
    started: AtomicU8,
    metrics: MetricsRegistry,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

/// Durable task queue: strict priority tiers (Critical first, FIFO within a
/// tier), dependency-gated readiness, pluggable retry backoff, and optional
/// JSON persistence.
#[derive(Clone)]
pub struct TaskQueue {
    inner: Arc<QueueInner>,
}

impl TaskQueue {
    pub fn new(config: TaskQueueConfig) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                config,
                tasks: DashMap::new(),
                tiers: Tiers::new(),
                unbound: Mutex::new(HashSet::new()),
                resolver: Mutex::new(DependencyResolver::new()),
                registry: DashMap::new(),
                dead_letter: Mutex::new(VecDeque::new()),
                notify: Notify::new(),
                cancel: CancellationToken::new(),
                started: AtomicU8::new(0),
                metrics: MetricsRegistry::new(),
                workers: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn metrics(&self) -> &MetricsRegistry {
        &self.inner.metrics
    }

    /// Load persisted tasks (if a path is configured) and spawn worker
    /// loops. Loaded tasks with no registered function stay present but
    /// non-executable until [`TaskQueue::register_task_func`] is called.
    pub async fn start(&self) -> Result<()> {
        if self
            .inner
            .started
            .compare_exchange(0, 1, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(ToolkitError::AlreadyStarted);
        }

        if let Some(path) = self.inner.config.persistence_path.clone() {
            let loaded = persistence::load(&path).await?;
            for task in loaded.into_values() {
                self.restore_task(task).await?;
            }
        }

        let mut handles = Vec::with_capacity(self.inner.config.worker_count);
        for _ in 0..self.inner.config.worker_count {
            let inner = Arc::clone(&self.inner);
            handles.push(tokio::spawn(async move { worker_loop(inner).await }));
        }
        *self.inner.workers.lock().await = handles;
        Ok(())
    }

    async fn restore_task(&self, task: QueueTask) -> Result<()> {
        let id = task.id.clone();
        self.inner.resolver.lock().await.add_task(&id, &task.dependencies)?;
        let ready = self.inner.resolver.lock().await.is_ready(&id);
        let priority = task.priority;
        self.inner.tasks.insert(id.clone(), Arc::new(Mutex::new(task)));
        if ready {
            self.make_ready(&id, priority).await;
        }
        Ok(())
    }

    /// Register `id`'s dependencies and priority tier placement. Rejects
    /// duplicate ids and dependency cycles. `exec` may be supplied later via
    /// [`TaskQueue::register_task_func`].
    pub async fn enqueue(&self, task: QueueTask, exec: Option<Arc<dyn TaskFn>>) -> Result<()> {
        if self.inner.tasks.contains_key(&task.id) {
            return Err(ToolkitError::DuplicateId { id: task.id });
        }
        self.inner.resolver.lock().await.add_task(&task.id, &task.dependencies)?;

        let id = task.id.clone();
        let priority = task.priority;
        let ready = self.inner.resolver.lock().await.is_ready(&id);
        self.inner.tasks.insert(id.clone(), Arc::new(Mutex::new(task)));

        if let Some(exec) = exec {
            self.inner.registry.insert(id.clone(), exec);
        }
        if ready {
            self.make_ready(&id, priority).await;
        }
        self.persist().await?;
        Ok(())
    }

    /// Bind (or rebind) the execution function for an already-enqueued task.
    /// If the task was ready but unbound, it is promoted into its tier.
    pub async fn register_task_func(&self, id: &str, exec: Arc<dyn TaskFn>) -> Result<()> {
        if !self.inner.tasks.contains_key(id) {
            return Err(ToolkitError::NotFound { what: "task", id: id.to_string() });
        }
        self.inner.registry.insert(id.to_string(), exec);
        if self.inner.unbound.lock().await.remove(id) {
            let priority = {
                let task_lock = self.inner.tasks.get(id).unwrap().clone();
                task_lock.lock().await.priority
            };
            self.inner.tiers.push(priority, id.to_string()).await;
            self.inner.notify.notify_waiters();
        }
        Ok(())
    }

    /// Ids left behind by a load whose execution function was never
    /// re-registered.
    pub async fn unbound_ids(&self) -> Vec<String> {
        self.inner.unbound.lock().await.iter().cloned().collect()
    }

    async fn make_ready(&self, id: &str, priority: TaskPriority) {
        if self.inner.registry.contains_key(id) {
            self.inner.tiers.push(priority, id.to_string()).await;
            self.inner.notify.notify_waiters();
        } else {
            self.inner.unbound.lock().await.insert(id.to_string());
        }
    }

    pub async fn status(&self, id: &str) -> Option<TaskStatus> {
        let entry = self.inner.tasks.get(id)?.clone();
        Some(entry.lock().await.status)
    }

    pub async fn all_tasks(&self) -> Vec<QueueTask> {
        let mut out = Vec::with_capacity(self.inner.tasks.len());
        for entry in self.inner.tasks.iter() {
            out.push(entry.value().lock().await.clone());
        }
        out
    }

    /// Drain and return every task currently in the dead-letter buffer.
    pub async fn drain_dead_letters(&self) -> Vec<QueueTask> {
        self.inner.dead_letter.lock().await.drain(..).collect()
    }

    async fn persist(&self) -> Result<()> {
        let Some(path) = self.inner.config.persistence_path.clone() else { return Ok(()) };
        let snapshot = self.all_tasks().await;
        let map: HashMap<String, QueueTask> = snapshot.into_iter().map(|t| (t.id.clone(), t)).collect();
        persistence::save(&path, &map).await
    }

    /// Cancel all worker loops and join them within `deadline`.
    pub async fn shutdown(&self, deadline: Duration) -> Result<()> {
        self.inner.cancel.cancel();
        let handles = std::mem::take(&mut *self.inner.workers.lock().await);
        let join_all = futures::future::join_all(handles.into_iter().map(|h| async move {
            let _ = h.await;
        }));
        if tokio::time::timeout(deadline, join_all).await.is_err() {
            tracing::warn!("task queue shutdown deadline elapsed before all workers joined");
        }
        Ok(())
    }
}

/// Pop the highest-priority ready, bound task id, skipping (and recording as
/// unbound) ready ids whose function was never registered.
async fn pop_ready(inner: &QueueInner) -> Option<String> {
    for priority in [TaskPriority::Critical, TaskPriority::High, TaskPriority::Normal, TaskPriority::Low] {
        let mut tier = inner.tiers.queues[priority as usize].lock().await;
        let len = tier.len();
        for _ in 0..len {
            let Some(id) = tier.pop_front() else { break };
            if inner.registry.contains_key(&id) {
                return Some(id);
            }
            inner.unbound.lock().await.insert(id);
        }
    }
    None
}

async fn worker_loop(inner: Arc<QueueInner>) {
    loop {
        let id = loop {
            if let Some(id) = pop_ready(&inner).await {
                break Some(id);
            }
            tokio::select! {
                _ = tokio::time::sleep(DEQUEUE_POLL) => {}
                _ = inner.notify.notified() => {}
                _ = inner.cancel.cancelled() => break None,
            }
        };
        let Some(id) = id else { return };

        let Some(task_lock) = inner.tasks.get(&id).map(|e| Arc::clone(e.value())) else { continue };
        {
            let mut task = task_lock.lock().await;
            task.status = TaskStatus::Running;
            task.started_at = Some(chrono::Utc::now());
        }

        let exec = inner.registry.get(&id).map(|e| Arc::clone(e.value()));
        let Some(exec) = exec else { continue };

        let outcome = tokio::time::timeout(inner.config.execution_timeout, exec.execute(inner.cancel.clone())).await;

        match outcome {
            Ok(Ok(())) => {
                {
                    let mut task = task_lock.lock().await;
                    task.status = TaskStatus::Completed;
                    task.completed_at = Some(chrono::Utc::now());
                }
                inner.metrics.counter("tasks_completed").inc();
                let newly_ready = inner.resolver.lock().await.complete(&id);
                for ready_id in newly_ready {
                    if let Some(entry) = inner.tasks.get(&ready_id) {
                        let p = entry.value().lock().await.priority;
                        drop(entry);
                        promote(&inner, &ready_id, p).await;
                    }
                }
            }
            Ok(Err(reason)) => {
                handle_failure(&inner, &id, task_lock, reason).await;
            }
            Err(_) => {
                handle_failure(&inner, &id, task_lock, format!("task {id} exceeded execution timeout")).await;
            }
        }

        inner.metrics.counter("tasks_dispatched").inc();
        let _ = persist_quietly(&inner).await;
    }
}

async fn promote(inner: &Arc<QueueInner>, id: &str, priority: TaskPriority) {
    if inner.registry.contains_key(id) {
        inner.tiers.push(priority, id.to_string()).await;
        inner.notify.notify_waiters();
    } else {
        inner.unbound.lock().await.insert(id.to_string());
    }
}

async fn handle_failure(inner: &Arc<QueueInner>, id: &str, task_lock: Arc<Mutex<QueueTask>>, reason: String) {
    let (retry_count, priority, exhausted_task) = {
        let mut task = task_lock.lock().await;
        task.retry_count += 1;
        task.last_error = reason;
        let exhausted = task.retry_count >= task.max_retries;
        if exhausted {
            task.status = TaskStatus::Failed;
            task.completed_at = Some(chrono::Utc::now());
        } else {
            task.status = TaskStatus::Retrying;
        }
        (task.retry_count, task.priority, if exhausted { Some(task.clone()) } else { None })
    };

    inner.metrics.counter("tasks_failed").inc();

    if let Some(task) = exhausted_task {
        let mut dead_letter = inner.dead_letter.lock().await;
        if dead_letter.len() >= inner.config.dead_letter_capacity {
            tracing::warn!(task_id = %id, "dead-letter buffer full, dropping exhausted task");
        } else {
            dead_letter.push_back(task);
        }
        return;
    }

    let delay = inner.config.backoff.delay(retry_count);
    let inner = Arc::clone(inner);
    let id = id.to_string();
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = inner.cancel.cancelled() => return,
        }
        if let Some(entry) = inner.tasks.get(&id) {
            let lock = Arc::clone(entry.value());
            drop(entry);
            let mut task = lock.lock().await;
            task.status = TaskStatus::Pending;
            drop(task);
            promote(&inner, &id, priority).await;
        }
    });
}

async fn persist_quietly(inner: &Arc<QueueInner>) -> Result<()> {
    let Some(path) = inner.config.persistence_path.clone() else { return Ok(()) };
    let mut map = HashMap::with_capacity(inner.tasks.len());
    for entry in inner.tasks.iter() {
        map.insert(entry.key().clone(), entry.value().lock().await.clone());
    }
    persistence::save(&path, &map).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;

    /// Records its own id into a shared order log and succeeds.
    struct RecordingFn {
        id: String,
        order: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl TaskFn for RecordingFn {
        async fn execute(&self, _cancel: CancellationToken) -> std::result::Result<(), String> {
            self.order.lock().await.push(self.id.clone());
            Ok(())
        }
    }

    /// Always fails, counting attempts.
    struct AlwaysFailFn {
        attempts: Arc<AtomicU32>,
    }

    #[async_trait]
    impl TaskFn for AlwaysFailFn {
        async fn execute(&self, _cancel: CancellationToken) -> std::result::Result<(), String> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err("boom".into())
        }
    }

    fn fast_backoff() -> Arc<dyn Backoff> {
        Arc::new(super::super::backoff::LinearBackoff { base: Duration::from_millis(5), max_delay: Duration::from_millis(5) })
    }

    #[tokio::test]
    async fn seed_scenario_dependency_chain_runs_in_order() {
        let queue = TaskQueue::new(TaskQueueConfig { worker_count: 2, ..Default::default() });
        let order = Arc::new(Mutex::new(Vec::new()));

        // Enqueued in order C, B, A, each depending on the previous letter.
        let c = QueueTask::new("C", TaskPriority::Normal, 1).depends_on(["B".to_string()]);
        let b = QueueTask::new("B", TaskPriority::Normal, 1).depends_on(["A".to_string()]);
        let a = QueueTask::new("A", TaskPriority::Normal, 1);

        queue.enqueue(c, Some(Arc::new(RecordingFn { id: "C".into(), order: order.clone() }))).await.unwrap();
        queue.enqueue(b, Some(Arc::new(RecordingFn { id: "B".into(), order: order.clone() }))).await.unwrap();
        queue.enqueue(a, Some(Arc::new(RecordingFn { id: "A".into(), order: order.clone() }))).await.unwrap();

        queue.start().await.unwrap();

        for _ in 0..100 {
            if order.lock().await.len() == 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert_eq!(*order.lock().await, vec!["A".to_string(), "B".to_string(), "C".to_string()]);
        queue.shutdown(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn priority_tiers_drain_critical_first_fifo_within_tier() {
        let queue = TaskQueue::new(TaskQueueConfig { worker_count: 1, ..Default::default() });
        let order = Arc::new(Mutex::new(Vec::new()));

        queue.enqueue(
            QueueTask::new("low-1", TaskPriority::Low, 1),
            Some(Arc::new(RecordingFn { id: "low-1".into(), order: order.clone() })),
        )
        .await
        .unwrap();
        queue.enqueue(
            QueueTask::new("low-2", TaskPriority::Low, 1),
            Some(Arc::new(RecordingFn { id: "low-2".into(), order: order.clone() })),
        )
        .await
        .unwrap();
        queue.enqueue(
            QueueTask::new("critical-1", TaskPriority::Critical, 1),
            Some(Arc::new(RecordingFn { id: "critical-1".into(), order: order.clone() })),
        )
        .await
        .unwrap();

        queue.start().await.unwrap();

        for _ in 0..100 {
            if order.lock().await.len() == 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert_eq!(*order.lock().await, vec!["critical-1".to_string(), "low-1".to_string(), "low-2".to_string()]);
        queue.shutdown(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn exhausted_retries_land_in_dead_letter() {
        let queue = TaskQueue::new(TaskQueueConfig { worker_count: 1, backoff: fast_backoff(), ..Default::default() });
        let attempts = Arc::new(AtomicU32::new(0));

        queue.enqueue(
            QueueTask::new("doomed", TaskPriority::Normal, 2),
            Some(Arc::new(AlwaysFailFn { attempts: attempts.clone() })),
        )
        .await
        .unwrap();

        queue.start().await.unwrap();

        let mut dead = Vec::new();
        for _ in 0..200 {
            dead = queue.drain_dead_letters().await;
            if !dead.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].id, "doomed");
        assert_eq!(dead[0].status, TaskStatus::Failed);
        assert_eq!(dead[0].retry_count, 2);
        assert!(attempts.load(Ordering::SeqCst) >= 2);

        queue.shutdown(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn dead_letter_overflow_drops_newly_exhausted_task() {
        let queue = TaskQueue::new(TaskQueueConfig {
            worker_count: 1,
            backoff: fast_backoff(),
            dead_letter_capacity: 1,
            ..Default::default()
        });

        queue.enqueue(
            QueueTask::new("first", TaskPriority::Normal, 1),
            Some(Arc::new(AlwaysFailFn { attempts: Arc::new(AtomicU32::new(0)) })),
        )
        .await
        .unwrap();
        queue.enqueue(
            QueueTask::new("second", TaskPriority::Normal, 1),
            Some(Arc::new(AlwaysFailFn { attempts: Arc::new(AtomicU32::new(0)) })),
        )
        .await
        .unwrap();

        queue.start().await.unwrap();

        // Both tasks exhaust after a single attempt each; give them time to
        // land (or fail to land) in the capacity-1 dead-letter buffer.
        tokio::time::sleep(Duration::from_millis(200)).await;

        let dead = queue.drain_dead_letters().await;
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].id, "first");

        queue.shutdown(Duration::from_secs(1)).await.unwrap();
    }
}
