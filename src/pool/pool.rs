//! Bounded-concurrency priority worker pool.
//!
//! A single dispatcher task drains a bounded submission channel into a
//! priority heap, then hands the highest-priority job to an idle worker
//! through a small per-worker handoff channel. Each worker runs its own
//! tokio task and flips `Idle -> Busy -> Idle` (or `Failed` on error),
//! refreshing a heartbeat before and after execution. A background health
//! scanner flips workers whose heartbeat has gone stale while `Busy` to
//! `Failed`; the pool never kills or respawns workers.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU8, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, ToolkitError};
use crate::primitives::{Counter, MetricsRegistry, Timer};

use super::job::{Job, JobResult};
use super::priority_queue::PriorityQueue;

const DISPATCH_BACKOFF: Duration = Duration::from_millis(10);
const HEARTBEAT_GRACE: Duration = Duration::from_secs(2);

const MAX_WORKERS_CAP: usize = 1000;
const MAX_QUEUE_SIZE_CAP: usize = 100_000;

/// Configuration for a [`WorkerPool`].
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Number of worker tasks. Default 10, capped at 1000.
    pub max_workers: usize,
    /// Capacity of the bounded submission channel. Default 1000, capped at
    /// 100,000.
    pub queue_size: usize,
    /// A worker whose heartbeat is older than this while `Busy` is
    /// considered stalled. Default 5 minutes.
    pub worker_timeout: Duration,
    /// Interval between health scans. Default 30 seconds.
    pub health_check_interval: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            max_workers: 10,
            queue_size: 1000,
            worker_timeout: Duration::from_secs(5 * 60),
            health_check_interval: Duration::from_secs(30),
        }
    }
}

impl WorkerPoolConfig {
    fn validate(&self) -> Result<()> {
        if self.max_workers == 0 || self.max_workers > MAX_WORKERS_CAP {
            return Err(ToolkitError::InvalidCapacity {
                reason: format!(
                    "max_workers must be in 1..={MAX_WORKERS_CAP}, got {}",
                    self.max_workers
                ),
            });
        }
        if self.queue_size == 0 || self.queue_size > MAX_QUEUE_SIZE_CAP {
            return Err(ToolkitError::InvalidCapacity {
                reason: format!(
                    "queue_size must be in 1..={MAX_QUEUE_SIZE_CAP}, got {}",
                    self.queue_size
                ),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum WorkerState {
    Idle = 0,
    Busy = 1,
    Failed = 2,
}

impl From<u8> for WorkerState {
    fn from(v: u8) -> Self {
        match v {
            0 => WorkerState::Idle,
            1 => WorkerState::Busy,
            _ => WorkerState::Failed,
        }
    }
}

struct WorkerSlot {
    status: AtomicU8,
    heartbeat_ms: AtomicI64,
    jobs_processed: AtomicUsize,
    last_error: Mutex<Option<String>>,
    handoff_tx: mpsc::Sender<Box<dyn Job>>,
}

impl WorkerSlot {
    fn status(&self) -> WorkerState {
        WorkerState::from(self.status.load(Ordering::Acquire))
    }

    fn set_status(&self, state: WorkerState) {
        self.status.store(state as u8, Ordering::Release);
    }

    fn touch_heartbeat(&self) {
        self.heartbeat_ms.store(now_ms(), Ordering::Release);
    }

    fn heartbeat_age(&self) -> Duration {
        let last = self.heartbeat_ms.load(Ordering::Acquire);
        Duration::from_millis((now_ms() - last).max(0) as u64)
    }
}

/// Monotonic milliseconds since an arbitrary process-local epoch; used only
/// for heartbeat deltas, never persisted or compared across processes.
fn now_ms() -> i64 {
    static START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();
    let start = *START.get_or_init(Instant::now);
    Instant::now().duration_since(start).as_millis() as i64
}

/// Bounded-concurrency priority worker pool.
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    config: WorkerPoolConfig,
    submit_tx: mpsc::Sender<Box<dyn Job>>,
    submit_rx: Mutex<Option<mpsc::Receiver<Box<dyn Job>>>>,
    queue: Arc<PriorityQueue>,
    workers: Mutex<Arc<Vec<Arc<WorkerSlot>>>>,
    results_tx: Mutex<Option<mpsc::Sender<JobResult>>>,
    results_rx: Mutex<Option<mpsc::Receiver<JobResult>>>,
    cancel: CancellationToken,
    started: AtomicU8,
    shutdown: AtomicU8,
    metrics: MetricsRegistry,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
}

/// Stream-like handle over terminal job outcomes. Closes once the pool has
/// fully shut down and all workers have dropped their result sender.
pub struct ResultStream(mpsc::Receiver<JobResult>);

impl ResultStream {
    pub async fn next(&mut self) -> Option<JobResult> {
        self.0.recv().await
    }
}

impl WorkerPool {
    /// Construct a pool (does not start it — call [`WorkerPool::start`]).
    pub fn new(config: WorkerPoolConfig) -> Result<Self> {
        config.validate()?;

        let (submit_tx, submit_rx) = mpsc::channel(config.queue_size);
        let (results_tx, results_rx) = mpsc::channel(config.queue_size.max(16));

        Ok(Self {
            inner: Arc::new(PoolInner {
                config,
                submit_tx,
                submit_rx: Mutex::new(Some(submit_rx)),
                queue: Arc::new(PriorityQueue::new()),
                workers: Mutex::new(Arc::new(Vec::new())),
                results_tx: Mutex::new(Some(results_tx)),
                results_rx: Mutex::new(Some(results_rx)),
                cancel: CancellationToken::new(),
                started: AtomicU8::new(0),
                shutdown: AtomicU8::new(0),
                metrics: MetricsRegistry::new(),
                task_handles: Mutex::new(Vec::new()),
            }),
        })
    }

    /// Metrics registry for this pool: `jobs_submitted`/`jobs_completed`/
    /// `jobs_failed` counters and a `job_latency` timer.
    pub fn metrics(&self) -> &MetricsRegistry {
        &self.inner.metrics
    }

    /// Start the dispatcher, workers, and health scanner. Errors with
    /// [`ToolkitError::AlreadyStarted`] on a second call.
    pub async fn start(&self) -> Result<()> {
        if self
            .inner
            .started
            .compare_exchange(0, 1, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(ToolkitError::AlreadyStarted);
        }

        let submit_rx = self
            .inner
            .submit_rx
            .lock()
            .await
            .take()
            .expect("submit_rx present on first start");
        let results_tx = self
            .inner
            .results_tx
            .lock()
            .await
            .clone()
            .expect("results_tx present on first start");

        let mut handles = Vec::new();
        let mut slots = Vec::with_capacity(self.inner.config.max_workers);

        for _ in 0..self.inner.config.max_workers {
            let (handoff_tx, handoff_rx) = mpsc::channel::<Box<dyn Job>>(1);
            let slot = Arc::new(WorkerSlot {
                status: AtomicU8::new(WorkerState::Idle as u8),
                heartbeat_ms: AtomicI64::new(now_ms()),
                jobs_processed: AtomicUsize::new(0),
                last_error: Mutex::new(None),
                handoff_tx,
            });
            slots.push(Arc::clone(&slot));

            handles.push(tokio::spawn(worker_loop(
                slot,
                handoff_rx,
                self.inner.cancel.clone(),
                results_tx.clone(),
                self.inner.metrics.counter("jobs_completed"),
                self.inner.metrics.counter("jobs_failed"),
                self.inner.metrics.timer("job_latency"),
            )));
        }
        drop(results_tx);

        let workers = Arc::new(slots);
        *self.inner.workers.lock().await = Arc::clone(&workers);

        handles.push(tokio::spawn(dispatch_loop(
            submit_rx,
            Arc::clone(&workers),
            Arc::clone(&self.inner.queue),
            self.inner.cancel.clone(),
            self.inner.metrics.counter("jobs_submitted"),
        )));

        handles.push(tokio::spawn(health_loop(
            workers,
            self.inner.config.worker_timeout,
            self.inner.config.health_check_interval,
            self.inner.cancel.clone(),
        )));

        *self.inner.task_handles.lock().await = handles;
        Ok(())
    }

    /// Submit a job. Fails fast and synchronously: [`ToolkitError::Cancelled`]
    /// if `cancel` has already fired, [`ToolkitError::PoolShutDown`] after
    /// shutdown, [`ToolkitError::QueueFull`] if the inbound channel is
    /// saturated.
    pub fn submit(&self, job: Box<dyn Job>, cancel: &CancellationToken) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(ToolkitError::Cancelled);
        }
        if self.inner.shutdown.load(Ordering::Acquire) == 1 {
            return Err(ToolkitError::PoolShutDown);
        }
        match self.inner.submit_tx.try_send(job) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => Err(ToolkitError::QueueFull),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(ToolkitError::PoolShutDown),
        }
    }

    /// Take ownership of the result stream. Can only be called once; a
    /// second call returns `None`.
    pub async fn results(&self) -> Option<ResultStream> {
        self.inner.results_rx.lock().await.take().map(ResultStream)
    }

    /// Cancel all in-flight jobs, wait up to `deadline` for workers to exit,
    /// then drop the results sender so [`ResultStream::next`] observes `None`.
    pub async fn shutdown(&self, deadline: Duration) -> Result<()> {
        self.inner.shutdown.store(1, Ordering::Release);
        self.inner.cancel.cancel();
        self.inner.results_tx.lock().await.take();

        let handles = std::mem::take(&mut *self.inner.task_handles.lock().await);
        let join_all = futures::future::join_all(handles.into_iter().map(|h| async move {
            let _ = h.await;
        }));

        if tokio::time::timeout(deadline, join_all).await.is_err() {
            tracing::warn!("worker pool shutdown deadline elapsed before all tasks joined");
        }
        Ok(())
    }
}

async fn dispatch_loop(
    mut submit_rx: mpsc::Receiver<Box<dyn Job>>,
    workers: Arc<Vec<Arc<WorkerSlot>>>,
    queue: Arc<PriorityQueue>,
    cancel: CancellationToken,
    jobs_submitted: Arc<Counter>,
) {
    loop {
        loop {
            match submit_rx.try_recv() {
                Ok(job) => {
                    jobs_submitted.inc();
                    queue.push(job);
                }
                Err(_) => break,
            }
        }

        if let Some(job) = queue.pop() {
            let idle = workers.iter().find(|w| w.status() != WorkerState::Busy);
            match idle {
                Some(slot) => {
                    if let Err(mpsc::error::TrySendError::Full(job))
                    | Err(mpsc::error::TrySendError::Closed(job)) = slot.handoff_tx.try_send(job)
                    {
                        // Slot became busy between the check and the send;
                        // put the job back for the next pass.
                        queue.push(job);
                        tokio::select! {
                            _ = tokio::time::sleep(DISPATCH_BACKOFF) => {}
                            _ = cancel.cancelled() => return,
                        }
                    }
                }
                None => {
                    queue.push(job);
                    tokio::select! {
                        _ = tokio::time::sleep(DISPATCH_BACKOFF) => {}
                        _ = cancel.cancelled() => return,
                    }
                }
            }
        } else {
            tokio::select! {
                maybe = submit_rx.recv() => {
                    match maybe {
                        Some(job) => {
                            jobs_submitted.inc();
                            queue.push(job);
                        }
                        None => if queue.is_empty() { return },
                    }
                }
                _ = cancel.cancelled() => return,
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn worker_loop(
    slot: Arc<WorkerSlot>,
    mut handoff_rx: mpsc::Receiver<Box<dyn Job>>,
    cancel: CancellationToken,
    results_tx: mpsc::Sender<JobResult>,
    completed: Arc<Counter>,
    failed: Arc<Counter>,
    latency: Arc<Timer>,
) {
    slot.touch_heartbeat();
    loop {
        tokio::select! {
            maybe_job = handoff_rx.recv() => {
                let Some(job) = maybe_job else { break };
                slot.set_status(WorkerState::Busy);
                slot.touch_heartbeat();

                let started_at = Utc::now();
                let start = Instant::now();
                let outcome = job.execute(cancel.clone()).await;
                let duration = start.elapsed();
                let completed_at = Utc::now();

                slot.touch_heartbeat();
                slot.jobs_processed.fetch_add(1, Ordering::Relaxed);
                latency.observe(duration);

                match &outcome {
                    Ok(_) => {
                        completed.inc();
                        slot.set_status(WorkerState::Idle);
                    }
                    Err(e) => {
                        failed.inc();
                        *slot.last_error.lock().await = Some(e.clone());
                        slot.set_status(WorkerState::Failed);
                    }
                }

                let result = JobResult {
                    job_id: job.id(),
                    outcome,
                    started_at,
                    completed_at,
                    duration,
                };
                if results_tx.send(result).await.is_err() {
                    break;
                }
            }
            _ = cancel.cancelled() => break,
        }
    }
}

async fn health_loop(
    workers: Arc<Vec<Arc<WorkerSlot>>>,
    worker_timeout: Duration,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = cancel.cancelled() => return,
        }
        for slot in workers.iter() {
            if slot.status() == WorkerState::Busy
                && slot.heartbeat_age() > worker_timeout + HEARTBEAT_GRACE
            {
                slot.set_status(WorkerState::Failed);
                *slot.last_error.lock().await = Some("worker heartbeat timeout".into());
                tracing::warn!("worker flagged failed: heartbeat exceeded timeout");
            }
        }
    }
}
