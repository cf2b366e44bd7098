//! Agent orchestrator: registry of managed agents, dispatch policy, health
//! checks, and recovery.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::control::AgentControl;
use crate::error::{Result, ToolkitError};
use crate::primitives::{CountingSemaphore, MetricsRegistry};

use super::agent::{AgentState, ManagedAgent};
use super::circuit_breaker::CircuitBreaker;
use super::dispatch::{self, DispatchPolicy, RoundRobinCursor};
use super::events::OrchestratorEvent;
use super::task::{OrchestratorTask, TaskOutcome};

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub max_concurrent_tasks: usize,
    pub health_check_interval: Duration,
    pub task_queue_size: usize,
    pub event_buffer_size: usize,
    pub enable_auto_recovery: bool,
    pub dispatch_policy: DispatchPolicy,
    pub circuit_breaker_max_failures: u32,
    pub circuit_breaker_reset_timeout: Duration,
    pub circuit_breaker_half_open_tests: u32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 10,
            health_check_interval: Duration::from_secs(30),
            task_queue_size: 100,
            event_buffer_size: 100,
            enable_auto_recovery: true,
            dispatch_policy: DispatchPolicy::RoundRobin,
            circuit_breaker_max_failures: 5,
            circuit_breaker_reset_timeout: Duration::from_secs(30),
            circuit_breaker_half_open_tests: 2,
        }
    }
}

struct PendingTask {
    task: OrchestratorTask,
    reply: oneshot::Sender<TaskOutcome>,
}

struct Inner {
    config: OrchestratorConfig,
    agents: DashMap<String, Arc<ManagedAgent>>,
    order: Mutex<Vec<String>>,
    cursor: RoundRobinCursor,
    inbound_tx: mpsc::Sender<PendingTask>,
    inbound_rx: Mutex<Option<mpsc::Receiver<PendingTask>>>,
    events_tx: mpsc::Sender<OrchestratorEvent>,
    events_rx: Mutex<Option<mpsc::Receiver<OrchestratorEvent>>>,
    dispatch_slots: CountingSemaphore,
    cancel: CancellationToken,
    metrics: MetricsRegistry,
    background: Mutex<Vec<JoinHandle<()>>>,
}

#[derive(Clone)]
pub struct AgentOrchestrator {
    inner: Arc<Inner>,
}

impl AgentOrchestrator {
    pub fn new(config: OrchestratorConfig) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(config.task_queue_size.max(1));
        let (events_tx, events_rx) = mpsc::channel(config.event_buffer_size.max(1));
        let dispatch_slots = CountingSemaphore::new(config.max_concurrent_tasks.max(1) as u64);
        Self {
            inner: Arc::new(Inner {
                config,
                agents: DashMap::new(),
                order: Mutex::new(Vec::new()),
                cursor: RoundRobinCursor::new(),
                inbound_tx,
                inbound_rx: Mutex::new(Some(inbound_rx)),
                events_tx,
                events_rx: Mutex::new(Some(events_rx)),
                dispatch_slots,
                cancel: CancellationToken::new(),
                metrics: MetricsRegistry::new(),
                background: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn metrics(&self) -> &MetricsRegistry {
        &self.inner.metrics
    }

    fn publish(&self, event: OrchestratorEvent) {
        let _ = self.inner.events_tx.try_send(event);
    }

    /// Take ownership of the lifecycle event stream. Callable once.
    pub async fn take_events(&self) -> Option<mpsc::Receiver<OrchestratorEvent>> {
        self.inner.events_rx.lock().await.take()
    }

    pub async fn add_agent(&self, id: impl Into<String>, control: Arc<dyn AgentControl>) -> Result<()> {
        let id = id.into();
        if self.inner.agents.contains_key(&id) {
            return Err(ToolkitError::DuplicateId { id });
        }
        let breaker = CircuitBreaker::new(
            self.inner.config.circuit_breaker_max_failures,
            self.inner.config.circuit_breaker_reset_timeout,
            self.inner.config.circuit_breaker_half_open_tests,
        );
        let agent = Arc::new(ManagedAgent::new(id.clone(), control, breaker));
        self.inner.agents.insert(id.clone(), agent);
        self.inner.order.lock().await.push(id.clone());
        self.publish(OrchestratorEvent::AgentAdded { agent_id: id });
        Ok(())
    }

    pub async fn remove_agent(&self, id: &str) -> Result<()> {
        if self.inner.agents.remove(id).is_none() {
            return Err(ToolkitError::NotFound { what: "agent", id: id.to_string() });
        }
        self.inner.order.lock().await.retain(|a| a != id);
        self.publish(OrchestratorEvent::AgentRemoved { agent_id: id.to_string() });
        Ok(())
    }

    pub async fn pause_agent(&self, id: &str) -> Result<()> {
        let agent = self.get_agent(id)?;
        agent.control.pause().await?;
        agent.set_state(AgentState::Paused);
        self.publish(OrchestratorEvent::AgentPaused { agent_id: id.to_string() });
        Ok(())
    }

    pub async fn resume_agent(&self, id: &str) -> Result<()> {
        let agent = self.get_agent(id)?;
        agent.control.resume().await?;
        agent.set_state(AgentState::Idle);
        self.publish(OrchestratorEvent::AgentResumed { agent_id: id.to_string() });
        Ok(())
    }

    fn get_agent(&self, id: &str) -> Result<Arc<ManagedAgent>> {
        self.inner.agents.get(id).map(|e| Arc::clone(e.value())).ok_or_else(|| ToolkitError::NotFound { what: "agent", id: id.to_string() })
    }

    pub fn agent_state(&self, id: &str) -> Option<AgentState> {
        self.inner.agents.get(id).map(|e| e.value().state())
    }

    /// Enqueue a task for dispatch. Returns a receiver that resolves once
    /// the task has been routed to an agent and completed (or failed with
    /// no eligible agent).
    pub async fn distribute_task(&self, task: OrchestratorTask) -> Result<oneshot::Receiver<TaskOutcome>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.inner
            .inbound_tx
            .try_send(PendingTask { task, reply: reply_tx })
            .map_err(|_| ToolkitError::QueueFull)?;
        Ok(reply_rx)
    }

    pub async fn start(&self) -> Result<()> {
        let inbound_rx = self.inner.inbound_rx.lock().await.take().ok_or(ToolkitError::AlreadyStarted)?;
        let inner = Arc::clone(&self.inner);
        let dispatch_handle = tokio::spawn(dispatch_loop(inner, inbound_rx));

        let inner = Arc::clone(&self.inner);
        let health_handle = tokio::spawn(health_loop(inner));

        let mut handles = vec![dispatch_handle, health_handle];
        if self.inner.config.enable_auto_recovery {
            let inner = Arc::clone(&self.inner);
            handles.push(tokio::spawn(recovery_loop(inner)));
        }
        *self.inner.background.lock().await = handles;
        Ok(())
    }

    pub async fn shutdown(&self, deadline: Duration) -> Result<()> {
        self.inner.cancel.cancel();
        let handles = std::mem::take(&mut *self.inner.background.lock().await);
        let join_all = futures::future::join_all(handles.into_iter().map(|h| async move {
            let _ = h.await;
        }));
        if tokio::time::timeout(deadline, join_all).await.is_err() {
            tracing::warn!("orchestrator shutdown deadline elapsed before all loops joined");
        }

        let mut errors = Vec::new();
        for entry in self.inner.agents.iter() {
            if let Err(e) = entry.value().control.kill().await {
                errors.push(format!("{}: {e}", entry.key()));
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            let count = errors.len();
            Err(ToolkitError::ShutdownAggregate(count, errors))
        }
    }
}

async fn dispatch_loop(inner: Arc<Inner>, mut inbound_rx: mpsc::Receiver<PendingTask>) {
    loop {
        let pending = tokio::select! {
            p = inbound_rx.recv() => p,
            _ = inner.cancel.cancelled() => None,
        };
        let Some(pending) = pending else { return };

        let agent = select_for(&inner, &pending.task).await;
        let Some(agent) = agent else {
            inner.metrics.counter("tasks_no_agent_available").inc();
            let _ = pending.reply.send(TaskOutcome { task_id: pending.task.id, agent_id: None, success: false, output: String::new() });
            continue;
        };

        if inner.dispatch_slots.acquire(1, &inner.cancel).await.is_err() {
            let _ = pending.reply.send(TaskOutcome { task_id: pending.task.id, agent_id: Some(agent.id.clone()), success: false, output: String::new() });
            continue;
        }

        inner.metrics.counter("tasks_dispatched").inc();
        let inner2 = Arc::clone(&inner);
        tokio::spawn(async move {
            run_task(inner2, agent, pending).await;
        });
    }
}

async fn select_for(inner: &Arc<Inner>, task: &OrchestratorTask) -> Option<Arc<ManagedAgent>> {
    if !task.affinity.is_empty() {
        for candidate_id in &task.affinity {
            if let Some(entry) = inner.agents.get(candidate_id) {
                if entry.value().is_eligible() {
                    return Some(Arc::clone(entry.value()));
                }
            }
        }
        return None;
    }

    let order = inner.order.lock().await;
    let agents: Vec<Arc<ManagedAgent>> = order.iter().filter_map(|id| inner.agents.get(id).map(|e| Arc::clone(e.value()))).collect();
    drop(order);
    let eligible: Vec<&ManagedAgent> = agents.iter().map(Arc::as_ref).filter(|a| a.is_eligible()).collect();
    dispatch::select(&eligible, inner.config.dispatch_policy, &inner.cursor).map(|a| {
        let id = a.id.clone();
        agents.into_iter().find(|a| a.id == id).unwrap()
    })
}

async fn run_task(inner: Arc<Inner>, agent: Arc<ManagedAgent>, pending: PendingTask) {
    let started = std::time::Instant::now();
    agent.begin_execution(pending.task.timeout);
    let outcome = tokio::time::timeout(pending.task.timeout, agent.control.send_prompt(&pending.task.prompt)).await;
    let success = matches!(outcome, Ok(Ok(())));
    agent.record_completion(success);
    inner.dispatch_slots.release(1).await;

    inner.metrics.timer("task_duration").observe(started.elapsed());
    if success {
        inner.metrics.counter("tasks_completed").inc();
    } else {
        inner.metrics.counter("tasks_failed").inc();
    }

    let output = match &outcome {
        Ok(Ok(())) => "ok".to_string(),
        Ok(Err(e)) => e.to_string(),
        Err(_) => "timed out".to_string(),
    };

    let _ = inner.events_tx.try_send(OrchestratorEvent::TaskCompleted { task_id: pending.task.id, agent_id: agent.id.clone(), success });
    let _ = pending.reply.send(TaskOutcome { task_id: pending.task.id, agent_id: Some(agent.id.clone()), success, output });
}

async fn health_loop(inner: Arc<Inner>) {
    let mut ticker = tokio::time::interval(inner.config.health_check_interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = inner.cancel.cancelled() => return,
        }
        let ids: Vec<String> = inner.order.lock().await.clone();
        for id in ids {
            let Some(agent) = inner.agents.get(&id).map(|e| Arc::clone(e.value())) else { continue };
            if !agent.control.is_alive().await {
                agent.set_state(AgentState::Failed);
                let _ = inner.events_tx.try_send(OrchestratorEvent::HealthCheckFailed { agent_id: id });
            }
        }
    }
}

async fn recovery_loop(inner: Arc<Inner>) {
    let mut ticker = tokio::time::interval(inner.config.health_check_interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = inner.cancel.cancelled() => return,
        }
        let ids: Vec<String> = inner.order.lock().await.clone();
        for id in ids {
            let Some(agent) = inner.agents.get(&id).map(|e| Arc::clone(e.value())) else { continue };
            if agent.state() != AgentState::Failed {
                continue;
            }
            if !agent.breaker.can_execute() {
                continue;
            }
            if agent.control.is_alive().await {
                agent.set_state(AgentState::Idle);
                let _ = inner.events_tx.try_send(OrchestratorEvent::AgentRecovered { agent_id: id });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::mock::MockAgentControl;
    use std::sync::atomic::Ordering;

    #[tokio::test]
    async fn duplicate_agent_id_rejected() {
        let orch = AgentOrchestrator::new(OrchestratorConfig::default());
        orch.add_agent("a1", Arc::new(MockAgentControl::default())).await.unwrap();
        let result = orch.add_agent("a1", Arc::new(MockAgentControl::default())).await;
        assert!(matches!(result, Err(ToolkitError::DuplicateId { .. })));
    }

    #[tokio::test]
    async fn distribute_task_round_robin() {
        let orch = AgentOrchestrator::new(OrchestratorConfig { dispatch_policy: DispatchPolicy::RoundRobin, ..Default::default() });
        orch.add_agent("a1", Arc::new(MockAgentControl::default())).await.unwrap();
        orch.add_agent("a2", Arc::new(MockAgentControl::default())).await.unwrap();
        orch.start().await.unwrap();

        let rx1 = orch.distribute_task(OrchestratorTask::new("hello", Duration::from_secs(1))).await.unwrap();
        let outcome1 = rx1.await.unwrap();
        assert!(outcome1.success);

        orch.shutdown(Duration::from_secs(1)).await.ok();
    }

    #[tokio::test]
    async fn no_eligible_agent_fails_without_requeue() {
        let orch = AgentOrchestrator::new(OrchestratorConfig::default());
        orch.start().await.unwrap();
        let rx = orch.distribute_task(OrchestratorTask::new("hello", Duration::from_secs(1))).await.unwrap();
        let outcome = rx.await.unwrap();
        assert!(!outcome.success);
        assert!(outcome.agent_id.is_none());
        orch.shutdown(Duration::from_secs(1)).await.ok();
    }

    #[tokio::test]
    async fn affinity_is_tried_before_fallback_policy() {
        let orch = AgentOrchestrator::new(OrchestratorConfig::default());
        orch.add_agent("a1", Arc::new(MockAgentControl::default())).await.unwrap();
        orch.add_agent("a2", Arc::new(MockAgentControl::default())).await.unwrap();
        orch.start().await.unwrap();

        let rx = orch
            .distribute_task(OrchestratorTask::new("hello", Duration::from_secs(1)).with_affinity(["a2".to_string()]))
            .await
            .unwrap();
        let outcome = rx.await.unwrap();
        assert_eq!(outcome.agent_id.as_deref(), Some("a2"));
        orch.shutdown(Duration::from_secs(1)).await.ok();
    }

    #[tokio::test]
    async fn health_check_failure_marks_agent_failed() {
        let orch = AgentOrchestrator::new(OrchestratorConfig { health_check_interval: Duration::from_millis(20), ..Default::default() });
        let control = Arc::new(MockAgentControl::default());
        control.alive.store(false, Ordering::Release);
        orch.add_agent("a1", control).await.unwrap();
        orch.start().await.unwrap();

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(orch.agent_state("a1"), Some(AgentState::Failed));
        orch.shutdown(Duration::from_secs(1)).await.ok();
    }
}
