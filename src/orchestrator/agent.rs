//! A single managed agent: its control handle, lifecycle state, circuit
//! breaker, and load score.

use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::control::AgentControl;

use super::circuit_breaker::{CircuitBreaker, CircuitState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    Idle,
    Running,
    Paused,
    Failed,
    Stopped,
}

impl AgentState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Idle,
            1 => Self::Running,
            2 => Self::Paused,
            3 => Self::Failed,
            _ => Self::Stopped,
        }
    }
}

pub struct ManagedAgent {
    pub id: String,
    pub control: Arc<dyn AgentControl>,
    pub breaker: CircuitBreaker,
    state: AtomicU8,
    running_since_ms: AtomicU64,
    current_timeout_ms: AtomicU64,
    tasks_completed: AtomicU64,
    tasks_failed: AtomicU64,
    started_at: Instant,
}

impl ManagedAgent {
    pub fn new(id: impl Into<String>, control: Arc<dyn AgentControl>, breaker: CircuitBreaker) -> Self {
        Self {
            id: id.into(),
            control,
            breaker,
            state: AtomicU8::new(AgentState::Idle as u8),
            running_since_ms: AtomicU64::new(0),
            current_timeout_ms: AtomicU64::new(0),
            tasks_completed: AtomicU64::new(0),
            tasks_failed: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    pub fn state(&self) -> AgentState {
        AgentState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn set_state(&self, state: AgentState) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub fn begin_execution(&self, timeout: Duration) {
        self.running_since_ms.store(self.started_at.elapsed().as_millis() as u64, Ordering::Release);
        self.current_timeout_ms.store(timeout.as_millis() as u64, Ordering::Release);
        self.set_state(AgentState::Running);
    }

    pub fn record_completion(&self, success: bool) {
        if success {
            self.tasks_completed.fetch_add(1, Ordering::Relaxed);
            self.breaker.record_success();
        } else {
            self.tasks_failed.fetch_add(1, Ordering::Relaxed);
            self.breaker.record_failure();
        }
        self.current_timeout_ms.store(0, Ordering::Release);
        if self.state() == AgentState::Running {
            self.set_state(AgentState::Idle);
        }
    }

    pub fn tasks_completed(&self) -> u64 {
        self.tasks_completed.load(Ordering::Relaxed)
    }

    pub fn tasks_failed(&self) -> u64 {
        self.tasks_failed.load(Ordering::Relaxed)
    }

    pub fn is_eligible(&self) -> bool {
        matches!(self.state(), AgentState::Idle) && self.breaker.can_execute()
    }

    /// `base{state} + min(elapsed/timeout, 1) * 0.2`, forced to 1.0 when the
    /// breaker is Open, +0.3 when HalfOpen, clamped to `[0, 1]`.
    pub fn load_score(&self) -> f64 {
        let base = match self.state() {
            AgentState::Idle => 0.0,
            AgentState::Running => 0.8,
            AgentState::Paused => 0.5,
            AgentState::Failed => 1.0,
            AgentState::Stopped => 1.0,
        };

        let timeout_ms = self.current_timeout_ms.load(Ordering::Acquire);
        let mut score = base;
        if timeout_ms > 0 {
            let since_ms = self.running_since_ms.load(Ordering::Acquire);
            let elapsed_ms = (self.started_at.elapsed().as_millis() as u64).saturating_sub(since_ms);
            let fraction = (elapsed_ms as f64 / timeout_ms as f64).min(1.0);
            score += fraction * 0.2;
        }

        match self.breaker.state() {
            CircuitState::Open => score = 1.0,
            CircuitState::HalfOpen => score += 0.3,
            CircuitState::Closed => {}
        }

        score.clamp(0.0, 1.0)
    }
}
