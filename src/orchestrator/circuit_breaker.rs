//! Per-agent circuit breaker: Closed/Open/HalfOpen with consecutive-failure
//! tripping and a timed half-open probe window.

use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

struct State {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    opened_at: Option<Instant>,
}

pub struct CircuitBreaker {
    max_failures: u32,
    reset_timeout: Duration,
    half_open_tests: u32,
    state: Mutex<State>,
}

impl CircuitBreaker {
    pub fn new(max_failures: u32, reset_timeout: Duration, half_open_tests: u32) -> Self {
        Self {
            max_failures: max_failures.max(1),
            reset_timeout,
            half_open_tests: half_open_tests.max(1),
            state: Mutex::new(State { state: CircuitState::Closed, consecutive_failures: 0, consecutive_successes: 0, opened_at: None }),
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state.lock().unwrap().state
    }

    /// Whether a call is currently admitted. In `Open`, transitions to
    /// `HalfOpen` once `reset_timeout` has elapsed since tripping.
    pub fn can_execute(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        match state.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let elapsed = state.opened_at.map(|t| t.elapsed()).unwrap_or_default();
                if elapsed >= self.reset_timeout {
                    state.state = CircuitState::HalfOpen;
                    state.consecutive_successes = 0;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Explicit transition matching the spec's `TransitionToHalfOpen`
    /// probe, used by callers that want to force the check independent of
    /// `can_execute`'s side effect.
    pub fn transition_to_half_open(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        if state.state != CircuitState::Open {
            return false;
        }
        let elapsed = state.opened_at.map(|t| t.elapsed()).unwrap_or_default();
        if elapsed >= self.reset_timeout {
            state.state = CircuitState::HalfOpen;
            state.consecutive_successes = 0;
            true
        } else {
            false
        }
    }

    pub fn record_success(&self) {
        let mut state = self.state.lock().unwrap();
        state.consecutive_failures = 0;
        match state.state {
            CircuitState::Closed => {}
            CircuitState::HalfOpen => {
                state.consecutive_successes += 1;
                if state.consecutive_successes >= self.half_open_tests {
                    state.state = CircuitState::Closed;
                    state.consecutive_successes = 0;
                    state.opened_at = None;
                }
            }
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        let mut state = self.state.lock().unwrap();
        match state.state {
            CircuitState::HalfOpen => {
                state.state = CircuitState::Open;
                state.opened_at = Some(Instant::now());
                state.consecutive_failures = 0;
                state.consecutive_successes = 0;
            }
            CircuitState::Closed => {
                state.consecutive_failures += 1;
                if state.consecutive_failures >= self.max_failures {
                    state.state = CircuitState::Open;
                    state.opened_at = Some(Instant::now());
                    state.consecutive_failures = 0;
                }
            }
            CircuitState::Open => {}
        }
    }
}
