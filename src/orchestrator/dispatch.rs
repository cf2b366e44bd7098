//! Agent selection: affinity first, then a configurable fallback policy.

use std::sync::atomic::{AtomicUsize, Ordering};

use rand::seq::SliceRandom;

use super::agent::ManagedAgent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchPolicy {
    RoundRobin,
    LeastLoaded,
    Random,
}

/// Rotating cursor for round-robin selection, shared across dispatch calls.
pub struct RoundRobinCursor {
    next: AtomicUsize,
}

impl RoundRobinCursor {
    pub fn new() -> Self {
        Self { next: AtomicUsize::new(0) }
    }

    fn advance(&self, len: usize) -> usize {
        self.next.fetch_add(1, Ordering::Relaxed) % len.max(1)
    }
}

impl Default for RoundRobinCursor {
    fn default() -> Self {
        Self::new()
    }
}

/// Select among `candidates` (already filtered to eligible agents, in
/// registry insertion order) per `policy`.
pub fn select<'a>(candidates: &'a [&'a ManagedAgent], policy: DispatchPolicy, cursor: &RoundRobinCursor) -> Option<&'a ManagedAgent> {
    if candidates.is_empty() {
        return None;
    }
    match policy {
        DispatchPolicy::RoundRobin => {
            let start = cursor.advance(candidates.len());
            Some(candidates[start % candidates.len()])
        }
        DispatchPolicy::LeastLoaded => candidates
            .iter()
            .enumerate()
            .min_by(|(ia, a), (ib, b)| a.load_score().partial_cmp(&b.load_score()).unwrap_or(std::cmp::Ordering::Equal).then(ia.cmp(ib)))
            .map(|(_, agent)| *agent),
        DispatchPolicy::Random => candidates.choose(&mut rand::thread_rng()).copied(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::mock::MockAgentControl;
    use crate::orchestrator::circuit_breaker::CircuitBreaker;
    use std::sync::Arc;
    use std::time::Duration;

    fn agent(id: &str) -> ManagedAgent {
        ManagedAgent::new(id, Arc::new(MockAgentControl::default()), CircuitBreaker::new(3, Duration::from_millis(100), 2))
    }

    #[test]
    fn round_robin_rotates() {
        let a = agent("a");
        let b = agent("b");
        let candidates = vec![&a, &b];
        let cursor = RoundRobinCursor::new();
        let first = select(&candidates, DispatchPolicy::RoundRobin, &cursor).unwrap().id.clone();
        let second = select(&candidates, DispatchPolicy::RoundRobin, &cursor).unwrap().id.clone();
        assert_ne!(first, second);
    }

    #[test]
    fn least_loaded_breaks_ties_by_insertion_order() {
        let a = agent("a");
        let b = agent("b");
        let candidates = vec![&a, &b];
        let cursor = RoundRobinCursor::new();
        let chosen = select(&candidates, DispatchPolicy::LeastLoaded, &cursor).unwrap();
        assert_eq!(chosen.id, "a");
    }

    #[test]
    fn least_loaded_picks_lower_score() {
        let a = agent("a");
        let b = agent("b");
        b.set_state(super::super::agent::AgentState::Paused);
        let candidates = vec![&a, &b];
        let cursor = RoundRobinCursor::new();
        let chosen = select(&candidates, DispatchPolicy::LeastLoaded, &cursor).unwrap();
        assert_eq!(chosen.id, "a");
    }

    #[test]
    fn empty_candidates_select_none() {
        let candidates: Vec<&ManagedAgent> = Vec::new();
        let cursor = RoundRobinCursor::new();
        assert!(select(&candidates, DispatchPolicy::Random, &cursor).is_none());
    }
}
