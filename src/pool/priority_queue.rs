//! Max-heap over jobs, ordered strictly by priority (descending), ties broken
//! by insertion order (FIFO within a priority level).

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use super::job::Job;

struct Entry {
    job: Box<dyn Job>,
    priority: i64,
    seq: u64,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}
impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap: higher priority must compare Greater.
        // For equal priority, the earlier-inserted (smaller seq) entry must
        // compare Greater so it pops first (FIFO within a tier).
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Thread-safe priority queue; push/pop run in O(log n) under a single
/// mutex.
pub struct PriorityQueue {
    heap: Mutex<BinaryHeap<Entry>>,
    next_seq: AtomicU64,
}

impl PriorityQueue {
    pub fn new() -> Self {
        Self {
            heap: Mutex::new(BinaryHeap::new()),
            next_seq: AtomicU64::new(0),
        }
    }

    pub fn push(&self, job: Box<dyn Job>) {
        let priority = job.priority();
        let seq = self.next_seq.fetch_add(1, AtomicOrdering::Relaxed);
        self.heap.lock().unwrap().push(Entry { job, priority, seq });
    }

    /// Pop the highest-priority job, if any.
    pub fn pop(&self) -> Option<Box<dyn Job>> {
        self.heap.lock().unwrap().pop().map(|e| e.job)
    }

    pub fn len(&self) -> usize {
        self.heap.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for PriorityQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tokio_util::sync::CancellationToken;

    struct TestJob {
        id: String,
        priority: i64,
    }

    #[async_trait]
    impl Job for TestJob {
        fn id(&self) -> String {
            self.id.clone()
        }
        fn priority(&self) -> i64 {
            self.priority
        }
        async fn execute(&self, _cancel: CancellationToken) -> Result<String, String> {
            Ok(self.id.clone())
        }
    }

    fn job(id: &str, priority: i64) -> Box<dyn Job> {
        Box::new(TestJob { id: id.into(), priority })
    }

    #[test]
    fn pops_highest_priority_first() {
        let q = PriorityQueue::new();
        q.push(job("low", 1));
        q.push(job("high", 10));
        q.push(job("mid", 5));

        assert_eq!(q.pop().unwrap().id(), "high");
        assert_eq!(q.pop().unwrap().id(), "mid");
        assert_eq!(q.pop().unwrap().id(), "low");
        assert!(q.pop().is_none());
    }

    #[test]
    fn ties_break_fifo() {
        let q = PriorityQueue::new();
        q.push(job("first", 5));
        q.push(job("second", 5));
        q.push(job("third", 5));

        assert_eq!(q.pop().unwrap().id(), "first");
        assert_eq!(q.pop().unwrap().id(), "second");
        assert_eq!(q.pop().unwrap().id(), "third");
    }
}
