//! Rolling sample window used for trend analysis and percentile estimates.

use std::sync::Mutex;

/// A fixed-size window of the `N` most recent samples, oldest first.
pub struct RollingWindow<T> {
    capacity: usize,
    samples: Mutex<Vec<T>>,
}

impl<T: Clone> RollingWindow<T> {
    /// Create a window retaining at most `capacity` samples.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            samples: Mutex::new(Vec::with_capacity(capacity.max(1))),
        }
    }

    /// Record a new sample, dropping the oldest if at capacity.
    pub fn record(&self, value: T) {
        let mut samples = self.samples.lock().unwrap();
        if samples.len() >= self.capacity {
            samples.remove(0);
        }
        samples.push(value);
    }

    /// Snapshot samples oldest-first.
    pub fn samples(&self) -> Vec<T> {
        self.samples.lock().unwrap().clone()
    }

    /// Number of samples currently retained.
    pub fn len(&self) -> usize {
        self.samples.lock().unwrap().len()
    }

    /// Whether no samples have been recorded yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caps_at_capacity_oldest_first() {
        let window: RollingWindow<u32> = RollingWindow::new(3);
        for i in 1..=5 {
            window.record(i);
        }
        assert_eq!(window.samples(), vec![3, 4, 5]);
    }

    #[test]
    fn starts_empty() {
        let window: RollingWindow<u32> = RollingWindow::new(3);
        assert!(window.is_empty());
    }
}
