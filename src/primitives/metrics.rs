//! Lock-free-ish metric primitives and a registry that exports snapshots as
//! tagged JSON or Prometheus text exposition format.
//!
//! Counters and gauges are plain atomics. Histograms/timers keep running
//! min/max/sum/count via CAS loops (no lock on the hot path) and retain a
//! bounded reservoir of recent samples under a mutex purely for percentile
//! estimation at snapshot time — the percentile computation is never on a
//! caller's hot path.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Mutex;

use serde::Serialize;

const RESERVOIR_CAPACITY: usize = 1000;

/// Monotonically increasing counter.
#[derive(Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// A value that can move up or down.
#[derive(Default)]
pub struct Gauge {
    value: AtomicI64,
}

impl Gauge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, v: i64) {
        self.value.store(v, Ordering::Relaxed);
    }

    pub fn add(&self, delta: i64) {
        self.value.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn get(&self) -> i64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Running min/max/sum/count plus a bounded sample reservoir for
/// percentiles. Used both for ad-hoc histograms (e.g. queue depth) and for
/// timers (duration in microseconds).
pub struct Histogram {
    count: AtomicU64,
    sum: AtomicU64,
    min: AtomicU64,
    max: AtomicU64,
    reservoir: Mutex<Vec<u64>>,
}

impl Default for Histogram {
    fn default() -> Self {
        Self {
            count: AtomicU64::new(0),
            sum: AtomicU64::new(0),
            min: AtomicU64::new(u64::MAX),
            max: AtomicU64::new(0),
            reservoir: Mutex::new(Vec::with_capacity(RESERVOIR_CAPACITY)),
        }
    }
}

impl Histogram {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a sample (e.g. a duration in microseconds, or any count).
    pub fn observe(&self, value: u64) {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum.fetch_add(value, Ordering::Relaxed);
        cas_min(&self.min, value);
        cas_max(&self.max, value);

        let mut reservoir = self.reservoir.lock().unwrap();
        if reservoir.len() >= RESERVOIR_CAPACITY {
            reservoir.remove(0);
        }
        reservoir.push(value);
    }

    pub fn snapshot(&self) -> HistogramSnapshot {
        let count = self.count.load(Ordering::Relaxed);
        let sum = self.sum.load(Ordering::Relaxed);
        let min = self.min.load(Ordering::Relaxed);
        let max = self.max.load(Ordering::Relaxed);
        let mean = if count == 0 { 0.0 } else { sum as f64 / count as f64 };

        let mut sorted = self.reservoir.lock().unwrap().clone();
        sorted.sort_unstable();
        let p50 = percentile(&sorted, 0.50);
        let p95 = percentile(&sorted, 0.95);
        let p99 = percentile(&sorted, 0.99);

        HistogramSnapshot {
            count,
            sum,
            mean,
            min: if count == 0 { 0 } else { min },
            max,
            p50,
            p95,
            p99,
        }
    }
}

fn cas_min(cell: &AtomicU64, value: u64) {
    let mut current = cell.load(Ordering::Relaxed);
    while value < current {
        match cell.compare_exchange_weak(current, value, Ordering::Relaxed, Ordering::Relaxed) {
            Ok(_) => break,
            Err(observed) => current = observed,
        }
    }
}

fn cas_max(cell: &AtomicU64, value: u64) {
    let mut current = cell.load(Ordering::Relaxed);
    while value > current {
        match cell.compare_exchange_weak(current, value, Ordering::Relaxed, Ordering::Relaxed) {
            Ok(_) => break,
            Err(observed) => current = observed,
        }
    }
}

fn percentile(sorted: &[u64], p: f64) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let rank = ((sorted.len() as f64 - 1.0) * p).round() as usize;
    sorted[rank.min(sorted.len() - 1)]
}

/// A point-in-time snapshot of a [`Histogram`] or timer.
#[derive(Debug, Clone, Serialize)]
pub struct HistogramSnapshot {
    pub count: u64,
    pub sum: u64,
    pub mean: f64,
    pub min: u64,
    pub max: u64,
    pub p50: u64,
    pub p95: u64,
    pub p99: u64,
}

/// A duration-valued histogram; records in microseconds.
#[derive(Default)]
pub struct Timer {
    inner: Histogram,
}

impl Timer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&self, duration: std::time::Duration) {
        self.inner.observe(duration.as_micros() as u64);
    }

    pub fn snapshot(&self) -> HistogramSnapshot {
        self.inner.snapshot()
    }
}

/// Central registry of named metrics, exportable as JSON or Prometheus text.
#[derive(Default)]
pub struct MetricsRegistry {
    counters: dashmap::DashMap<String, std::sync::Arc<Counter>>,
    gauges: dashmap::DashMap<String, std::sync::Arc<Gauge>>,
    histograms: dashmap::DashMap<String, std::sync::Arc<Histogram>>,
    timers: dashmap::DashMap<String, std::sync::Arc<Timer>>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counter(&self, name: &str) -> std::sync::Arc<Counter> {
        self.counters
            .entry(name.to_string())
            .or_insert_with(|| std::sync::Arc::new(Counter::new()))
            .clone()
    }

    pub fn gauge(&self, name: &str) -> std::sync::Arc<Gauge> {
        self.gauges
            .entry(name.to_string())
            .or_insert_with(|| std::sync::Arc::new(Gauge::new()))
            .clone()
    }

    pub fn histogram(&self, name: &str) -> std::sync::Arc<Histogram> {
        self.histograms
            .entry(name.to_string())
            .or_insert_with(|| std::sync::Arc::new(Histogram::new()))
            .clone()
    }

    pub fn timer(&self, name: &str) -> std::sync::Arc<Timer> {
        self.timers
            .entry(name.to_string())
            .or_insert_with(|| std::sync::Arc::new(Timer::new()))
            .clone()
    }

    /// Snapshot every registered metric as a tagged JSON document.
    pub fn snapshot_json(&self) -> serde_json::Value {
        let counters: HashMap<String, u64> = self
            .counters
            .iter()
            .map(|e| (e.key().clone(), e.value().get()))
            .collect();
        let gauges: HashMap<String, i64> = self
            .gauges
            .iter()
            .map(|e| (e.key().clone(), e.value().get()))
            .collect();
        let histograms: HashMap<String, HistogramSnapshot> = self
            .histograms
            .iter()
            .map(|e| (e.key().clone(), e.value().snapshot()))
            .collect();
        let timers: HashMap<String, HistogramSnapshot> = self
            .timers
            .iter()
            .map(|e| (e.key().clone(), e.value().snapshot()))
            .collect();

        serde_json::json!({
            "counters": counters,
            "gauges": gauges,
            "histograms": histograms,
            "timers": timers,
        })
    }

    /// Render every registered metric in Prometheus text exposition format.
    pub fn snapshot_prometheus(&self) -> String {
        let mut out = String::new();
        for e in self.counters.iter() {
            out.push_str(&format!("# TYPE {} counter\n{} {}\n", e.key(), e.key(), e.value().get()));
        }
        for e in self.gauges.iter() {
            out.push_str(&format!("# TYPE {} gauge\n{} {}\n", e.key(), e.key(), e.value().get()));
        }
        for e in self.histograms.iter().chain(std::iter::empty()) {
            let snap = e.value().snapshot();
            write_histogram_lines(&mut out, e.key(), &snap);
        }
        for e in self.timers.iter() {
            let snap = e.value().snapshot();
            write_histogram_lines(&mut out, e.key(), &snap);
        }
        out
    }
}

fn write_histogram_lines(out: &mut String, name: &str, snap: &HistogramSnapshot) {
    out.push_str(&format!("# TYPE {name} summary\n"));
    out.push_str(&format!("{name}_count {}\n", snap.count));
    out.push_str(&format!("{name}_sum {}\n", snap.sum));
    out.push_str(&format!("{name}{{quantile=\"0.5\"}} {}\n", snap.p50));
    out.push_str(&format!("{name}{{quantile=\"0.95\"}} {}\n", snap.p95));
    out.push_str(&format!("{name}{{quantile=\"0.99\"}} {}\n", snap.p99));
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn counter_set_and_get() {
        let gauge = Gauge::new();
        gauge.set(42);
        assert_eq!(gauge.get(), 42);
    }

    #[tokio::test]
    async fn counter_concurrent_increments() {
        let counter = Arc::new(Counter::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let c = Arc::clone(&counter);
            handles.push(tokio::spawn(async move {
                for _ in 0..1000 {
                    c.inc();
                }
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(counter.get(), 8000);
    }

    #[test]
    fn histogram_tracks_min_max_mean() {
        let hist = Histogram::new();
        for v in [10, 20, 30, 40, 50] {
            hist.observe(v);
        }
        let snap = hist.snapshot();
        assert_eq!(snap.count, 5);
        assert_eq!(snap.min, 10);
        assert_eq!(snap.max, 50);
        assert_eq!(snap.mean, 30.0);
        assert_eq!(snap.p50, 30);
    }

    #[test]
    fn registry_snapshot_json_contains_sections() {
        let registry = MetricsRegistry::new();
        registry.counter("jobs_submitted").inc();
        registry.gauge("workers_active").set(3);
        registry.timer("job_latency").observe(std::time::Duration::from_millis(5));

        let json = registry.snapshot_json();
        assert_eq!(json["counters"]["jobs_submitted"], 1);
        assert_eq!(json["gauges"]["workers_active"], 3);
        assert!(json["timers"]["job_latency"]["count"].as_u64().unwrap() >= 1);
    }

    #[test]
    fn registry_snapshot_prometheus_format() {
        let registry = MetricsRegistry::new();
        registry.counter("requests").add(5);
        let text = registry.snapshot_prometheus();
        assert!(text.contains("requests 5"));
    }
}
