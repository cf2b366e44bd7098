//! Topic-based event bus with per-subscription backpressure, bounded
//! history, and replay.

mod event;
mod subscription;
mod topic;

pub use event::Event;
pub use subscription::{BackpressurePolicy, EventHandler, SubscriptionOptions};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, ToolkitError};
use crate::primitives::CircularBuffer;

use subscription::Subscription;

/// Configuration for an [`EventBus`].
#[derive(Debug, Clone)]
pub struct EventBusConfig {
    pub history_size: usize,
    pub dead_timeout: Duration,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self { history_size: 1000, dead_timeout: Duration::from_secs(30) }
    }
}

/// A snapshot of one subscription's counters, for introspection/metrics.
#[derive(Debug, Clone)]
pub struct SubscriptionStats {
    pub subscriber_id: String,
    pub delivered: u64,
    pub dropped: u64,
    pub last_active: DateTime<Utc>,
}

struct BusInner {
    config: EventBusConfig,
    history: CircularBuffer<Arc<Event>>,
    subscriptions: DashMap<String, Arc<Subscription>>,
    next_event_id: AtomicU64,
    cancel: CancellationToken,
    sweep_handle: Mutex<Option<JoinHandle<()>>>,
}

/// Topic-based pub/sub bus with bounded event history and replay.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    pub fn new(config: EventBusConfig) -> Self {
        Self {
            inner: Arc::new(BusInner {
                history: CircularBuffer::new(config.history_size),
                subscriptions: DashMap::new(),
                next_event_id: AtomicU64::new(1),
                cancel: CancellationToken::new(),
                sweep_handle: Mutex::new(None),
                config,
            }),
        }
    }

    /// Start the dead-subscriber sweep, ticking every `dead_timeout / 2`.
    pub async fn start(&self) {
        let inner = Arc::clone(&self.inner);
        let interval = (inner.config.dead_timeout / 2).max(Duration::from_millis(1));
        let handle = tokio::spawn(sweep_loop(Arc::clone(&inner), interval));
        *self.inner.sweep_handle.lock().await = Some(handle);
    }

    /// Register a subscription. Errors with [`ToolkitError::DuplicateId`] if
    /// `subscriber_id` is already registered.
    pub fn subscribe(
        &self,
        subscriber_id: impl Into<String>,
        handler: Arc<dyn EventHandler>,
        options: SubscriptionOptions,
    ) -> Result<()> {
        let subscriber_id = subscriber_id.into();
        if self.inner.subscriptions.contains_key(&subscriber_id) {
            return Err(ToolkitError::DuplicateId { id: subscriber_id });
        }
        let sub = Subscription::new(options, &self.inner.cancel);
        sub.start_pump(handler);
        self.inner.subscriptions.insert(subscriber_id, sub);
        Ok(())
    }

    /// Unsubscribe and wait for its pump to exit.
    pub async fn unsubscribe(&self, subscriber_id: &str) -> Result<()> {
        let (_, sub) = self
            .inner
            .subscriptions
            .remove(subscriber_id)
            .ok_or_else(|| ToolkitError::NotFound { what: "subscription", id: subscriber_id.to_string() })?;
        sub.shutdown().await;
        Ok(())
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscriptions.len()
    }

    /// Assign id/timestamp if absent, append to history, then deliver to
    /// every matching subscription per its backpressure policy.
    pub async fn publish(&self, mut event: Event) -> Result<()> {
        if event.id.is_none() {
            event.id = Some(self.inner.next_event_id.fetch_add(1, Ordering::Relaxed));
        }
        if event.timestamp.is_none() {
            event.timestamp = Some(Utc::now());
        }
        let event = Arc::new(event);
        self.inner.history.push(Arc::clone(&event));

        for entry in self.inner.subscriptions.iter() {
            let sub = entry.value();
            if sub.admits(&event) {
                sub.deliver(Arc::clone(&event)).await?;
            }
        }
        Ok(())
    }

    /// Replay all buffered history matching `filter` (if given) through a
    /// subscription's normal admission path.
    pub async fn replay(&self, subscriber_id: &str, filter: Option<&dyn Fn(&Event) -> bool>) -> Result<()> {
        self.replay_since(subscriber_id, None, filter).await
    }

    /// Replay buffered history at or after `since` (or all history if
    /// `None`) matching `filter`, through a subscription's normal admission
    /// path.
    pub async fn replay_since(
        &self,
        subscriber_id: &str,
        since: Option<DateTime<Utc>>,
        filter: Option<&dyn Fn(&Event) -> bool>,
    ) -> Result<()> {
        let sub = self
            .inner
            .subscriptions
            .get(subscriber_id)
            .ok_or_else(|| ToolkitError::NotFound { what: "subscription", id: subscriber_id.to_string() })?
            .clone();

        for event in self.inner.history.snapshot() {
            if let Some(since) = since {
                if event.timestamp.map(|t| t < since).unwrap_or(false) {
                    continue;
                }
            }
            if !sub.admits(&event) {
                continue;
            }
            if let Some(filter) = filter {
                if !filter(&event) {
                    continue;
                }
            }
            sub.deliver(Arc::clone(&event)).await?;
        }
        Ok(())
    }

    pub fn stats(&self, subscriber_id: &str) -> Option<SubscriptionStats> {
        self.inner.subscriptions.get(subscriber_id).map(|sub| SubscriptionStats {
            subscriber_id: subscriber_id.to_string(),
            delivered: sub.delivered.load(Ordering::Relaxed),
            dropped: sub.dropped.load(Ordering::Relaxed),
            last_active: DateTime::from_timestamp_millis(sub.last_active_ms()).unwrap_or_else(Utc::now),
        })
    }

    /// Cancel the root context, close every subscription, and wait (bounded
    /// by `deadline`) for pumps and the sweep loop to drain.
    pub async fn shutdown(&self, deadline: Duration) {
        self.inner.cancel.cancel();

        let subs: Vec<Arc<Subscription>> =
            self.inner.subscriptions.iter().map(|e| Arc::clone(e.value())).collect();
        self.inner.subscriptions.clear();

        let drain = async {
            for sub in subs {
                sub.shutdown().await;
            }
            if let Some(handle) = self.inner.sweep_handle.lock().await.take() {
                let _ = handle.await;
            }
        };
        if tokio::time::timeout(deadline, drain).await.is_err() {
            tracing::warn!("event bus shutdown deadline elapsed before all pumps drained");
        }
    }
}

async fn sweep_loop(inner: Arc<BusInner>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    let dead_timeout_ms = inner.config.dead_timeout.as_millis() as i64;
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = inner.cancel.cancelled() => return,
        }
        let now = Utc::now().timestamp_millis();
        let dead: Vec<String> = inner
            .subscriptions
            .iter()
            .filter(|e| now - e.value().last_active_ms() > dead_timeout_ms)
            .map(|e| e.key().clone())
            .collect();
        for id in dead {
            if let Some((_, sub)) = inner.subscriptions.remove(&id) {
                sub.shutdown().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    struct CountingHandler {
        count: Arc<AtomicUsize>,
        notify: Arc<Notify>,
        sleep: Duration,
    }

    #[async_trait::async_trait]
    impl EventHandler for CountingHandler {
        async fn on_event(&self, _event: Arc<Event>) {
            if !self.sleep.is_zero() {
                tokio::time::sleep(self.sleep).await;
            }
            self.count.fetch_add(1, Ordering::SeqCst);
            self.notify.notify_waiters();
        }
    }

    fn event(event_type: &str) -> Event {
        Event::new(event_type, serde_json::json!({}), "test")
    }

    #[tokio::test]
    async fn seed_scenario_wildcard_delivery() {
        let bus = EventBus::new(EventBusConfig::default());
        let count = Arc::new(AtomicUsize::new(0));
        let notify = Arc::new(Notify::new());
        let handler = Arc::new(CountingHandler { count: Arc::clone(&count), notify: Arc::clone(&notify), sleep: Duration::ZERO });

        let mut options = SubscriptionOptions::new(vec!["user.*".into(), "order.*.created".into()]);
        options.backpressure = BackpressurePolicy::Block;
        bus.subscribe("sub1", handler, options).unwrap();

        for t in ["user.login", "user.logout", "order.123.created", "order.123.updated", "product.view"] {
            bus.publish(event(t)).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn duplicate_subscriber_id_rejected() {
        let bus = EventBus::new(EventBusConfig::default());
        let handler = Arc::new(CountingHandler {
            count: Arc::new(AtomicUsize::new(0)),
            notify: Arc::new(Notify::new()),
            sleep: Duration::ZERO,
        });
        bus.subscribe("dup", handler.clone(), SubscriptionOptions::new(vec!["a".into()])).unwrap();
        let result = bus.subscribe("dup", handler, SubscriptionOptions::new(vec!["a".into()]));
        assert!(matches!(result, Err(ToolkitError::DuplicateId { .. })));
    }

    #[tokio::test]
    async fn block_policy_applies_backpressure_to_publisher() {
        let bus = EventBus::new(EventBusConfig::default());
        let count = Arc::new(AtomicUsize::new(0));
        let handler = Arc::new(CountingHandler {
            count: Arc::clone(&count),
            notify: Arc::new(Notify::new()),
            sleep: Duration::from_millis(50),
        });
        let mut options = SubscriptionOptions::new(vec!["topic".into()]);
        options.backpressure = BackpressurePolicy::Block;
        options.buffer_capacity = 2;
        bus.subscribe("blocker", handler, options).unwrap();

        let start = std::time::Instant::now();
        for _ in 0..10 {
            bus.publish(event("topic")).await.unwrap();
        }
        // Last event admitted; its handler may still be running.
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(count.load(Ordering::SeqCst), 10);
        assert!(start.elapsed() >= Duration::from_millis(400));
    }

    #[tokio::test]
    async fn drop_policy_never_blocks_publisher() {
        let bus = EventBus::new(EventBusConfig::default());
        let handler = Arc::new(CountingHandler {
            count: Arc::new(AtomicUsize::new(0)),
            notify: Arc::new(Notify::new()),
            sleep: Duration::from_millis(50),
        });
        let mut options = SubscriptionOptions::new(vec!["topic".into()]);
        options.backpressure = BackpressurePolicy::Drop;
        options.buffer_capacity = 2;
        bus.subscribe("dropper", handler, options).unwrap();

        let start = std::time::Instant::now();
        for _ in 0..10 {
            bus.publish(event("topic")).await.unwrap();
        }
        assert!(start.elapsed() < Duration::from_millis(100));

        let stats = bus.stats("dropper").unwrap();
        assert_eq!(stats.delivered + stats.dropped, 10);
        assert!(stats.dropped >= 1);
    }

    #[tokio::test]
    async fn replay_delivers_matching_history() {
        let bus = EventBus::new(EventBusConfig::default());
        bus.publish(event("order.created")).await.unwrap();
        bus.publish(event("order.updated")).await.unwrap();

        let count = Arc::new(AtomicUsize::new(0));
        let handler = Arc::new(CountingHandler {
            count: Arc::clone(&count),
            notify: Arc::new(Notify::new()),
            sleep: Duration::ZERO,
        });
        let mut options = SubscriptionOptions::new(vec!["order.created".into()]);
        options.backpressure = BackpressurePolicy::Block;
        bus.subscribe("replayer", handler, options).unwrap();

        bus.replay("replayer", None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unsubscribe_then_publish_is_not_delivered() {
        let bus = EventBus::new(EventBusConfig::default());
        let count = Arc::new(AtomicUsize::new(0));
        let handler = Arc::new(CountingHandler {
            count: Arc::clone(&count),
            notify: Arc::new(Notify::new()),
            sleep: Duration::ZERO,
        });
        bus.subscribe("gone", handler, SubscriptionOptions::new(vec!["topic".into()])).unwrap();
        bus.unsubscribe("gone").await.unwrap();
        assert_eq!(bus.subscriber_count(), 0);

        bus.publish(event("topic")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
