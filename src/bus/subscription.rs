//! A single subscription's admission buffer and delivery pump.
//!
//! Admission into the buffer is gated by a [`CountingSemaphore`] sized to
//! `buffer_capacity`: a permit is held from the moment an event is admitted
//! until its handler finishes, so `Block` subscribers genuinely make the
//! publisher wait for slow handlers rather than merely for queue space.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::primitives::CountingSemaphore;

use super::event::Event;
use super::topic::TopicMatcher;

/// How a subscription handles a full buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackpressurePolicy {
    /// Non-blocking send; on a full buffer the event is dropped.
    Drop,
    /// Blocking send; the publisher waits until a slot frees or the
    /// subscription is cancelled.
    Block,
    /// Non-blocking send; on a full buffer the oldest buffered (not yet
    /// dispatched) event is evicted to make room.
    Buffer,
}

/// An async callback invoked once per delivered event.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn on_event(&self, event: Arc<Event>);
}

/// Options supplied to [`super::EventBus::subscribe`].
pub struct SubscriptionOptions {
    pub topics: Vec<String>,
    pub filter: Option<Arc<dyn Fn(&Event) -> bool + Send + Sync>>,
    pub backpressure: BackpressurePolicy,
    pub buffer_capacity: usize,
}

impl SubscriptionOptions {
    pub fn new(topics: Vec<String>) -> Self {
        Self {
            topics,
            filter: None,
            backpressure: BackpressurePolicy::Buffer,
            buffer_capacity: 64,
        }
    }
}

/// Live state for a subscription: matcher, admission buffer, and counters.
pub(super) struct Subscription {
    pub matcher: TopicMatcher,
    pub filter: Option<Arc<dyn Fn(&Event) -> bool + Send + Sync>>,
    pub policy: BackpressurePolicy,
    slots: CountingSemaphore,
    queue: Mutex<VecDeque<Arc<Event>>>,
    notify: Notify,
    pub delivered: AtomicU64,
    pub dropped: AtomicU64,
    last_active_ms: AtomicI64,
    pub cancel: CancellationToken,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl Subscription {
    pub fn new(options: SubscriptionOptions, parent_cancel: &CancellationToken) -> Arc<Self> {
        Arc::new(Self {
            matcher: TopicMatcher::new(&options.topics),
            filter: options.filter,
            policy: options.backpressure,
            slots: CountingSemaphore::new(options.buffer_capacity.max(1) as u64),
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            delivered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            last_active_ms: AtomicI64::new(Utc::now().timestamp_millis()),
            cancel: parent_cancel.child_token(),
            pump: Mutex::new(None),
        })
    }

    pub fn admits(&self, event: &Event) -> bool {
        if !self.matcher.matches(&event.event_type) {
            return false;
        }
        match &self.filter {
            Some(f) => f(event),
            None => true,
        }
    }

    pub fn last_active_ms(&self) -> i64 {
        self.last_active_ms.load(Ordering::Acquire)
    }

    fn touch(&self) {
        self.last_active_ms.store(Utc::now().timestamp_millis(), Ordering::Release);
    }

    /// Deliver one event per this subscription's backpressure policy.
    pub async fn deliver(self: &Arc<Self>, event: Arc<Event>) -> Result<()> {
        match self.policy {
            BackpressurePolicy::Drop => {
                if self.slots.try_acquire(1).await {
                    self.push_and_notify(event).await;
                } else {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                }
            }
            BackpressurePolicy::Block => {
                self.slots.acquire(1, &self.cancel).await?;
                self.push_and_notify(event).await;
            }
            BackpressurePolicy::Buffer => {
                if !self.slots.try_acquire(1).await {
                    let evicted = self.queue.lock().await.pop_front();
                    match evicted {
                        Some(_) => {
                            self.dropped.fetch_add(1, Ordering::Relaxed);
                            self.slots.release(1).await;
                            if !self.slots.try_acquire(1).await {
                                // Another admission raced us for the freed slot.
                                self.dropped.fetch_add(1, Ordering::Relaxed);
                                return Ok(());
                            }
                        }
                        None => {
                            // Nothing queued to evict: every slot is held by
                            // an in-flight handler. Drop the new event.
                            self.dropped.fetch_add(1, Ordering::Relaxed);
                            return Ok(());
                        }
                    }
                }
                self.push_and_notify(event).await;
            }
        }
        Ok(())
    }

    async fn push_and_notify(&self, event: Arc<Event>) {
        self.queue.lock().await.push_back(event);
        self.notify.notify_waiters();
    }

    pub fn start_pump(self: &Arc<Self>, handler: Arc<dyn EventHandler>) {
        let sub = Arc::clone(self);
        let handle = tokio::spawn(async move { sub.pump_loop(handler).await });
        // Runs right after construction, before any concurrent access, so
        // try_lock here always succeeds without contention.
        if let Ok(mut guard) = self.pump.try_lock() {
            *guard = Some(handle);
        }
    }

    async fn pump_loop(self: Arc<Self>, handler: Arc<dyn EventHandler>) {
        loop {
            let next = self.queue.lock().await.pop_front();
            match next {
                Some(event) => {
                    self.touch();
                    self.delivered.fetch_add(1, Ordering::Relaxed);
                    match self.policy {
                        BackpressurePolicy::Block => {
                            handler.on_event(event).await;
                            self.slots.release(1).await;
                        }
                        BackpressurePolicy::Drop | BackpressurePolicy::Buffer => {
                            let handler = Arc::clone(&handler);
                            let slots = self.slots.clone();
                            tokio::spawn(async move {
                                handler.on_event(event).await;
                                slots.release(1).await;
                            });
                        }
                    }
                }
                None => {
                    tokio::select! {
                        _ = self.notify.notified() => {}
                        _ = self.cancel.cancelled() => return,
                    }
                }
            }
        }
    }

    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let handle = self.pump.lock().await.take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}
