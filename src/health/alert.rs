//! Throttled alert manager: one alert per `(component, status)` pair within
//! a configurable window, retained in a bounded ring, dispatched to
//! detached handler tasks.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use super::status::HealthStatus;

#[derive(Debug, Clone)]
pub struct Alert {
    pub component: String,
    pub status: HealthStatus,
    pub message: String,
    pub raised_at: DateTime<Utc>,
}

#[async_trait]
pub trait AlertHandler: Send + Sync {
    async fn handle(&self, alert: Alert);
}

pub struct AlertManager {
    throttle: Duration,
    max_alerts: usize,
    last_raised: Mutex<HashMap<(String, HealthStatus), DateTime<Utc>>>,
    ring: Mutex<VecDeque<Alert>>,
    handlers: Mutex<Vec<Arc<dyn AlertHandler>>>,
}

impl AlertManager {
    pub fn new(throttle: Duration, max_alerts: usize) -> Self {
        Self {
            throttle,
            max_alerts: max_alerts.max(1),
            last_raised: Mutex::new(HashMap::new()),
            ring: Mutex::new(VecDeque::new()),
            handlers: Mutex::new(Vec::new()),
        }
    }

    pub async fn register_handler(&self, handler: Arc<dyn AlertHandler>) {
        self.handlers.lock().await.push(handler);
    }

    /// Raise an alert unless one for the same `(component, status)` fired
    /// within the throttle window. Returns whether it was actually raised.
    pub async fn raise(&self, component: &str, status: HealthStatus, message: impl Into<String>) -> bool {
        let key = (component.to_string(), status);
        let now = Utc::now();
        {
            let mut last_raised = self.last_raised.lock().await;
            if let Some(prev) = last_raised.get(&key) {
                if now.signed_duration_since(*prev).to_std().unwrap_or(Duration::ZERO) < self.throttle {
                    return false;
                }
            }
            last_raised.insert(key, now);
        }

        let alert = Alert { component: component.to_string(), status, message: message.into(), raised_at: now };

        {
            let mut ring = self.ring.lock().await;
            if ring.len() >= self.max_alerts {
                ring.pop_front();
            }
            ring.push_back(alert.clone());
        }

        let handlers = self.handlers.lock().await.clone();
        for handler in handlers {
            let alert = alert.clone();
            tokio::spawn(async move { handler.handle(alert).await });
        }
        true
    }

    pub async fn recent(&self) -> Vec<Alert> {
        self.ring.lock().await.iter().cloned().collect()
    }
}
