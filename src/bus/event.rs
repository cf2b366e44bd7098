//! The event type published and delivered by the [`super::EventBus`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single published event. `id` and `timestamp` are assigned by the bus at
/// publish time if left `None`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Option<u64>,
    /// Dotted topic string, e.g. `order.created`.
    pub event_type: String,
    pub payload: serde_json::Value,
    pub source: String,
    pub timestamp: Option<DateTime<Utc>>,
}

impl Event {
    /// Construct an event with id/timestamp left for the bus to assign.
    pub fn new(event_type: impl Into<String>, payload: serde_json::Value, source: impl Into<String>) -> Self {
        Self {
            id: None,
            event_type: event_type.into(),
            payload,
            source: source.into(),
            timestamp: None,
        }
    }
}
