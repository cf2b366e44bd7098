//! Queue task data model: priority/status enums and the execution-function
//! trait that is resolved from a registry at dispatch time, never persisted.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tokio_util::sync::CancellationToken;

/// Execution body for a [`QueueTask`], resolved by id from a registry. Not
/// part of the persisted document.
#[async_trait]
pub trait TaskFn: Send + Sync {
    async fn execute(&self, cancel: CancellationToken) -> std::result::Result<(), String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TaskPriority {
    Low = 0,
    Normal = 1,
    High = 2,
    Critical = 3,
}

impl TaskPriority {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Low),
            1 => Some(Self::Normal),
            2 => Some(Self::High),
            3 => Some(Self::Critical),
            _ => None,
        }
    }
}

impl Serialize for TaskPriority {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u8(*self as u8)
    }
}

impl<'de> Deserialize<'de> for TaskPriority {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let v = u8::deserialize(d)?;
        TaskPriority::from_u8(v).ok_or_else(|| serde::de::Error::custom(format!("invalid priority {v}")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Pending = 0,
    Running = 1,
    Completed = 2,
    Failed = 3,
    Retrying = 4,
}

impl TaskStatus {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Pending),
            1 => Some(Self::Running),
            2 => Some(Self::Completed),
            3 => Some(Self::Failed),
            4 => Some(Self::Retrying),
            _ => None,
        }
    }
}

impl Serialize for TaskStatus {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u8(*self as u8)
    }
}

impl<'de> Deserialize<'de> for TaskStatus {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let v = u8::deserialize(d)?;
        TaskStatus::from_u8(v).ok_or_else(|| serde::de::Error::custom(format!("invalid status {v}")))
    }
}

/// A durable task: everything needed to persist and resume it, minus its
/// execution function.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueTask {
    pub id: String,
    pub priority: TaskPriority,
    pub dependencies: HashSet<String>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_error: String,
    pub metadata: serde_json::Value,
}

impl QueueTask {
    pub fn new(id: impl Into<String>, priority: TaskPriority, max_retries: u32) -> Self {
        Self {
            id: id.into(),
            priority,
            dependencies: HashSet::new(),
            retry_count: 0,
            max_retries,
            status: TaskStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            last_error: String::new(),
            metadata: serde_json::Value::Null,
        }
    }

    pub fn depends_on(mut self, ids: impl IntoIterator<Item = String>) -> Self {
        self.dependencies.extend(ids);
        self
    }
}
