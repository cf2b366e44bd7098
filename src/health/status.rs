//! Health status ordering and a single probe's result.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Ordered worst-to-best as `Unknown < Unhealthy < Degraded < Healthy`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum HealthStatus {
    Unknown,
    Unhealthy,
    Degraded,
    Healthy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub component: String,
    pub status: HealthStatus,
    pub message: String,
    pub observed_at: DateTime<Utc>,
}

impl HealthCheckResult {
    pub fn new(component: impl Into<String>, status: HealthStatus, message: impl Into<String>) -> Self {
        Self { component: component.into(), status, message: message.into(), observed_at: Utc::now() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_is_worst_to_best() {
        assert!(HealthStatus::Unknown < HealthStatus::Unhealthy);
        assert!(HealthStatus::Unhealthy < HealthStatus::Degraded);
        assert!(HealthStatus::Degraded < HealthStatus::Healthy);
    }
}
