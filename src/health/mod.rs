//! Component health probes, worst-of aggregation, trend analysis, and
//! throttled alerting with optional recovery actions.

mod alert;
mod monitor;
mod status;
mod trend;

pub use alert::{Alert, AlertHandler, AlertManager};
pub use monitor::{HealthCheck, HealthMonitor, HealthMonitorConfig, RecoveryAction};
pub use status::{HealthCheckResult, HealthStatus};
pub use trend::Trend;
