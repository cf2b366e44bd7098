//! Health monitor: per-component probes on a schedule, worst-of aggregation,
//! trend analysis, throttled alerting, and optional recovery actions.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::primitives::RollingWindow;

use super::alert::AlertManager;
use super::status::{HealthCheckResult, HealthStatus};
use super::trend::{analyze, Trend};

const PROBE_BUDGET: Duration = Duration::from_secs(10);
const RECOVERY_BUDGET: Duration = Duration::from_secs(30);

#[async_trait]
pub trait HealthCheck: Send + Sync {
    async fn check(&self, cancel: CancellationToken) -> HealthCheckResult;
}

#[async_trait]
pub trait RecoveryAction: Send + Sync {
    async fn recover(&self, cancel: CancellationToken) -> std::result::Result<(), String>;
}

#[derive(Debug, Clone)]
pub struct HealthMonitorConfig {
    pub check_interval: Duration,
    pub history_size: usize,
    pub max_alerts: usize,
    pub alert_throttle: Duration,
    pub recovery_enabled: bool,
}

impl Default for HealthMonitorConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(30),
            history_size: 100,
            max_alerts: 1000,
            alert_throttle: Duration::from_secs(5 * 60),
            recovery_enabled: false,
        }
    }
}

struct ComponentEntry {
    check: Arc<dyn HealthCheck>,
    history: RollingWindow<HealthStatus>,
    recovery: Mutex<Option<Arc<dyn RecoveryAction>>>,
}

pub struct HealthMonitor {
    config: HealthMonitorConfig,
    components: DashMap<String, Arc<ComponentEntry>>,
    alerts: Arc<AlertManager>,
    cancel: CancellationToken,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl HealthMonitor {
    pub fn new(config: HealthMonitorConfig) -> Self {
        let alerts = Arc::new(AlertManager::new(config.alert_throttle, config.max_alerts));
        Self { config, components: DashMap::new(), alerts, cancel: CancellationToken::new(), handles: Mutex::new(Vec::new()) }
    }

    pub fn alerts(&self) -> &AlertManager {
        &self.alerts
    }

    pub fn register_health_check(&self, component: impl Into<String>, check: Arc<dyn HealthCheck>) {
        let component = component.into();
        self.components.insert(
            component,
            Arc::new(ComponentEntry { check, history: RollingWindow::new(self.config.history_size), recovery: Mutex::new(None) }),
        );
    }

    pub async fn register_recovery_action(&self, component: &str, action: Arc<dyn RecoveryAction>) -> Result<()> {
        let entry = self.components.get(component).map(|e| Arc::clone(e.value()));
        match entry {
            Some(entry) => {
                *entry.recovery.lock().await = Some(action);
                Ok(())
            }
            None => Err(crate::error::ToolkitError::NotFound { what: "health check component", id: component.to_string() }),
        }
    }

    /// Launch one scheduler per registered check.
    pub async fn start(&self) {
        let mut handles = Vec::with_capacity(self.components.len());
        for entry in self.components.iter() {
            let component = entry.key().clone();
            let check_entry = Arc::clone(entry.value());
            let interval = self.config.check_interval;
            let cancel = self.cancel.child_token();
            let recovery_enabled = self.config.recovery_enabled;
            let alerts = Arc::clone(&self.alerts);
            handles.push(tokio::spawn(scheduler_loop(component, check_entry, interval, cancel, alerts, recovery_enabled)));
        }
        *self.handles.lock().await = handles;
    }

    pub fn status_for(&self, component: &str) -> HealthStatus {
        self.components
            .get(component)
            .and_then(|e| e.history.samples().last().copied())
            .unwrap_or(HealthStatus::Unknown)
    }

    /// Worst status across every registered component; `Unknown` if none
    /// has reported yet.
    pub fn overall_status(&self) -> HealthStatus {
        self.components
            .iter()
            .map(|e| e.value().history.samples().last().copied().unwrap_or(HealthStatus::Unknown))
            .min()
            .unwrap_or(HealthStatus::Unknown)
    }

    pub fn trend_for(&self, component: &str) -> Trend {
        match self.components.get(component) {
            Some(entry) => analyze(&entry.history.samples()),
            None => Trend::Stable,
        }
    }

    pub fn snapshot(&self) -> HashMap<String, HealthStatus> {
        self.components.iter().map(|e| (e.key().clone(), e.value().history.samples().last().copied().unwrap_or(HealthStatus::Unknown))).collect()
    }

    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let handles = std::mem::take(&mut *self.handles.lock().await);
        for handle in handles {
            let _ = handle.await;
        }
    }
}

async fn scheduler_loop(
    component: String,
    entry: Arc<ComponentEntry>,
    interval: Duration,
    cancel: CancellationToken,
    alerts: Arc<AlertManager>,
    recovery_enabled: bool,
) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = cancel.cancelled() => return,
        }

        let probe_cancel = cancel.child_token();
        let result = tokio::time::timeout(PROBE_BUDGET, entry.check.check(probe_cancel)).await;
        let result = match result {
            Ok(r) => r,
            Err(_) => HealthCheckResult::new(&component, HealthStatus::Unknown, "health probe timed out"),
        };

        entry.history.record(result.status);

        if result.status <= HealthStatus::Unhealthy {
            alerts.raise(&component, result.status, result.message.clone()).await;

            if recovery_enabled {
                let recovery = entry.recovery.lock().await.clone();
                if let Some(action) = recovery {
                    let recovery_cancel = cancel.child_token();
                    let outcome = tokio::time::timeout(RECOVERY_BUDGET, action.recover(recovery_cancel)).await;
                    match outcome {
                        Ok(Ok(())) => {
                            alerts.raise(&component, HealthStatus::Degraded, "recovery action succeeded").await;
                        }
                        Ok(Err(reason)) => {
                            alerts.raise(&component, HealthStatus::Unhealthy, format!("recovery action failed: {reason}")).await;
                        }
                        Err(_) => {
                            alerts.raise(&component, HealthStatus::Unhealthy, "recovery action timed out").await;
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FlappingCheck(Arc<AtomicUsize>);

    #[async_trait]
    impl HealthCheck for FlappingCheck {
        async fn check(&self, _cancel: CancellationToken) -> HealthCheckResult {
            let call = self.0.fetch_add(1, Ordering::SeqCst);
            let status = if call == 0 { HealthStatus::Healthy } else { HealthStatus::Unhealthy };
            HealthCheckResult::new("worker-pool", status, "probe")
        }
    }

    struct AlwaysHealthy;

    #[async_trait]
    impl HealthCheck for AlwaysHealthy {
        async fn check(&self, _cancel: CancellationToken) -> HealthCheckResult {
            HealthCheckResult::new("event-bus", HealthStatus::Healthy, "ok")
        }
    }

    #[test]
    fn overall_status_is_unknown_with_no_reports() {
        let monitor = HealthMonitor::new(HealthMonitorConfig::default());
        assert_eq!(monitor.overall_status(), HealthStatus::Unknown);
    }

    #[tokio::test]
    async fn overall_status_is_worst_of_components() {
        let monitor = HealthMonitor::new(HealthMonitorConfig { check_interval: Duration::from_millis(20), ..Default::default() });
        monitor.register_health_check("worker-pool", Arc::new(FlappingCheck(Arc::new(AtomicUsize::new(0)))));
        monitor.register_health_check("event-bus", Arc::new(AlwaysHealthy));
        monitor.start().await;

        tokio::time::sleep(Duration::from_millis(70)).await;
        assert_eq!(monitor.status_for("event-bus"), HealthStatus::Healthy);
        assert_eq!(monitor.overall_status(), HealthStatus::Unhealthy);
        monitor.shutdown().await;
    }

    struct RecordingRecovery(Arc<AtomicUsize>);

    #[async_trait]
    impl RecoveryAction for RecordingRecovery {
        async fn recover(&self, _cancel: CancellationToken) -> std::result::Result<(), String> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn recovery_action_runs_on_unhealthy_when_enabled() {
        let monitor = HealthMonitor::new(HealthMonitorConfig {
            check_interval: Duration::from_millis(10),
            recovery_enabled: true,
            ..Default::default()
        });
        let recoveries = Arc::new(AtomicUsize::new(0));
        monitor.register_health_check("worker-pool", Arc::new(FlappingCheck(Arc::new(AtomicUsize::new(5)))));
        monitor.register_recovery_action("worker-pool", Arc::new(RecordingRecovery(Arc::clone(&recoveries)))).await.unwrap();
        monitor.start().await;

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(recoveries.load(Ordering::SeqCst) >= 1);
        monitor.shutdown().await;
    }
}
