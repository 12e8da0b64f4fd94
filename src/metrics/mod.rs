use async_trait::async_trait;
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec_with_registry, register_gauge_vec_with_registry, CounterVec, Encoder,
    GaugeVec, Opts, Registry, TextEncoder,
};
use std::sync::Arc;
use sysinfo::System;

use crate::models::{CoordinatorEvent, RuntimeStatus};
use crate::services::scheduler::Subscriber;

pub struct MetricsRegistry {
    registry: Registry,
    hostname: String,

    // Gauge metrics
    pub process_up: GaugeVec,
    pub process_restart_count: GaugeVec,
    pub process_started_timestamp: GaugeVec,

    // Counter metrics
    pub status_transitions: CounterVec,
    pub operations: CounterVec,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        let registry = Registry::new();

        // 进程级指标的通用标签
        let process_labels = &["name", "id", "hostname"];

        let process_up = register_gauge_vec_with_registry!(
            Opts::new("sidecar_process_up", "Managed process is running (1) or not (0)"),
            process_labels,
            registry
        )
        .unwrap();

        let process_restart_count = register_gauge_vec_with_registry!(
            Opts::new("sidecar_process_restart_count", "Automatic restarts performed by the process manager"),
            process_labels,
            registry
        )
        .unwrap();

        let process_started_timestamp = register_gauge_vec_with_registry!(
            Opts::new("sidecar_process_started_timestamp_seconds", "Unix timestamp when the process was last started"),
            process_labels,
            registry
        )
        .unwrap();

        let status_transitions = register_counter_vec_with_registry!(
            Opts::new("sidecar_status_transitions_total", "Observed running/stopped transitions"),
            &["name", "state", "hostname"],
            registry
        )
        .unwrap();

        let operations = register_counter_vec_with_registry!(
            Opts::new("sidecar_operations_total", "Lifecycle operations by outcome"),
            &["operation", "result", "hostname"],
            registry
        )
        .unwrap();

        Self {
            registry,
            hostname: System::host_name().unwrap_or_else(|| "unknown".to_string()),
            process_up,
            process_restart_count,
            process_started_timestamp,
            status_transitions,
            operations,
        }
    }

    pub fn render(&self) -> Result<String, Box<dyn std::error::Error>> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }

    /// 用最新的状态快照重建进程级指标，已删除的进程随之消失
    pub fn refresh_processes(&self, statuses: &[RuntimeStatus]) {
        self.process_up.reset();
        self.process_restart_count.reset();
        self.process_started_timestamp.reset();

        for status in statuses {
            let labels = &[status.name.as_str(), status.id.as_str(), self.hostname.as_str()];
            self.process_up
                .with_label_values(labels)
                .set(if status.is_running { 1.0 } else { 0.0 });
            self.process_restart_count
                .with_label_values(labels)
                .set(status.restart_count as f64);
            if let Some(started_at) = status.started_at {
                self.process_started_timestamp
                    .with_label_values(labels)
                    .set(started_at as f64);
            }
        }
    }

    pub fn record_operation(&self, operation: &str, ok: bool) {
        let result = if ok { "success" } else { "failure" };
        self.operations
            .with_label_values(&[operation, result, self.hostname.as_str()])
            .inc();
    }

    pub fn record_transition(&self, name: &str, state: &str) {
        self.status_transitions
            .with_label_values(&[name, state, self.hostname.as_str()])
            .inc();
    }
}

lazy_static! {
    pub static ref METRICS: Arc<MetricsRegistry> = Arc::new(MetricsRegistry::new());
}

pub fn record_operation(operation: &str, ok: bool) {
    METRICS.record_operation(operation, ok);
}

/// 把总线上的状态跳变计入指标
pub struct MetricsSubscriber;

#[async_trait]
impl Subscriber for MetricsSubscriber {
    async fn on_event(&self, event: &CoordinatorEvent) {
        if let CoordinatorEvent::StatusChanged(change) = event {
            METRICS.record_transition(&change.name, change.current.as_str());
        }
    }

    fn name(&self) -> &'static str {
        "metrics"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ProcessState;

    #[test]
    fn refresh_drops_removed_processes() {
        let metrics = MetricsRegistry::new();
        let mut running = RuntimeStatus::stopped("id-1", "core");
        running.state = ProcessState::Running;
        running.is_running = true;
        running.started_at = Some(1_700_000_000);

        metrics.refresh_processes(&[running, RuntimeStatus::stopped("id-2", "rclone_mount_a_process")]);
        let text = metrics.render().unwrap();
        assert!(text.contains("sidecar_process_up"));
        assert!(text.contains("rclone_mount_a_process"));

        metrics.refresh_processes(&[]);
        assert!(!metrics.render().unwrap().contains("rclone_mount_a_process"));
    }

    #[test]
    fn operations_are_counted_by_result() {
        let metrics = MetricsRegistry::new();
        metrics.record_operation("start", true);
        metrics.record_operation("start", false);
        metrics.record_operation("start", false);
        let text = metrics.render().unwrap();
        assert!(text.contains("sidecar_operations_total"));
        assert!(text.contains(r#"result="failure""#));
    }
}
