//! Observability infrastructure for the controller manager
//!
//! Provides:
//! - Prometheus metrics (tick duration, pods created/deleted, reconcile errors, bound volumes)
//! - Structured JSON logging with tracing

use prometheus::{
    register_histogram_vec, register_int_counter_vec, register_int_gauge, HistogramVec,
    IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for tick durations (in seconds)
const TICK_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<ControllerMetricsInner> = OnceLock::new();

struct ControllerMetricsInner {
    tick_duration_seconds: HistogramVec,
    pods_created: IntCounterVec,
    pods_deleted: IntCounterVec,
    reconcile_errors: IntCounterVec,
    volumes_bound: IntGauge,
}

impl ControllerMetricsInner {
    fn new() -> Self {
        Self {
            tick_duration_seconds: register_histogram_vec!(
                "controller_tick_duration_seconds",
                "Time spent in one reconciliation tick",
                &["controller"],
                TICK_BUCKETS.to_vec()
            )
            .expect("Failed to register tick_duration_seconds"),

            pods_created: register_int_counter_vec!(
                "controller_pods_created_total",
                "Pods created by a controller",
                &["controller"]
            )
            .expect("Failed to register pods_created_total"),

            pods_deleted: register_int_counter_vec!(
                "controller_pods_deleted_total",
                "Pods deleted by a controller",
                &["controller"]
            )
            .expect("Failed to register pods_deleted_total"),

            reconcile_errors: register_int_counter_vec!(
                "controller_reconcile_errors_total",
                "Failed operations during reconciliation",
                &["controller"]
            )
            .expect("Failed to register reconcile_errors_total"),

            volumes_bound: register_int_gauge!(
                "controller_volumes_bound",
                "Persistent volumes currently bound to a claim"
            )
            .expect("Failed to register volumes_bound"),
        }
    }
}

/// Controller metrics for Prometheus exposition
///
/// Lightweight handle to the global metrics instance; clones share the
/// same underlying metrics.
#[derive(Clone)]
pub struct ControllerMetrics {
    _private: (),
}

impl Default for ControllerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ControllerMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(ControllerMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &ControllerMetricsInner {
        GLOBAL_METRICS.get_or_init(ControllerMetricsInner::new)
    }

    pub fn observe_tick(&self, controller: &str, duration_secs: f64) {
        self.inner()
            .tick_duration_seconds
            .with_label_values(&[controller])
            .observe(duration_secs);
    }

    pub fn add_pods_created(&self, controller: &str, count: usize) {
        self.inner()
            .pods_created
            .with_label_values(&[controller])
            .inc_by(count as u64);
    }

    pub fn add_pods_deleted(&self, controller: &str, count: usize) {
        self.inner()
            .pods_deleted
            .with_label_values(&[controller])
            .inc_by(count as u64);
    }

    pub fn add_reconcile_errors(&self, controller: &str, count: usize) {
        self.inner()
            .reconcile_errors
            .with_label_values(&[controller])
            .inc_by(count as u64);
    }

    pub fn set_volumes_bound(&self, count: usize) {
        self.inner().volumes_bound.set(count as i64);
    }
}

/// Structured logger for controller events
///
/// Emits event-tagged records so log pipelines can filter on `event`.
#[derive(Clone)]
pub struct StructuredLogger {
    controller: &'static str,
}

impl StructuredLogger {
    pub fn new(controller: &'static str) -> Self {
        Self { controller }
    }

    pub fn log_pod_created(&self, owner: &str, pod_key: &str) {
        info!(
            event = "pod_created",
            controller = self.controller,
            owner = %owner,
            pod = %pod_key,
            "Created pod"
        );
    }

    pub fn log_pod_deleted(&self, owner: &str, pod_key: &str) {
        info!(
            event = "pod_deleted",
            controller = self.controller,
            owner = %owner,
            pod = %pod_key,
            "Deleted pod"
        );
    }

    /// Log deletion of a Pod whose owner no longer exists
    pub fn log_orphan_collected(&self, owner: &str, pod_key: &str) {
        warn!(
            event = "orphan_collected",
            controller = self.controller,
            owner = %owner,
            pod = %pod_key,
            "Deleted pod whose owner no longer exists"
        );
    }

    pub fn log_hpa_scaled(
        &self,
        hpa: &str,
        current_replicas: usize,
        desired_replicas: i32,
        reason: &str,
    ) {
        info!(
            event = "hpa_scaled",
            controller = self.controller,
            hpa = %hpa,
            current_replicas = current_replicas,
            desired_replicas = desired_replicas,
            reason = %reason,
            "Autoscaler adjusted replicas"
        );
    }

    pub fn log_volume_bound(&self, claim: &str, volume: &str) {
        info!(
            event = "volume_bound",
            controller = self.controller,
            claim = %claim,
            volume = %volume,
            "Bound claim to volume"
        );
    }

    pub fn log_startup(&self, version: &str, store_endpoint: &str) {
        info!(
            event = "manager_started",
            manager_version = %version,
            store_endpoint = %store_endpoint,
            "Controller manager started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "manager_shutdown",
            reason = %reason,
            "Controller manager shutting down"
        );
    }
}
