//! Horizontal Pod autoscaler controller
//!
//! Every tick fans out one task per HPA. A task moves the selected Pod count
//! at most one step toward the replica count implied by average CPU and
//! memory usage, bounded by `minReplicas` and `maxReplicas`.

use super::naming::{with_suffix, NameGenerator};
use super::{async_trait, Reconciler, TickReport};
use crate::error::{ControllerError, Result};
use crate::health::components;
use crate::matching::select_pods;
use crate::models::{HorizontalPodAutoscaler, HpaSpec, HpaStatus, OwnerKind, OwnerRef, Pod};
use crate::observability::StructuredLogger;
use crate::store::ResourceStore;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// Polling interval used when no HPA asks for a shorter one
pub const DEFAULT_HPA_INTERVAL: Duration = Duration::from_secs(10);

/// Shortest polling interval an HPA can request
const MIN_INTERVAL: Duration = Duration::from_secs(1);

/// Replica count implied by current usage.
///
/// `round(max(cpu / cpuTarget, mem / memTarget) * current)` clamped to
/// `[minReplicas, maxReplicas]`. Targets `<= 0` are ignored; `None` when
/// no target is positive.
pub fn desired_replicas(current: usize, avg_cpu: f64, avg_mem: f64, spec: &HpaSpec) -> Option<i32> {
    let ratio = [
        (avg_cpu, spec.metrics.cpu_percent),
        (avg_mem, spec.metrics.memory_percent),
    ]
    .into_iter()
    .filter(|(_, target)| *target > 0.0)
    .map(|(usage, target)| usage / target)
    .reduce(f64::max)?;

    let raw = (ratio * current as f64).round();
    let bounded = raw
        .max(spec.min_replicas as f64)
        .min(spec.max_replicas as f64);

    Some(bounded as i32)
}

/// What one HPA task does this tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScaleDecision {
    /// Fewer Pods than `minReplicas`: add one, metrics are not consulted
    BelowMin,
    /// More Pods than `maxReplicas`: remove one, metrics are not consulted
    AboveMax,
    /// Within bounds: step toward `desired`
    Metrics {
        desired: i32,
        avg_cpu: f64,
        avg_mem: f64,
    },
}

impl ScaleDecision {
    /// Decide for `hpa` given the Pods it selects
    pub fn evaluate(hpa: &HorizontalPodAutoscaler, selected: &[&Pod]) -> Result<Self> {
        let owner = hpa.metadata.key();
        let current = selected.len();
        if current == 0 {
            return Err(ControllerError::NoMatchingPods { owner });
        }

        if (current as i64) < hpa.spec.min_replicas as i64 {
            return Ok(ScaleDecision::BelowMin);
        }
        if (current as i64) > hpa.spec.max_replicas as i64 {
            return Ok(ScaleDecision::AboveMax);
        }

        let avg_cpu = selected.iter().map(|p| p.status.cpu_usage).sum::<f64>() / current as f64;
        let avg_mem = selected.iter().map(|p| p.status.mem_usage).sum::<f64>() / current as f64;

        let desired = desired_replicas(current, avg_cpu, avg_mem, &hpa.spec)
            .ok_or(ControllerError::NoMetricTargets { owner })?;

        Ok(ScaleDecision::Metrics {
            desired,
            avg_cpu,
            avg_mem,
        })
    }

    /// Pod count change this decision makes: -1, 0 or +1
    pub fn step(&self, current: usize) -> i32 {
        match *self {
            ScaleDecision::BelowMin => 1,
            ScaleDecision::AboveMax => -1,
            ScaleDecision::Metrics { desired, .. } => (desired as i64 - current as i64).signum() as i32,
        }
    }
}

/// Polling interval for the next tick: the default, lowered by any HPA
/// asking for a shorter positive `adjustInterval`, never under one second
pub fn polling_interval(default: Duration, hpas: &[HorizontalPodAutoscaler]) -> Duration {
    hpas.iter()
        .filter(|hpa| hpa.spec.adjust_interval > 0)
        .map(|hpa| Duration::from_secs(hpa.spec.adjust_interval))
        .fold(default, Duration::min)
        .max(MIN_INTERVAL)
}

/// Result of one HPA task
#[derive(Debug, Default)]
struct HpaOutcome {
    created: usize,
    deleted: usize,
    errors: Vec<ControllerError>,
}

/// State shared with the per-HPA tasks
struct Shared {
    store: Arc<dyn ResourceStore>,
    names: NameGenerator,
    logger: StructuredLogger,
}

pub struct HpaController {
    shared: Arc<Shared>,
    default_interval: Duration,
    interval_ms: AtomicU64,
}

impl HpaController {
    pub fn new(store: Arc<dyn ResourceStore>) -> Self {
        Self::with_interval(store, DEFAULT_HPA_INTERVAL)
    }

    pub fn with_interval(store: Arc<dyn ResourceStore>, default_interval: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                store,
                names: NameGenerator::new(),
                logger: StructuredLogger::new(components::HPA_CONTROLLER),
            }),
            default_interval,
            interval_ms: AtomicU64::new(default_interval.as_millis() as u64),
        }
    }

    /// Interval published by the last tick
    pub fn current_interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.load(Ordering::Relaxed))
    }
}

#[async_trait]
impl Reconciler for HpaController {
    fn name(&self) -> &'static str {
        components::HPA_CONTROLLER
    }

    async fn reconcile(&self) -> Result<TickReport> {
        let hpas = self.shared.store.list_hpas().await?;
        let pods = Arc::new(self.shared.store.list_pods().await?);

        let mut tasks = JoinSet::new();
        for hpa in hpas.iter().cloned() {
            let shared = self.shared.clone();
            let pods = pods.clone();
            tasks.spawn(async move { shared.handle(&hpa, &pods).await });
        }

        let mut report = TickReport::new(hpas.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => {
                    report.created += outcome.created;
                    report.deleted += outcome.deleted;
                    for err in outcome.errors {
                        report.record_error(err);
                    }
                }
                Err(e) => report.record_error(ControllerError::Task {
                    owner: "hpa".to_string(),
                    message: e.to_string(),
                }),
            }
        }

        let next = polling_interval(self.default_interval, &hpas);
        self.interval_ms
            .store(next.as_millis() as u64, Ordering::Relaxed);

        Ok(report)
    }

    fn interval(&self) -> Option<Duration> {
        Some(self.current_interval())
    }
}

impl Shared {
    async fn handle(&self, hpa: &HorizontalPodAutoscaler, pods: &[Pod]) -> HpaOutcome {
        let owner = hpa.metadata.key();
        let selected = select_pods(pods, &hpa.spec.selector);
        let current = selected.len();
        let mut outcome = HpaOutcome::default();

        let decision = match ScaleDecision::evaluate(hpa, &selected) {
            Ok(decision) => decision,
            Err(e) => {
                debug!(hpa = %owner, error = %e, "Skipping autoscaler");
                outcome.errors.push(e);
                return outcome;
            }
        };

        let reason = match decision {
            ScaleDecision::BelowMin => "below_min_replicas",
            ScaleDecision::AboveMax => "above_max_replicas",
            ScaleDecision::Metrics { .. } => "utilization",
        };

        // selected is non-empty past evaluate
        let first = selected[0];
        let step = decision.step(current);
        let result = match step {
            1 => self.add_one(hpa, first, pods).await,
            -1 => self.remove_one(&owner, first).await,
            _ => Ok(()),
        };

        match result {
            Ok(()) if step != 0 => {
                if step > 0 {
                    outcome.created += 1;
                } else {
                    outcome.deleted += 1;
                }
                let desired = match decision {
                    ScaleDecision::Metrics { desired, .. } => desired,
                    _ => current as i32 + step,
                };
                self.logger.log_hpa_scaled(&owner, current, desired, reason);
            }
            Ok(()) => {}
            Err(e) => {
                warn!(hpa = %owner, error = %e, "Autoscaler step failed");
                outcome.errors.push(e);
            }
        }

        if let ScaleDecision::Metrics {
            desired,
            avg_cpu,
            avg_mem,
        } = decision
        {
            let status = HpaStatus {
                current_replicas: current as i32,
                desired_replicas: desired,
                cur_cpu_percent: avg_cpu,
                cur_memory_percent: avg_mem,
            };
            if let Err(e) = self
                .store
                .update_hpa_status(hpa.metadata.namespace(), &hpa.metadata.name, &status)
                .await
            {
                outcome.errors.push(e);
            }
        }

        outcome
    }

    async fn add_one(&self, hpa: &HorizontalPodAutoscaler, template: &Pod, pods: &[Pod]) -> Result<()> {
        let namespace = hpa.metadata.namespace();
        let mut taken: HashSet<String> = pods
            .iter()
            .filter(|p| p.metadata.namespace() == namespace)
            .map(|p| p.metadata.name.clone())
            .collect();

        let (name, seq) = self
            .names
            .next_name(&hpa.metadata.key(), &hpa.metadata.name, &mut taken);
        let pod = clone_pod(hpa, template, name, seq);

        self.store.create_pod(namespace, &pod).await?;
        self.logger
            .log_pod_created(&hpa.metadata.key(), &pod.metadata.key());
        Ok(())
    }

    async fn remove_one(&self, owner: &str, pod: &Pod) -> Result<()> {
        self.store
            .delete_pod(pod.metadata.namespace(), &pod.metadata.name)
            .await?;
        self.logger.log_pod_deleted(owner, &pod.metadata.key());
        Ok(())
    }
}

/// Copy `template` into a new Pod owned by `hpa`
fn clone_pod(hpa: &HorizontalPodAutoscaler, template: &Pod, name: String, seq: u64) -> Pod {
    let mut pod = template.clone();

    pod.metadata.name = name;
    pod.metadata.namespace = hpa.metadata.namespace().to_string();
    pod.metadata.uid.clear();
    OwnerRef::new(OwnerKind::Hpa, &hpa.metadata).stamp(&mut pod.metadata.labels);

    for container in &mut pod.spec.containers {
        container.name = with_suffix(&container.name, seq);
    }
    pod.spec.node_name.clear();
    pod.status = Default::default();

    pod
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{labels, Container, MetricTargets, ObjectMeta, PodPhase, PodSpec, PodStatus};
    use crate::store::{MemoryStore, StoreOp};
    use std::collections::HashMap;

    fn selector() -> HashMap<String, String> {
        [("app".to_string(), "api".to_string())].into_iter().collect()
    }

    fn hpa(min: i32, max: i32, cpu: f64, mem: f64) -> HorizontalPodAutoscaler {
        HorizontalPodAutoscaler {
            metadata: ObjectMeta {
                name: "api-hpa".to_string(),
                namespace: "default".to_string(),
                uid: "hpa-uid".to_string(),
                ..Default::default()
            },
            spec: HpaSpec {
                selector: selector(),
                min_replicas: min,
                max_replicas: max,
                metrics: MetricTargets {
                    cpu_percent: cpu,
                    memory_percent: mem,
                },
                ..Default::default()
            },
            status: Default::default(),
        }
    }

    fn api_pod(name: &str, cpu: f64, mem: f64) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: name.to_string(),
                namespace: "default".to_string(),
                labels: selector(),
                uid: format!("{}-uid", name),
                ..Default::default()
            },
            spec: PodSpec {
                containers: vec![Container {
                    name: "server".to_string(),
                    ..Default::default()
                }],
                node_name: "node-1".to_string(),
                ..Default::default()
            },
            status: PodStatus {
                phase: PodPhase::Running,
                cpu_usage: cpu,
                mem_usage: mem,
            },
        }
    }

    #[test]
    fn test_desired_replicas_uses_max_ratio_and_rounds() {
        let spec = hpa(1, 10, 0.5, 0.5).spec;

        // cpu ratio 1.6, mem ratio 0.4 -> round(1.6 * 2) = 3
        assert_eq!(desired_replicas(2, 0.8, 0.2, &spec), Some(3));
        // round(0.7 * 3) = round(2.1) = 2
        assert_eq!(desired_replicas(3, 0.35, 0.1, &spec), Some(2));
    }

    #[test]
    fn test_desired_replicas_clamped() {
        let spec = hpa(2, 4, 0.5, 0.5).spec;

        assert_eq!(desired_replicas(3, 5.0, 0.0, &spec), Some(4));
        assert_eq!(desired_replicas(3, 0.0, 0.0, &spec), Some(2));
    }

    #[test]
    fn test_non_positive_targets_ignored() {
        let cpu_only = hpa(1, 10, 0.5, 0.0).spec;
        assert_eq!(desired_replicas(2, 1.0, 99.0, &cpu_only), Some(4));

        let none = hpa(1, 10, 0.0, -1.0).spec;
        assert_eq!(desired_replicas(2, 1.0, 1.0, &none), None);
    }

    #[test]
    fn test_bounds_take_precedence_over_metrics() {
        let autoscaler = hpa(3, 5, 0.0, 0.0);
        let pods = [api_pod("a", 0.0, 0.0)];
        let selected: Vec<&Pod> = pods.iter().collect();

        let decision = ScaleDecision::evaluate(&autoscaler, &selected).unwrap();
        assert_eq!(decision, ScaleDecision::BelowMin);
        assert_eq!(decision.step(1), 1);
    }

    #[test]
    fn test_evaluate_errors() {
        let autoscaler = hpa(1, 5, 0.0, 0.0);

        let err = ScaleDecision::evaluate(&autoscaler, &[]).unwrap_err();
        assert!(matches!(err, ControllerError::NoMatchingPods { .. }));

        let pods = [api_pod("a", 0.4, 0.4)];
        let selected: Vec<&Pod> = pods.iter().collect();
        let err = ScaleDecision::evaluate(&autoscaler, &selected).unwrap_err();
        assert!(matches!(err, ControllerError::NoMetricTargets { .. }));
    }

    #[test]
    fn test_polling_interval() {
        let mut fast = hpa(1, 2, 0.5, 0.5);
        fast.spec.adjust_interval = 4;
        let mut unset = hpa(1, 2, 0.5, 0.5);
        unset.spec.adjust_interval = 0;
        let mut slow = hpa(1, 2, 0.5, 0.5);
        slow.spec.adjust_interval = 60;

        let default = Duration::from_secs(10);
        assert_eq!(polling_interval(default, &[]), default);
        assert_eq!(polling_interval(default, &[unset.clone(), slow]), default);
        assert_eq!(
            polling_interval(default, &[unset, fast]),
            Duration::from_secs(4)
        );
        assert_eq!(
            polling_interval(Duration::from_millis(200), &[]),
            Duration::from_secs(1)
        );
    }

    #[test]
    fn test_clone_pod() {
        let autoscaler = hpa(1, 5, 0.5, 0.5);
        let source = api_pod("api-0", 0.9, 0.1);

        let pod = clone_pod(&autoscaler, &source, "api-hpa-2".to_string(), 2);

        assert_eq!(pod.metadata.name, "api-hpa-2");
        assert!(pod.metadata.uid.is_empty());
        assert_eq!(pod.metadata.labels["app"], "api");
        assert_eq!(pod.metadata.labels[labels::HPA_NAME], "api-hpa");
        assert_eq!(pod.metadata.labels[labels::HPA_UUID], "hpa-uid");
        assert_eq!(pod.spec.containers[0].name, "server-2");
        assert!(pod.spec.node_name.is_empty());
        assert_eq!(pod.status, PodStatus::default());
    }

    #[tokio::test]
    async fn test_below_min_adds_one_without_status() {
        let store = Arc::new(MemoryStore::new());
        store.insert_hpa(hpa(3, 5, 0.5, 0.5)).await;
        store.insert_pod(api_pod("api-0", 5.0, 5.0)).await;
        let controller = HpaController::new(store.clone());

        let report = controller.reconcile().await.unwrap();

        assert_eq!(report.created, 1);
        let ops = store.ops().await;
        assert_eq!(ops.len(), 1);
        assert!(matches!(ops[0], StoreOp::CreatePod { .. }));
    }

    #[tokio::test]
    async fn test_scale_up_is_single_step() {
        let store = Arc::new(MemoryStore::new());
        store.insert_hpa(hpa(1, 10, 0.1, 0.1)).await;
        store.insert_pod(api_pod("api-0", 0.9, 0.1)).await;
        store.insert_pod(api_pod("api-1", 0.9, 0.1)).await;
        let controller = HpaController::new(store.clone());

        let report = controller.reconcile().await.unwrap();

        assert_eq!(report.created, 1);
        assert_eq!(report.deleted, 0);
        assert_eq!(store.pods().await.len(), 3);

        let status = store.hpa("default", "api-hpa").await.unwrap().status;
        assert_eq!(status.current_replicas, 2);
        assert_eq!(status.desired_replicas, 10);
        assert!((status.cur_cpu_percent - 0.9).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_scale_down_removes_first_selected() {
        let store = Arc::new(MemoryStore::new());
        store.insert_hpa(hpa(1, 10, 0.5, 0.5)).await;
        for name in ["api-0", "api-1", "api-2"] {
            store.insert_pod(api_pod(name, 0.1, 0.1)).await;
        }
        let controller = HpaController::new(store.clone());

        let report = controller.reconcile().await.unwrap();

        assert_eq!(report.deleted, 1);
        assert!(store.ops().await.contains(&StoreOp::DeletePod {
            namespace: "default".to_string(),
            name: "api-0".to_string(),
        }));
    }

    #[tokio::test]
    async fn test_above_max_removes_one() {
        let store = Arc::new(MemoryStore::new());
        store.insert_hpa(hpa(1, 2, 0.5, 0.5)).await;
        for name in ["api-0", "api-1", "api-2", "api-3"] {
            store.insert_pod(api_pod(name, 1.0, 1.0)).await;
        }
        let controller = HpaController::new(store.clone());

        let report = controller.reconcile().await.unwrap();

        assert_eq!(report.deleted, 1);
        assert_eq!(store.pods().await.len(), 3);
        assert_eq!(store.hpa("default", "api-hpa").await.unwrap().status, HpaStatus::default());
    }

    #[tokio::test]
    async fn test_hold_still_writes_status() {
        let store = Arc::new(MemoryStore::new());
        store.insert_hpa(hpa(1, 10, 0.5, 0.5)).await;
        store.insert_pod(api_pod("api-0", 0.5, 0.25)).await;
        store.insert_pod(api_pod("api-1", 0.5, 0.25)).await;
        let controller = HpaController::new(store.clone());

        let report = controller.reconcile().await.unwrap();

        assert_eq!(report.created + report.deleted, 0);
        let status = store.hpa("default", "api-hpa").await.unwrap().status;
        assert_eq!(status.desired_replicas, 2);
        assert_eq!(status.current_replicas, 2);
    }

    #[tokio::test]
    async fn test_follows_usage_across_ticks() {
        let store = Arc::new(MemoryStore::new());
        store.insert_hpa(hpa(1, 10, 0.5, 0.5)).await;
        store.insert_pod(api_pod("api-0", 0.5, 0.25)).await;
        store.insert_pod(api_pod("api-1", 0.5, 0.25)).await;
        let controller = HpaController::new(store.clone());

        let report = controller.reconcile().await.unwrap();
        assert_eq!(report.created + report.deleted, 0);

        let busy = PodStatus {
            phase: PodPhase::Running,
            cpu_usage: 1.5,
            mem_usage: 0.25,
        };
        store.set_pod_status("default", "api-0", busy.clone()).await;
        store.set_pod_status("default", "api-1", busy).await;

        // cpu ratio 3 over 2 pods wants 6, one step per tick
        let report = controller.reconcile().await.unwrap();
        assert_eq!(report.created, 1);
        let status = store.hpa("default", "api-hpa").await.unwrap().status;
        assert_eq!(status.current_replicas, 2);
        assert_eq!(status.desired_replicas, 6);

        let idle = PodStatus {
            phase: PodPhase::Running,
            cpu_usage: 0.05,
            mem_usage: 0.05,
        };
        store.set_pod_status("default", "api-0", idle.clone()).await;
        store.set_pod_status("default", "api-1", idle).await;
        store.clear_ops().await;

        let report = controller.reconcile().await.unwrap();
        assert_eq!(report.deleted, 1);
        assert!(store.ops().await.contains(&StoreOp::DeletePod {
            namespace: "default".to_string(),
            name: "api-0".to_string(),
        }));
        let status = store.hpa("default", "api-hpa").await.unwrap().status;
        assert_eq!(status.current_replicas, 3);
        assert_eq!(status.desired_replicas, 1);
    }

    #[tokio::test]
    async fn test_unmatched_hpa_is_skipped() {
        let store = Arc::new(MemoryStore::new());
        store.insert_hpa(hpa(1, 10, 0.5, 0.5)).await;
        let controller = HpaController::new(store.clone());

        let report = controller.reconcile().await.unwrap();

        assert_eq!(report.skipped, 1);
        assert!(report.is_clean());
        assert!(store.ops().await.is_empty());
    }

    #[tokio::test]
    async fn test_tick_publishes_interval() {
        let store = Arc::new(MemoryStore::new());
        let mut fast = hpa(1, 10, 0.5, 0.5);
        fast.spec.adjust_interval = 3;
        store.insert_hpa(fast).await;
        let controller = HpaController::new(store.clone());

        assert_eq!(controller.interval(), Some(DEFAULT_HPA_INTERVAL));
        controller.reconcile().await.unwrap();
        assert_eq!(controller.interval(), Some(Duration::from_secs(3)));
    }
}
