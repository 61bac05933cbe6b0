//! Per-controller health
//!
//! Every reconcile loop records the outcome of each tick here. The HTTP layer
//! serves the aggregate as liveness and readiness.

use crate::controllers::TickReport;
use crate::error::ControllerError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Names under which the controllers report
pub mod components {
    pub const REPLICASET_CONTROLLER: &str = "replicaset";
    pub const HPA_CONTROLLER: &str = "hpa";
    pub const PV_CONTROLLER: &str = "pv";
}

/// Outcome of a controller's last tick, ordered from best to worst
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ControllerStatus {
    /// Last tick completed every operation, or no tick has run yet
    Healthy,
    /// Last tick ran but some operations failed
    Degraded,
    /// Last tick was aborted before any corrective action
    Unhealthy,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerHealth {
    pub status: ControllerStatus,
    /// Ticks recorded since registration, aborted ones included
    pub ticks: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_tick: Option<DateTime<Utc>>,
    /// Failed operations in the last tick
    pub failures: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl ControllerHealth {
    fn registered() -> Self {
        Self {
            status: ControllerStatus::Healthy,
            ticks: 0,
            last_tick: None,
            failures: 0,
            last_error: None,
        }
    }

    fn record(&mut self, status: ControllerStatus, failures: usize, last_error: Option<String>) {
        self.status = status;
        self.ticks += 1;
        self.last_tick = Some(Utc::now());
        self.failures = failures;
        self.last_error = last_error;
    }
}

/// Body of `/healthz`
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// Worst status among the controllers
    pub status: ControllerStatus,
    pub controllers: BTreeMap<String, ControllerHealth>,
}

/// Body of `/readyz`
#[derive(Debug, Clone, Serialize)]
pub struct Readiness {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Default)]
struct State {
    controllers: BTreeMap<String, ControllerHealth>,
    running: bool,
}

/// Shared record of every controller loop
#[derive(Debug, Clone, Default)]
pub struct HealthRegistry {
    state: Arc<RwLock<State>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking `controller`; an existing record is kept
    pub async fn register(&self, controller: &str) {
        self.state
            .write()
            .await
            .controllers
            .entry(controller.to_string())
            .or_insert_with(ControllerHealth::registered);
    }

    /// Record a tick that read its snapshots
    pub async fn record_tick(&self, controller: &str, report: &TickReport) {
        let failures = report.failure_count();
        let status = if report.is_clean() {
            ControllerStatus::Healthy
        } else {
            ControllerStatus::Degraded
        };
        let last_error = report.failures.first().map(ToString::to_string);

        self.entry(controller, |health| health.record(status, failures, last_error))
            .await;
    }

    /// Record a tick aborted by `error`
    pub async fn record_abort(&self, controller: &str, error: &ControllerError) {
        let message = error.to_string();
        self.entry(controller, |health| {
            health.record(ControllerStatus::Unhealthy, 0, Some(message))
        })
        .await;
    }

    /// Mark whether the controller loops are running
    pub async fn set_running(&self, running: bool) {
        self.state.write().await.running = running;
    }

    pub async fn report(&self) -> HealthReport {
        let state = self.state.read().await;
        let status = state
            .controllers
            .values()
            .map(|health| health.status)
            .max()
            .unwrap_or(ControllerStatus::Healthy);

        HealthReport {
            status,
            controllers: state.controllers.clone(),
        }
    }

    /// Ready while the loops run and none of them is unhealthy
    pub async fn readiness(&self) -> Readiness {
        let state = self.state.read().await;

        if !state.running {
            return Readiness {
                ready: false,
                reason: Some("controllers not running".to_string()),
            };
        }

        let unhealthy: Vec<&str> = state
            .controllers
            .iter()
            .filter(|(_, health)| health.status == ControllerStatus::Unhealthy)
            .map(|(name, _)| name.as_str())
            .collect();

        if unhealthy.is_empty() {
            Readiness {
                ready: true,
                reason: None,
            }
        } else {
            Readiness {
                ready: false,
                reason: Some(format!("unhealthy controllers: {}", unhealthy.join(", "))),
            }
        }
    }

    async fn entry(&self, controller: &str, update: impl FnOnce(&mut ControllerHealth)) {
        let mut state = self.state.write().await;
        let health = state
            .controllers
            .entry(controller.to_string())
            .or_insert_with(ControllerHealth::registered);
        update(health);
    }
}
