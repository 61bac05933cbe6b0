//! Controller manager
//!
//! Owns one instance of every controller and runs each in its own reconcile
//! loop until shutdown.

use crate::controllers::{
    HpaController, LoopTiming, PvController, ReconcileLoop, Reconciler, ReplicaSetController,
    VolumeProvisioner,
};
use crate::health::HealthRegistry;
use crate::observability::ControllerMetrics;
use crate::store::ResourceStore;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};

/// Timing of each controller loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManagerConfig {
    pub replicaset: LoopTiming,
    pub hpa: LoopTiming,
    pub pv: LoopTiming,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            replicaset: LoopTiming::from_secs(3, 10),
            hpa: LoopTiming::from_secs(0, 10),
            pv: LoopTiming::from_secs(3, 10),
        }
    }
}

pub struct ControllerManager {
    replica_sets: Arc<ReplicaSetController>,
    hpa: Arc<HpaController>,
    volumes: Arc<PvController>,
    config: ManagerConfig,
    health: HealthRegistry,
    metrics: ControllerMetrics,
}

impl ControllerManager {
    pub fn new(
        store: Arc<dyn ResourceStore>,
        provisioner: Arc<dyn VolumeProvisioner>,
        config: ManagerConfig,
        health: HealthRegistry,
    ) -> Self {
        Self {
            replica_sets: Arc::new(ReplicaSetController::new(store.clone())),
            hpa: Arc::new(HpaController::with_interval(store, config.hpa.interval)),
            volumes: Arc::new(PvController::new(provisioner)),
            config,
            health,
            metrics: ControllerMetrics::new(),
        }
    }

    /// The volume controller, shared with the HTTP layer
    pub fn volumes(&self) -> Arc<PvController> {
        self.volumes.clone()
    }

    pub fn health(&self) -> &HealthRegistry {
        &self.health
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    fn loops(&self) -> Vec<(Arc<dyn Reconciler>, LoopTiming)> {
        vec![
            (self.replica_sets.clone() as Arc<dyn Reconciler>, self.config.replicaset),
            (self.hpa.clone() as Arc<dyn Reconciler>, self.config.hpa),
            (self.volumes.clone() as Arc<dyn Reconciler>, self.config.pv),
        ]
    }

    /// Start every loop, wait for `shutdown`, then stop the loops and wait
    /// for them to finish their current tick
    pub async fn run<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let (stop_tx, _) = broadcast::channel(1);

        let handles: Vec<_> = self
            .loops()
            .into_iter()
            .map(|(reconciler, timing)| {
                let reconcile_loop = ReconcileLoop::new(reconciler, timing)
                    .with_health(self.health.clone())
                    .with_metrics(self.metrics.clone());
                tokio::spawn(reconcile_loop.run(stop_tx.subscribe()))
            })
            .collect();

        self.health.set_running(true).await;
        info!(loops = handles.len(), "Controller loops started");

        shutdown.await;

        info!("Stopping controller loops");
        self.health.set_running(false).await;
        // no receivers left means every loop already exited
        let _ = stop_tx.send(());

        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Controller loop ended abnormally");
            }
        }
    }
}
