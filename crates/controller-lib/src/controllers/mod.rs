//! Reconciliation controllers
//!
//! Each controller implements [`Reconciler`]: one call to `reconcile` is one
//! tick that reads full snapshots, diffs them against the declared state and
//! issues corrective operations. [`ReconcileLoop`] drives a reconciler on a
//! timer until shutdown.

mod hpa;
mod naming;
mod replicaset;
mod runner;
mod volume;

pub use hpa::{desired_replicas, polling_interval, HpaController, ScaleDecision, DEFAULT_HPA_INTERVAL};
pub use naming::NameGenerator;
pub use replicaset::ReplicaSetController;
pub use runner::{LoopTiming, ReconcileLoop};
pub use volume::{
    access_modes_match, find_first_fit, LocalProvisioner, NfsConfig, NfsProvisioner, PvController,
    VolumeProvisioner,
};

use crate::error::{ControllerError, Result};
use std::time::Duration;

pub use async_trait::async_trait;

/// Outcome of a tick that managed to read its snapshots
#[derive(Debug, Default)]
pub struct TickReport {
    /// Objects examined (ReplicaSets, HPAs or claims)
    pub objects: usize,
    pub created: usize,
    pub deleted: usize,
    /// Objects skipped because of a domain condition (nothing selected, no
    /// compatible volume, ...)
    pub skipped: usize,
    /// Operations that failed; the rest of the tick still ran
    pub failures: Vec<ControllerError>,
}

impl TickReport {
    pub fn new(objects: usize) -> Self {
        Self {
            objects,
            ..Default::default()
        }
    }

    /// Record a per-object error, splitting domain skips from real failures
    pub fn record_error(&mut self, err: ControllerError) {
        if err.is_domain() {
            self.skipped += 1;
        } else {
            self.failures.push(err);
        }
    }

    pub fn failure_count(&self) -> usize {
        self.failures.iter().map(ControllerError::failure_count).sum()
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// A controller that can be driven by a [`ReconcileLoop`]
#[async_trait]
pub trait Reconciler: Send + Sync {
    /// Short name used for logs, metrics labels and health components
    fn name(&self) -> &'static str;

    /// Run one reconciliation tick.
    ///
    /// `Err` means the tick was aborted before any corrective action, for
    /// example because a snapshot could not be read.
    async fn reconcile(&self) -> Result<TickReport>;

    /// Interval the loop should wait before the next tick, if the
    /// controller computes its own
    fn interval(&self) -> Option<Duration> {
        None
    }
}
