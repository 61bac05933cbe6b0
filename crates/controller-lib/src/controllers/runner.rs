//! Periodic reconcile loop
//!
//! Drives a [`Reconciler`]: waits the initial delay, then repeatedly sleeps
//! the interval and runs one tick, until the shutdown signal fires.

use super::{Reconciler, TickReport};
use crate::health::HealthRegistry;
use crate::observability::ControllerMetrics;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

/// Start-up delay and period of a loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopTiming {
    pub initial_delay: Duration,
    pub interval: Duration,
}

impl LoopTiming {
    pub fn new(initial_delay: Duration, interval: Duration) -> Self {
        Self {
            initial_delay,
            interval,
        }
    }

    pub fn from_secs(initial_delay: u64, interval: u64) -> Self {
        Self::new(
            Duration::from_secs(initial_delay),
            Duration::from_secs(interval),
        )
    }
}

impl Default for LoopTiming {
    fn default() -> Self {
        Self::from_secs(3, 10)
    }
}

/// Loop that runs one reconciler on a timer
pub struct ReconcileLoop {
    reconciler: Arc<dyn Reconciler>,
    timing: LoopTiming,
    health: Option<HealthRegistry>,
    metrics: Option<ControllerMetrics>,
}

impl ReconcileLoop {
    pub fn new(reconciler: Arc<dyn Reconciler>, timing: LoopTiming) -> Self {
        Self {
            reconciler,
            timing,
            health: None,
            metrics: None,
        }
    }

    /// Report the outcome of every tick to `health`
    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    /// Record tick durations and operation counts in `metrics`
    pub fn with_metrics(mut self, metrics: ControllerMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Run until `shutdown` fires or its sender is dropped.
    ///
    /// A tick that has started is always allowed to finish.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let name = self.reconciler.name();
        if let Some(health) = &self.health {
            health.register(name).await;
        }

        info!(
            controller = name,
            initial_delay_ms = self.timing.initial_delay.as_millis() as u64,
            interval_ms = self.timing.interval.as_millis() as u64,
            "Starting reconcile loop"
        );

        tokio::select! {
            _ = sleep(self.timing.initial_delay) => {}
            _ = shutdown.recv() => {
                info!(controller = name, "Reconcile loop stopped before first tick");
                return;
            }
        }

        let mut tick_count = 0u64;

        loop {
            let interval = self.current_interval();

            tokio::select! {
                _ = sleep(interval) => {
                    tick_count += 1;
                    self.tick().await;
                }
                _ = shutdown.recv() => {
                    info!(controller = name, ticks = tick_count, "Shutting down reconcile loop");
                    break;
                }
            }
        }
    }

    /// Interval before the next tick
    pub fn current_interval(&self) -> Duration {
        self.reconciler.interval().unwrap_or(self.timing.interval)
    }

    /// Run a single tick and report its outcome.
    ///
    /// Returns `None` when the tick was aborted.
    pub async fn tick(&self) -> Option<TickReport> {
        let name = self.reconciler.name();
        let start = Instant::now();

        let result = self.reconciler.reconcile().await;
        let elapsed = start.elapsed();

        if let Some(metrics) = &self.metrics {
            metrics.observe_tick(name, elapsed.as_secs_f64());
        }

        match result {
            Ok(report) => {
                self.record(&report).await;
                debug!(
                    controller = name,
                    objects = report.objects,
                    created = report.created,
                    deleted = report.deleted,
                    skipped = report.skipped,
                    failures = report.failure_count(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Reconcile tick complete"
                );
                Some(report)
            }
            Err(e) => {
                warn!(controller = name, error = %e, "Reconcile tick aborted");
                if let Some(metrics) = &self.metrics {
                    metrics.add_reconcile_errors(name, 1);
                }
                if let Some(health) = &self.health {
                    health.record_abort(name, &e).await;
                }
                None
            }
        }
    }

    async fn record(&self, report: &TickReport) {
        let name = self.reconciler.name();

        if let Some(metrics) = &self.metrics {
            metrics.add_pods_created(name, report.created);
            metrics.add_pods_deleted(name, report.deleted);
            metrics.add_reconcile_errors(name, report.failure_count());
        }

        for failure in &report.failures {
            warn!(controller = name, error = %failure, "Reconcile operation failed");
        }

        if let Some(health) = &self.health {
            health.record_tick(name, report).await;
        }
    }
}
