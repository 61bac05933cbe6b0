//! ReplicaSet controller
//!
//! Keeps the number of Pods selected by each ReplicaSet equal to its
//! declared replica count and removes Pods whose owning ReplicaSet is gone.

use super::naming::{with_suffix, NameGenerator};
use super::{async_trait, Reconciler, TickReport};
use crate::error::{ControllerError, Result};
use crate::health::components;
use crate::matching::{select_pods, ReplicaDiff};
use crate::models::{OwnerKind, OwnerRef, Pod, ReplicaSet, ReplicaSetCondition, ReplicaSetStatus};
use crate::observability::StructuredLogger;
use crate::store::ResourceStore;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};

pub struct ReplicaSetController {
    store: Arc<dyn ResourceStore>,
    names: NameGenerator,
    logger: StructuredLogger,
}

/// Pod names already in use, per namespace
type TakenNames = HashMap<String, HashSet<String>>;

impl ReplicaSetController {
    pub fn new(store: Arc<dyn ResourceStore>) -> Self {
        Self {
            store,
            names: NameGenerator::new(),
            logger: StructuredLogger::new(components::REPLICASET_CONTROLLER),
        }
    }

    /// Bring one ReplicaSet to its declared size and push its status.
    ///
    /// Per-Pod failures do not stop the batch; they come back as one
    /// [`ControllerError::Batch`].
    async fn sync_one(
        &self,
        rs: &ReplicaSet,
        pods: &[Pod],
        taken: &mut TakenNames,
        deleted: &mut HashSet<String>,
        report: &mut TickReport,
    ) {
        let owner = rs.metadata.key();
        let selected = select_pods(pods, &rs.spec.selector);

        match ReplicaDiff::compute(selected.len(), rs.spec.replicas) {
            ReplicaDiff::Create(count) => {
                info!(
                    replica_set = %owner,
                    selected = selected.len(),
                    replicas = rs.spec.replicas,
                    "Scaling up"
                );
                let (created, failures) = self.create_replicas(rs, count, taken).await;
                report.created += created;
                if let Err(e) = ControllerError::from_batch(count, failures) {
                    report.record_error(e);
                }
            }
            ReplicaDiff::Delete(count) => {
                info!(
                    replica_set = %owner,
                    selected = selected.len(),
                    replicas = rs.spec.replicas,
                    "Scaling down"
                );
                let (removed, failures) = self
                    .delete_pods(&owner, &selected[..count], deleted, false)
                    .await;
                report.deleted += removed;
                if let Err(e) = ControllerError::from_batch(count, failures) {
                    report.record_error(e);
                }
            }
            ReplicaDiff::Steady => {
                debug!(replica_set = %owner, replicas = rs.spec.replicas, "In sync");
            }
        }

        let status = build_status(rs, &selected);
        if let Err(e) = self
            .store
            .update_replica_set_status(rs.metadata.namespace(), &rs.metadata.name, &status)
            .await
        {
            report.record_error(e);
        }
    }

    async fn create_replicas(
        &self,
        rs: &ReplicaSet,
        count: usize,
        taken: &mut TakenNames,
    ) -> (usize, Vec<ControllerError>) {
        let owner = OwnerRef::new(OwnerKind::ReplicaSet, &rs.metadata);
        let namespace = pod_namespace(rs).to_string();
        let base = template_name(rs).to_string();
        let names = taken.entry(namespace.clone()).or_default();

        let mut created = 0;
        let mut failures = Vec::new();

        for _ in 0..count {
            let (name, seq) = self.names.next_name(&rs.metadata.key(), &base, names);
            let pod = build_pod(rs, &owner, name, seq);

            match self.store.create_pod(&namespace, &pod).await {
                Ok(()) => {
                    created += 1;
                    self.logger.log_pod_created(&owner.key(), &pod.metadata.key());
                }
                Err(e) => failures.push(e),
            }
        }

        (created, failures)
    }

    async fn delete_pods(
        &self,
        owner: &str,
        victims: &[&Pod],
        deleted: &mut HashSet<String>,
        orphans: bool,
    ) -> (usize, Vec<ControllerError>) {
        let mut removed = 0;
        let mut failures = Vec::new();

        for pod in victims {
            let key = pod.metadata.key();
            match self
                .store
                .delete_pod(pod.metadata.namespace(), &pod.metadata.name)
                .await
            {
                Ok(()) => {
                    removed += 1;
                    if orphans {
                        self.logger.log_orphan_collected(owner, &key);
                    } else {
                        self.logger.log_pod_deleted(owner, &key);
                    }
                    deleted.insert(key);
                }
                Err(e) => failures.push(e),
            }
        }

        (removed, failures)
    }

    /// Delete every Pod whose ownership labels point at a ReplicaSet that
    /// is not in `replica_sets`
    async fn collect_orphans(
        &self,
        replica_sets: &[ReplicaSet],
        pods: &[Pod],
        deleted: &mut HashSet<String>,
        report: &mut TickReport,
    ) {
        let live: HashSet<String> = replica_sets.iter().map(|rs| rs.metadata.key()).collect();

        let mut by_owner: HashMap<String, Vec<&Pod>> = HashMap::new();
        for pod in pods {
            let Some(owner) = OwnerRef::from_labels(OwnerKind::ReplicaSet, pod.labels()) else {
                continue;
            };
            if live.contains(&owner.key()) || deleted.contains(&pod.metadata.key()) {
                continue;
            }
            by_owner.entry(owner.key()).or_default().push(pod);
        }

        for (owner, orphans) in by_owner {
            let (removed, failures) = self.delete_pods(&owner, &orphans, deleted, true).await;
            report.deleted += removed;
            if let Err(e) = ControllerError::from_batch(orphans.len(), failures) {
                report.record_error(e);
            }
        }
    }
}

#[async_trait]
impl Reconciler for ReplicaSetController {
    fn name(&self) -> &'static str {
        components::REPLICASET_CONTROLLER
    }

    async fn reconcile(&self) -> Result<TickReport> {
        let pods = self.store.list_pods().await?;
        let replica_sets = self.store.list_replica_sets().await?;

        let mut report = TickReport::new(replica_sets.len());
        let mut taken = taken_names(&pods);
        let mut deleted = HashSet::new();

        for rs in &replica_sets {
            self.sync_one(rs, &pods, &mut taken, &mut deleted, &mut report)
                .await;
        }

        self.collect_orphans(&replica_sets, &pods, &mut deleted, &mut report)
            .await;

        Ok(report)
    }
}

fn taken_names(pods: &[Pod]) -> TakenNames {
    let mut taken = TakenNames::new();
    for pod in pods {
        taken
            .entry(pod.metadata.namespace().to_string())
            .or_default()
            .insert(pod.metadata.name.clone());
    }
    taken
}

/// Namespace new Pods are created in: the template's, else the ReplicaSet's
fn pod_namespace(rs: &ReplicaSet) -> &str {
    if rs.spec.template.metadata.namespace.is_empty() {
        rs.metadata.namespace()
    } else {
        &rs.spec.template.metadata.namespace
    }
}

fn template_name(rs: &ReplicaSet) -> &str {
    if rs.spec.template.metadata.name.is_empty() {
        &rs.metadata.name
    } else {
        &rs.spec.template.metadata.name
    }
}

/// Instantiate the ReplicaSet's template as a Pod called `name`
pub(crate) fn build_pod(rs: &ReplicaSet, owner: &OwnerRef, name: String, seq: u64) -> Pod {
    let mut pod = Pod {
        metadata: rs.spec.template.metadata.clone(),
        spec: rs.spec.template.spec.clone(),
        status: Default::default(),
    };

    pod.metadata.name = name;
    pod.metadata.namespace = pod_namespace(rs).to_string();
    pod.metadata.uid.clear();
    owner.stamp(&mut pod.metadata.labels);

    for container in &mut pod.spec.containers {
        container.name = with_suffix(&container.name, seq);
    }

    pod
}

/// Status snapshot for `rs` given the Pods it currently selects
fn build_status(rs: &ReplicaSet, selected: &[&Pod]) -> ReplicaSetStatus {
    let now = chrono::Utc::now().to_rfc3339();

    let conditions = selected
        .iter()
        .map(|pod| ReplicaSetCondition {
            kind: "Pod".to_string(),
            status: pod.status.phase.as_str().to_string(),
            last_transition_time: now.clone(),
            reason: String::new(),
            message: pod.metadata.key(),
        })
        .collect();

    ReplicaSetStatus {
        replicas: rs.spec.replicas,
        ready_replicas: selected.iter().filter(|p| p.is_running()).count() as i32,
        conditions,
    }
}
