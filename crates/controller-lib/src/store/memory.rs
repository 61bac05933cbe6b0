//! In-process resource store
//!
//! Keeps objects in memory and records every mutating call so tests can
//! assert on the exact operations a tick issued.

use super::{async_trait, paths, ResourceStore};
use crate::error::{ControllerError, Result};
use crate::models::{
    object_key, HorizontalPodAutoscaler, HpaStatus, Pod, PodStatus, ReplicaSet, ReplicaSetStatus,
};
use reqwest::Method;
use std::collections::HashSet;
use tokio::sync::RwLock;

/// A mutating call received by the store
#[derive(Debug, Clone, PartialEq)]
pub enum StoreOp {
    CreatePod { namespace: String, name: String },
    DeletePod { namespace: String, name: String },
    UpdateReplicaSetStatus { key: String, status: ReplicaSetStatus },
    UpdateHpaStatus { key: String, status: HpaStatus },
}

#[derive(Debug, Default)]
struct State {
    pods: Vec<Pod>,
    replica_sets: Vec<ReplicaSet>,
    hpas: Vec<HorizontalPodAutoscaler>,
    ops: Vec<StoreOp>,
    next_uid: u64,
    failing_creates: usize,
    failing_pod_names: HashSet<String>,
}

impl State {
    fn assign_uid(&mut self) -> String {
        self.next_uid += 1;
        format!("uid-{}", self.next_uid)
    }
}

/// Resource store held entirely in memory
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a Pod directly, bypassing the operation log
    pub async fn insert_pod(&self, mut pod: Pod) {
        let mut state = self.state.write().await;
        if pod.metadata.uid.is_empty() {
            pod.metadata.uid = state.assign_uid();
        }
        state.pods.push(pod);
    }

    pub async fn insert_replica_set(&self, mut rs: ReplicaSet) {
        let mut state = self.state.write().await;
        if rs.metadata.uid.is_empty() {
            rs.metadata.uid = state.assign_uid();
        }
        state.replica_sets.push(rs);
    }

    pub async fn insert_hpa(&self, mut hpa: HorizontalPodAutoscaler) {
        let mut state = self.state.write().await;
        if hpa.metadata.uid.is_empty() {
            hpa.metadata.uid = state.assign_uid();
        }
        state.hpas.push(hpa);
    }

    pub async fn remove_replica_set(&self, namespace: &str, name: &str) {
        let mut state = self.state.write().await;
        state
            .replica_sets
            .retain(|rs| !(rs.metadata.namespace() == namespace && rs.metadata.name == name));
    }

    /// Set the phase and usage of an existing Pod
    pub async fn set_pod_status(&self, namespace: &str, name: &str, status: PodStatus) {
        let mut state = self.state.write().await;
        if let Some(pod) = state
            .pods
            .iter_mut()
            .find(|p| p.metadata.namespace() == namespace && p.metadata.name == name)
        {
            pod.status = status;
        }
    }

    /// Make the next `count` Pod creations fail with a 500
    pub async fn fail_next_creates(&self, count: usize) {
        self.state.write().await.failing_creates = count;
    }

    /// Make deletion of the named Pod fail with a 500
    pub async fn fail_delete_of(&self, name: &str) {
        self.state
            .write()
            .await
            .failing_pod_names
            .insert(name.to_string());
    }

    pub async fn pods(&self) -> Vec<Pod> {
        self.state.read().await.pods.clone()
    }

    pub async fn replica_set(&self, namespace: &str, name: &str) -> Option<ReplicaSet> {
        self.state
            .read()
            .await
            .replica_sets
            .iter()
            .find(|rs| rs.metadata.namespace() == namespace && rs.metadata.name == name)
            .cloned()
    }

    pub async fn hpa(&self, namespace: &str, name: &str) -> Option<HorizontalPodAutoscaler> {
        self.state
            .read()
            .await
            .hpas
            .iter()
            .find(|h| h.metadata.namespace() == namespace && h.metadata.name == name)
            .cloned()
    }

    /// Every mutating call received so far
    pub async fn ops(&self) -> Vec<StoreOp> {
        self.state.read().await.ops.clone()
    }

    pub async fn clear_ops(&self) {
        self.state.write().await.ops.clear();
    }

    pub async fn created_count(&self) -> usize {
        self.ops()
            .await
            .iter()
            .filter(|op| matches!(op, StoreOp::CreatePod { .. }))
            .count()
    }

    pub async fn deleted_count(&self) -> usize {
        self.ops()
            .await
            .iter()
            .filter(|op| matches!(op, StoreOp::DeletePod { .. }))
            .count()
    }
}

fn server_error(method: Method, path: String, body: &str) -> ControllerError {
    ControllerError::Status {
        method,
        url: path,
        status: 500,
        body: body.to_string(),
    }
}

fn not_found(method: Method, path: String) -> ControllerError {
    ControllerError::Status {
        method,
        url: path,
        status: 404,
        body: "not found".to_string(),
    }
}

#[async_trait]
impl ResourceStore for MemoryStore {
    async fn list_pods(&self) -> Result<Vec<Pod>> {
        Ok(self.state.read().await.pods.clone())
    }

    async fn list_replica_sets(&self) -> Result<Vec<ReplicaSet>> {
        Ok(self.state.read().await.replica_sets.clone())
    }

    async fn list_hpas(&self) -> Result<Vec<HorizontalPodAutoscaler>> {
        Ok(self.state.read().await.hpas.clone())
    }

    async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<()> {
        let mut state = self.state.write().await;
        let path = paths::namespaced_pods(namespace);

        if state.failing_creates > 0 {
            state.failing_creates -= 1;
            return Err(server_error(Method::POST, path, "injected failure"));
        }

        let exists = state
            .pods
            .iter()
            .any(|p| p.metadata.namespace() == namespace && p.metadata.name == pod.metadata.name);
        if exists {
            return Err(ControllerError::Status {
                method: Method::POST,
                url: path,
                status: 409,
                body: format!("pod {} already exists", pod.metadata.name),
            });
        }

        let mut stored = pod.clone();
        stored.metadata.namespace = namespace.to_string();
        stored.metadata.uid = state.assign_uid();
        state.ops.push(StoreOp::CreatePod {
            namespace: namespace.to_string(),
            name: stored.metadata.name.clone(),
        });
        state.pods.push(stored);
        Ok(())
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()> {
        let mut state = self.state.write().await;
        let path = paths::pod(namespace, name);

        if state.failing_pod_names.contains(name) {
            return Err(server_error(Method::DELETE, path, "injected failure"));
        }

        let before = state.pods.len();
        state
            .pods
            .retain(|p| !(p.metadata.namespace() == namespace && p.metadata.name == name));
        if state.pods.len() == before {
            return Err(not_found(Method::DELETE, path));
        }

        state.ops.push(StoreOp::DeletePod {
            namespace: namespace.to_string(),
            name: name.to_string(),
        });
        Ok(())
    }

    async fn update_replica_set_status(
        &self,
        namespace: &str,
        name: &str,
        status: &ReplicaSetStatus,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        let Some(rs) = state
            .replica_sets
            .iter_mut()
            .find(|rs| rs.metadata.namespace() == namespace && rs.metadata.name == name)
        else {
            return Err(not_found(Method::PUT, paths::replica_set_status(namespace, name)));
        };

        rs.status = status.clone();
        state.ops.push(StoreOp::UpdateReplicaSetStatus {
            key: object_key(namespace, name),
            status: status.clone(),
        });
        Ok(())
    }

    async fn update_hpa_status(
        &self,
        namespace: &str,
        name: &str,
        status: &HpaStatus,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        let Some(hpa) = state
            .hpas
            .iter_mut()
            .find(|h| h.metadata.namespace() == namespace && h.metadata.name == name)
        else {
            return Err(not_found(Method::PUT, paths::hpa_status(namespace, name)));
        };

        hpa.status = status.clone();
        state.ops.push(StoreOp::UpdateHpaStatus {
            key: object_key(namespace, name),
            status: status.clone(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ObjectMeta;

    fn pod(name: &str) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: name.to_string(),
                namespace: "default".to_string(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_assigns_uid_and_records_op() {
        let store = MemoryStore::new();
        store.create_pod("default", &pod("a")).await.unwrap();

        let pods = store.pods().await;
        assert_eq!(pods.len(), 1);
        assert!(!pods[0].metadata.uid.is_empty());
        assert_eq!(store.created_count().await, 1);
    }

    #[tokio::test]
    async fn test_create_duplicate_conflicts() {
        let store = MemoryStore::new();
        store.create_pod("default", &pod("a")).await.unwrap();

        let err = store.create_pod("default", &pod("a")).await.unwrap_err();
        assert!(matches!(err, ControllerError::Status { status: 409, .. }));
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let store = MemoryStore::new();
        store.fail_next_creates(1).await;

        assert!(store.create_pod("default", &pod("a")).await.is_err());
        assert!(store.create_pod("default", &pod("a")).await.is_ok());

        store.fail_delete_of("a").await;
        assert!(store.delete_pod("default", "a").await.is_err());
        assert_eq!(store.pods().await.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_missing_pod_is_not_found() {
        let store = MemoryStore::new();
        let err = store.delete_pod("default", "ghost").await.unwrap_err();
        assert!(matches!(err, ControllerError::Status { status: 404, .. }));
    }
}
