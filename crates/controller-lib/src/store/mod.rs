//! Access to the external resource store
//!
//! Controllers only see the [`ResourceStore`] trait. [`StoreClient`] talks to
//! the store's REST API; [`MemoryStore`] keeps everything in process and is
//! used by tests and local runs.

mod client;
mod memory;

pub use client::{StoreClient, StoreClientBuilder, StoreConfig};
pub use memory::{MemoryStore, StoreOp};

use crate::error::Result;
use crate::models::{HorizontalPodAutoscaler, HpaStatus, Pod, ReplicaSet, ReplicaSetStatus};

pub use async_trait::async_trait;

/// REST paths of the store API
pub mod paths {
    pub const PODS: &str = "/api/v1/pods";
    pub const REPLICASETS: &str = "/api/v1/replicasets";
    pub const HPAS: &str = "/api/v1/hpa";

    pub fn namespaced_pods(namespace: &str) -> String {
        format!("/api/v1/namespaces/{}/pods", namespace)
    }

    pub fn pod(namespace: &str, name: &str) -> String {
        format!("/api/v1/namespaces/{}/pods/{}", namespace, name)
    }

    pub fn replica_set_status(namespace: &str, name: &str) -> String {
        format!("/api/v1/namespaces/{}/replicasets/{}/status", namespace, name)
    }

    pub fn hpa_status(namespace: &str, name: &str) -> String {
        format!("/api/v1/namespaces/{}/hpa/{}/status", namespace, name)
    }
}

/// Operations the controllers need from the resource store.
///
/// Every call is a fresh round trip: no retries, no caching.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// List Pods across all namespaces
    async fn list_pods(&self) -> Result<Vec<Pod>>;

    /// List ReplicaSets across all namespaces
    async fn list_replica_sets(&self) -> Result<Vec<ReplicaSet>>;

    /// List HorizontalPodAutoscalers across all namespaces
    async fn list_hpas(&self) -> Result<Vec<HorizontalPodAutoscaler>>;

    async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<()>;

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()>;

    async fn update_replica_set_status(
        &self,
        namespace: &str,
        name: &str,
        status: &ReplicaSetStatus,
    ) -> Result<()>;

    async fn update_hpa_status(&self, namespace: &str, name: &str, status: &HpaStatus)
        -> Result<()>;
}
