//! Core data models shared by the controllers
//!
//! These mirror the JSON bodies served by the resource store. Field names
//! are camelCase on the wire.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::fmt;

pub const DEFAULT_NAMESPACE: &str = "default";

/// Ownership label keys stamped on Pods created by a controller
pub mod labels {
    pub const REPLICASET_NAME: &str = "replicaSetName";
    pub const REPLICASET_NAMESPACE: &str = "replicaSetNamespace";
    pub const REPLICASET_UUID: &str = "replicaSetUUID";

    pub const HPA_NAME: &str = "hpaName";
    pub const HPA_NAMESPACE: &str = "hpaNamespace";
    pub const HPA_UUID: &str = "hpaUUID";
}

/// Deserialize `null` as the type's default value
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Metadata common to every stored object
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub labels: HashMap<String, String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub annotations: HashMap<String, String>,
    /// Store-assigned identity, `uuid` on the wire
    #[serde(default, rename = "uuid", alias = "uid")]
    pub uid: String,
}

impl ObjectMeta {
    /// Namespace, falling back to `default` when unset
    pub fn namespace(&self) -> &str {
        if self.namespace.is_empty() {
            DEFAULT_NAMESPACE
        } else {
            &self.namespace
        }
    }

    /// Identity key `namespace/name`
    pub fn key(&self) -> String {
        object_key(self.namespace(), &self.name)
    }
}

/// Build the `namespace/name` identity key
pub fn object_key(namespace: &str, name: &str) -> String {
    format!("{}/{}", namespace, name)
}

/// Kinds of object that can own Pods through labels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OwnerKind {
    ReplicaSet,
    Hpa,
}

impl OwnerKind {
    fn label_keys(&self) -> (&'static str, &'static str, &'static str) {
        match self {
            OwnerKind::ReplicaSet => (
                labels::REPLICASET_NAME,
                labels::REPLICASET_NAMESPACE,
                labels::REPLICASET_UUID,
            ),
            OwnerKind::Hpa => (labels::HPA_NAME, labels::HPA_NAMESPACE, labels::HPA_UUID),
        }
    }
}

impl fmt::Display for OwnerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OwnerKind::ReplicaSet => write!(f, "ReplicaSet"),
            OwnerKind::Hpa => write!(f, "HorizontalPodAutoscaler"),
        }
    }
}

/// Back-reference from a Pod to the object that created it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerRef {
    pub kind: OwnerKind,
    pub name: String,
    pub namespace: String,
    pub uid: String,
}

impl OwnerRef {
    pub fn new(kind: OwnerKind, meta: &ObjectMeta) -> Self {
        Self {
            kind,
            name: meta.name.clone(),
            namespace: meta.namespace().to_string(),
            uid: meta.uid.clone(),
        }
    }

    /// Write the three ownership labels
    pub fn stamp(&self, labels: &mut HashMap<String, String>) {
        let (name_key, namespace_key, uid_key) = self.kind.label_keys();
        labels.insert(name_key.to_string(), self.name.clone());
        labels.insert(namespace_key.to_string(), self.namespace.clone());
        labels.insert(uid_key.to_string(), self.uid.clone());
    }

    /// Read a complete ownership reference of `kind` back from labels.
    ///
    /// Returns `None` unless uid, name and namespace are all present and
    /// non-empty.
    pub fn from_labels(kind: OwnerKind, labels: &HashMap<String, String>) -> Option<Self> {
        let (name_key, namespace_key, uid_key) = kind.label_keys();
        let non_empty = |key: &str| labels.get(key).filter(|v| !v.is_empty()).cloned();

        Some(Self {
            kind,
            uid: non_empty(uid_key)?,
            name: non_empty(name_key)?,
            namespace: non_empty(namespace_key)?,
        })
    }

    pub fn key(&self) -> String {
        object_key(&self.namespace, &self.name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvVar {
    pub name: String,
    #[serde(default)]
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerPort {
    pub container_port: u16,
    #[serde(default)]
    pub protocol: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Container {
    pub name: String,
    #[serde(default)]
    pub image: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub command: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub args: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub env: Vec<EnvVar>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub ports: Vec<ContainerPort>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodSpec {
    #[serde(default, deserialize_with = "null_as_default")]
    pub containers: Vec<Container>,
    #[serde(default)]
    pub restart_policy: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub node_selector: HashMap<String, String>,
    #[serde(default)]
    pub node_name: String,
}

/// Lifecycle phase of a Pod, owned by the node agent and the store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PodPhase {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
    Terminating,
    #[serde(other)]
    Unknown,
}

impl PodPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            PodPhase::Pending => "Pending",
            PodPhase::Running => "Running",
            PodPhase::Succeeded => "Succeeded",
            PodPhase::Failed => "Failed",
            PodPhase::Unknown => "Unknown",
            PodPhase::Terminating => "Terminating",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodStatus {
    #[serde(default)]
    pub phase: PodPhase,
    #[serde(default)]
    pub cpu_usage: f64,
    #[serde(default)]
    pub mem_usage: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pod {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: PodSpec,
    #[serde(default)]
    pub status: PodStatus,
}

impl Pod {
    pub fn labels(&self) -> &HashMap<String, String> {
        &self.metadata.labels
    }

    pub fn is_running(&self) -> bool {
        self.status.phase == PodPhase::Running
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodTemplateSpec {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: PodSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicaSetSpec {
    pub replicas: i32,
    #[serde(default, deserialize_with = "null_as_default")]
    pub selector: HashMap<String, String>,
    #[serde(default)]
    pub template: PodTemplateSpec,
}

/// One per-Pod entry of a ReplicaSet status snapshot
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicaSetCondition {
    #[serde(rename = "type")]
    pub kind: String,
    pub status: String,
    pub last_transition_time: String,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub message: String,
}

/// ReplicaSet status.
///
/// `conditions` is a snapshot of the selected Pods at the last tick and is
/// replaced wholesale on every status write, never appended to.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicaSetStatus {
    #[serde(default)]
    pub replicas: i32,
    #[serde(default)]
    pub ready_replicas: i32,
    #[serde(default, deserialize_with = "null_as_default")]
    pub conditions: Vec<ReplicaSetCondition>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicaSet {
    pub metadata: ObjectMeta,
    pub spec: ReplicaSetSpec,
    #[serde(default)]
    pub status: ReplicaSetStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScaleTargetRef {
    #[serde(default)]
    pub api_version: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub metadata: ObjectMeta,
}

/// Target average utilization per resource
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricTargets {
    #[serde(default)]
    pub cpu_percent: f64,
    #[serde(default)]
    pub memory_percent: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HpaSpec {
    #[serde(default)]
    pub scale_target_ref: ScaleTargetRef,
    #[serde(default, deserialize_with = "null_as_default")]
    pub selector: HashMap<String, String>,
    pub min_replicas: i32,
    pub max_replicas: i32,
    /// Requested polling interval in seconds; 0 leaves the default in place
    #[serde(default)]
    pub adjust_interval: u64,
    #[serde(default)]
    pub metrics: MetricTargets,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HpaStatus {
    #[serde(rename = "currentReplicas", default)]
    pub current_replicas: i32,
    #[serde(rename = "desiredReplicas", default)]
    pub desired_replicas: i32,
    #[serde(rename = "curCPUPercent", default)]
    pub cur_cpu_percent: f64,
    #[serde(rename = "curMemoryPercent", default)]
    pub cur_memory_percent: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HorizontalPodAutoscaler {
    pub metadata: ObjectMeta,
    pub spec: HpaSpec,
    #[serde(default)]
    pub status: HpaStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistentVolume {
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    /// Capacity in bytes
    pub capacity: i64,
    #[serde(default)]
    pub path: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub access_modes: Vec<String>,
    #[serde(default)]
    pub is_bound: bool,
    #[serde(default)]
    pub claimed_by: String,
}

impl PersistentVolume {
    pub fn namespace(&self) -> &str {
        if self.namespace.is_empty() {
            DEFAULT_NAMESPACE
        } else {
            &self.namespace
        }
    }

    pub fn key(&self) -> String {
        object_key(self.namespace(), &self.name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistentVolumeClaim {
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    /// Requested capacity in bytes
    pub capacity: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub access_modes: Vec<String>,
    /// Volume key this claim is bound to; empty while pending
    #[serde(default)]
    pub bound_to: String,
    /// Pod currently using the claim, `namespace/name`
    #[serde(default)]
    pub bound_pod: String,
}

impl PersistentVolumeClaim {
    pub fn namespace(&self) -> &str {
        if self.namespace.is_empty() {
            DEFAULT_NAMESPACE
        } else {
            &self.namespace
        }
    }

    pub fn key(&self) -> String {
        object_key(self.namespace(), &self.name)
    }

    pub fn is_bound(&self) -> bool {
        !self.bound_to.is_empty()
    }
}
