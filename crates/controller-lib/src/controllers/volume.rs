//! Persistent volume controller
//!
//! Keeps the book of volumes and claims, provisions a storage directory for
//! each new volume and binds claims to the first compatible free volume.
//! Claims that find no volume stay pending and are retried on every tick.

use super::{async_trait, Reconciler, TickReport};
use crate::error::{ControllerError, Result};
use crate::health::components;
use crate::models::{object_key, PersistentVolume, PersistentVolumeClaim};
use crate::observability::{ControllerMetrics, StructuredLogger};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::process::Command;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Prepares the storage behind a volume
#[async_trait]
pub trait VolumeProvisioner: Send + Sync {
    /// Create an empty storage root for `pv` and return its path
    async fn provision(&self, pv: &PersistentVolume) -> Result<PathBuf>;
}

/// Location of the NFS export backing all volumes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NfsConfig {
    pub server: String,
    pub export: String,
    pub mount_point: PathBuf,
}

impl Default for NfsConfig {
    fn default() -> Self {
        Self {
            server: "192.168.1.12".to_string(),
            export: "/pvserver".to_string(),
            mount_point: PathBuf::from("/pvclient"),
        }
    }
}

/// Provisioner that mounts an NFS export and carves one directory per volume
/// out of it
pub struct NfsProvisioner {
    config: NfsConfig,
}

impl NfsProvisioner {
    pub fn new(config: NfsConfig) -> Self {
        Self { config }
    }

    /// `server:export` as passed to `mount`
    pub fn mount_source(&self) -> String {
        format!("{}:{}", self.config.server, self.config.export)
    }

    /// Mount the export unless the mount point is already a mount
    async fn ensure_mounted(&self, volume: &str) -> Result<()> {
        let mount_point = &self.config.mount_point;

        let already = Command::new("mountpoint")
            .arg("-q")
            .arg(mount_point)
            .status()
            .await
            .map(|status| status.success())
            .unwrap_or(false);
        if already {
            debug!(mount_point = %mount_point.display(), "NFS export already mounted");
            return Ok(());
        }

        fs::create_dir_all(mount_point).await?;

        let output = Command::new("mount")
            .args(["-t", "nfs"])
            .arg(self.mount_source())
            .arg(mount_point)
            .output()
            .await?;

        if !output.status.success() {
            return Err(ControllerError::Provision {
                volume: volume.to_string(),
                message: format!(
                    "mount {} failed: {}",
                    self.mount_source(),
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }

        info!(
            source = %self.mount_source(),
            mount_point = %mount_point.display(),
            "Mounted NFS export"
        );
        Ok(())
    }
}

#[async_trait]
impl VolumeProvisioner for NfsProvisioner {
    async fn provision(&self, pv: &PersistentVolume) -> Result<PathBuf> {
        self.ensure_mounted(&pv.key()).await?;
        prepare_dir(&self.config.mount_point, pv).await
    }
}

/// Provisioner backed by a plain local directory
pub struct LocalProvisioner {
    root: PathBuf,
}

impl LocalProvisioner {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl VolumeProvisioner for LocalProvisioner {
    async fn provision(&self, pv: &PersistentVolume) -> Result<PathBuf> {
        prepare_dir(&self.root, pv).await
    }
}

/// Create `<root>/<namespace>/<name>` and empty it
async fn prepare_dir(root: &Path, pv: &PersistentVolume) -> Result<PathBuf> {
    for segment in [pv.namespace(), pv.name.as_str()] {
        if segment.is_empty() || segment == "." || segment == ".." || segment.contains('/') {
            return Err(ControllerError::Provision {
                volume: pv.key(),
                message: format!("invalid path segment {:?}", segment),
            });
        }
    }

    let dir = root.join(pv.namespace()).join(&pv.name);
    fs::create_dir_all(&dir).await?;

    let mut entries = fs::read_dir(&dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if entry.file_type().await?.is_dir() {
            fs::remove_dir_all(&path).await?;
        } else {
            fs::remove_file(&path).await?;
        }
    }

    Ok(dir)
}

/// Access modes compared as sets: order and duplicates do not matter
pub fn access_modes_match(volume: &[String], claim: &[String]) -> bool {
    let volume: HashSet<&String> = volume.iter().collect();
    let claim: HashSet<&String> = claim.iter().collect();
    volume == claim
}

/// Index of the first unbound volume, in insertion order, that is large
/// enough for `claim` and offers exactly its access modes
pub fn find_first_fit(volumes: &[PersistentVolume], claim: &PersistentVolumeClaim) -> Option<usize> {
    volumes.iter().position(|pv| {
        !pv.is_bound
            && pv.capacity >= claim.capacity
            && access_modes_match(&pv.access_modes, &claim.access_modes)
    })
}

#[derive(Debug, Default)]
struct Book {
    volumes: Vec<PersistentVolume>,
    claims: Vec<PersistentVolumeClaim>,
}

impl Book {
    fn claim_index(&self, key: &str) -> Option<usize> {
        self.claims.iter().position(|c| c.key() == key)
    }

    fn bound_count(&self) -> usize {
        self.volumes.iter().filter(|pv| pv.is_bound).count()
    }

    /// Bind the claim at `index`, returning the volume key
    fn bind(&mut self, index: usize) -> Result<String> {
        let claim = &self.claims[index];
        if claim.is_bound() {
            return Ok(claim.bound_to.clone());
        }

        let Some(pv_index) = find_first_fit(&self.volumes, claim) else {
            return Err(ControllerError::NoCompatibleVolume { claim: claim.key() });
        };

        let claim_key = claim.key();
        let volume = &mut self.volumes[pv_index];
        volume.is_bound = true;
        volume.claimed_by = claim_key;
        let volume_key = volume.key();

        self.claims[index].bound_to = volume_key.clone();
        Ok(volume_key)
    }
}

pub struct PvController {
    provisioner: Arc<dyn VolumeProvisioner>,
    book: RwLock<Book>,
    logger: StructuredLogger,
    metrics: ControllerMetrics,
}

impl PvController {
    pub fn new(provisioner: Arc<dyn VolumeProvisioner>) -> Self {
        Self {
            provisioner,
            book: RwLock::new(Book::default()),
            logger: StructuredLogger::new(components::PV_CONTROLLER),
            metrics: ControllerMetrics::new(),
        }
    }

    /// Provision and record a new volume.
    ///
    /// Nothing is recorded when provisioning fails; directories it already
    /// created are left in place.
    pub async fn add_pv(&self, mut pv: PersistentVolume) -> Result<PersistentVolume> {
        // held across provisioning so two adds of one key cannot both run
        let mut book = self.book.write().await;

        let key = pv.key();
        if book.volumes.iter().any(|v| v.key() == key) {
            return Err(ControllerError::AlreadyExists {
                kind: "PersistentVolume",
                key,
            });
        }

        let path = self.provisioner.provision(&pv).await?;

        pv.namespace = pv.namespace().to_string();
        pv.path = path.to_string_lossy().into_owned();
        pv.is_bound = false;
        pv.claimed_by.clear();

        info!(volume = %key, path = %pv.path, capacity = pv.capacity, "Provisioned volume");
        book.volumes.push(pv.clone());
        Ok(pv)
    }

    /// Record a claim and try to bind it right away.
    ///
    /// Returns the bound volume key. With no compatible volume the claim is
    /// kept pending and [`ControllerError::NoCompatibleVolume`] is returned.
    pub async fn add_pvc(&self, mut pvc: PersistentVolumeClaim) -> Result<String> {
        let mut book = self.book.write().await;

        let key = pvc.key();
        if book.claim_index(&key).is_some() {
            return Err(ControllerError::AlreadyExists {
                kind: "PersistentVolumeClaim",
                key,
            });
        }

        pvc.namespace = pvc.namespace().to_string();
        pvc.bound_to.clear();
        pvc.bound_pod.clear();
        book.claims.push(pvc);

        let index = book.claims.len() - 1;
        let result = book.bind(index);
        self.after_bind(&key, &result, book.bound_count());
        result
    }

    /// Bind an existing claim to the first compatible volume
    pub async fn bind_pvc(&self, namespace: &str, name: &str) -> Result<String> {
        let mut book = self.book.write().await;

        let key = object_key(namespace, name);
        let index = book.claim_index(&key).ok_or_else(|| ControllerError::NotFound {
            kind: "PersistentVolumeClaim",
            key: key.clone(),
        })?;

        let result = book.bind(index);
        self.after_bind(&key, &result, book.bound_count());
        result
    }

    /// Record that `pod` (`namespace/name`) uses the claim
    pub async fn bind_pod_to_pvc(&self, namespace: &str, name: &str, pod: &str) -> Result<()> {
        let mut book = self.book.write().await;
        let claim = claim_mut(&mut book, namespace, name)?;

        claim.bound_pod = pod.to_string();
        info!(claim = %claim.key(), pod = %pod, "Pod attached to claim");
        Ok(())
    }

    /// Clear the Pod using the claim; the volume binding is kept
    pub async fn unbind_pod_from_pvc(&self, namespace: &str, name: &str) -> Result<()> {
        let mut book = self.book.write().await;
        let claim = claim_mut(&mut book, namespace, name)?;

        let previous = std::mem::take(&mut claim.bound_pod);
        info!(claim = %claim.key(), pod = %previous, "Pod detached from claim");
        Ok(())
    }

    /// Volume key the claim is bound to; `None` for unknown or pending claims
    pub async fn pvc_binding(&self, namespace: &str, name: &str) -> Option<String> {
        let key = object_key(namespace, name);
        let book = self.book.read().await;
        book.claims
            .iter()
            .find(|c| c.key() == key)
            .filter(|c| c.is_bound())
            .map(|c| c.bound_to.clone())
    }

    pub async fn volumes(&self) -> Vec<PersistentVolume> {
        self.book.read().await.volumes.clone()
    }

    pub async fn claims(&self) -> Vec<PersistentVolumeClaim> {
        self.book.read().await.claims.clone()
    }

    fn after_bind(&self, claim: &str, result: &Result<String>, bound: usize) {
        match result {
            Ok(volume) => {
                self.logger.log_volume_bound(claim, volume);
                self.metrics.set_volumes_bound(bound);
            }
            Err(e) => debug!(claim = %claim, error = %e, "Claim left pending"),
        }
    }
}

fn claim_mut<'a>(
    book: &'a mut Book,
    namespace: &str,
    name: &str,
) -> Result<&'a mut PersistentVolumeClaim> {
    let key = object_key(namespace, name);
    match book.claim_index(&key) {
        Some(index) => Ok(&mut book.claims[index]),
        None => Err(ControllerError::NotFound {
            kind: "PersistentVolumeClaim",
            key,
        }),
    }
}

#[async_trait]
impl Reconciler for PvController {
    fn name(&self) -> &'static str {
        components::PV_CONTROLLER
    }

    /// Retry binding for every pending claim
    async fn reconcile(&self) -> Result<TickReport> {
        let mut book = self.book.write().await;
        let mut report = TickReport::new(book.claims.len());

        for index in 0..book.claims.len() {
            if book.claims[index].is_bound() {
                continue;
            }
            let key = book.claims[index].key();
            let result = book.bind(index);
            self.after_bind(&key, &result, book.bound_count());
            if let Err(e) = result {
                report.record_error(e);
            }
        }

        Ok(report)
    }
}
