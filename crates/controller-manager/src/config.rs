//! Controller manager configuration
//!
//! Values come from an optional config file overlaid with `CONTROLLER_*`
//! environment variables. Every field has a default.

use anyhow::{bail, Context, Result};
use controller_lib::controllers::NfsConfig;
use controller_lib::{LoopTiming, ManagerConfig, StoreConfig};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

const ENV_PREFIX: &str = "CONTROLLER";

/// Storage behind persistent volumes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VolumeBackend {
    /// NFS export mounted at `mount_point`
    Nfs,
    /// Plain directory at `mount_point`
    Local,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Port of the health, metrics and volume API
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Base URL of the resource store
    #[serde(default = "default_store_endpoint")]
    pub store_endpoint: String,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_delay")]
    pub replicaset_delay_secs: u64,
    #[serde(default = "default_interval")]
    pub replicaset_interval_secs: u64,

    #[serde(default)]
    pub hpa_delay_secs: u64,
    #[serde(default = "default_interval")]
    pub hpa_interval_secs: u64,

    #[serde(default = "default_delay")]
    pub pv_delay_secs: u64,
    #[serde(default = "default_interval")]
    pub pv_interval_secs: u64,

    #[serde(default = "default_volume_backend")]
    pub volume_backend: VolumeBackend,

    #[serde(default = "default_nfs_server")]
    pub nfs_server: String,

    #[serde(default = "default_nfs_export")]
    pub nfs_export: String,

    /// Where the NFS export is mounted, or the root directory of local volumes
    #[serde(default = "default_mount_point")]
    pub mount_point: PathBuf,
}

fn default_api_port() -> u16 {
    7002
}

fn default_store_endpoint() -> String {
    "http://127.0.0.1:7000".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

fn default_delay() -> u64 {
    3
}

fn default_interval() -> u64 {
    10
}

fn default_volume_backend() -> VolumeBackend {
    VolumeBackend::Nfs
}

fn default_nfs_server() -> String {
    "192.168.1.12".to_string()
}

fn default_nfs_export() -> String {
    "/pvserver".to_string()
}

fn default_mount_point() -> PathBuf {
    PathBuf::from("/pvclient")
}

impl Settings {
    /// Load from `path` (if any) and the process environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_from(path, None)
    }

    /// Load with an explicit environment map instead of the process one
    fn load_from(path: Option<&Path>, env: Option<HashMap<String, String>>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .try_parsing(true)
                .source(env),
        );

        let settings: Settings = builder
            .build()
            .context("failed to read configuration")?
            .try_deserialize()
            .context("invalid configuration")?;

        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        for (name, secs) in [
            ("replicaset_interval_secs", self.replicaset_interval_secs),
            ("hpa_interval_secs", self.hpa_interval_secs),
            ("pv_interval_secs", self.pv_interval_secs),
            ("request_timeout_secs", self.request_timeout_secs),
        ] {
            if secs == 0 {
                bail!("{} must be greater than zero", name);
            }
        }
        Ok(())
    }

    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            replicaset: LoopTiming::from_secs(self.replicaset_delay_secs, self.replicaset_interval_secs),
            hpa: LoopTiming::from_secs(self.hpa_delay_secs, self.hpa_interval_secs),
            pv: LoopTiming::from_secs(self.pv_delay_secs, self.pv_interval_secs),
        }
    }

    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            endpoint: self.store_endpoint.clone(),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            ..StoreConfig::default()
        }
    }

    pub fn nfs_config(&self) -> NfsConfig {
        NfsConfig {
            server: self.nfs_server.clone(),
            export: self.nfs_export.clone(),
            mount_point: self.mount_point.clone(),
        }
    }
}
