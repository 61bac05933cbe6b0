//! Controller Manager - reconciliation loops for ReplicaSets, HPAs and volumes
//!
//! Polls the resource store, drives it toward the declared state and serves
//! health, metrics and the volume API.

use anyhow::{Context, Result};
use clap::Parser;
use controller_lib::{
    controllers::{LocalProvisioner, NfsProvisioner, VolumeProvisioner},
    health::HealthRegistry,
    observability::{ControllerMetrics, StructuredLogger},
    ControllerManager, StoreClient,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;

use config::{Settings, VolumeBackend};

const MANAGER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser, Debug)]
#[command(name = "controller-manager", version, about = "Cluster reconciliation controllers")]
struct Cli {
    /// Configuration file (TOML, YAML or JSON)
    #[arg(short, long, env = "CONTROLLER_CONFIG_FILE")]
    config: Option<PathBuf>,
}

fn provisioner(settings: &Settings) -> Arc<dyn VolumeProvisioner> {
    match settings.volume_backend {
        VolumeBackend::Nfs => Arc::new(NfsProvisioner::new(settings.nfs_config())),
        VolumeBackend::Local => Arc::new(LocalProvisioner::new(settings.mount_point.clone())),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref()).context("failed to load configuration")?;
    info!(
        store_endpoint = %settings.store_endpoint,
        volume_backend = ?settings.volume_backend,
        "Manager configured"
    );

    let store = Arc::new(
        StoreClient::new(settings.store_config()).context("failed to create store client")?,
    );

    let health_registry = HealthRegistry::new();
    let manager = ControllerManager::new(
        store,
        provisioner(&settings),
        settings.manager_config(),
        health_registry.clone(),
    );

    let logger = StructuredLogger::new("manager");
    logger.log_startup(MANAGER_VERSION, &settings.store_endpoint);

    let app_state = Arc::new(api::AppState::new(
        health_registry,
        ControllerMetrics::new(),
        manager.volumes(),
    ));

    let api_port = settings.api_port;
    let api_handle = tokio::spawn(async move {
        if let Err(e) = api::serve(api_port, app_state).await {
            error!(error = %e, port = api_port, "API server stopped");
        }
    });

    manager.run(shutdown_signal()).await;

    logger.log_shutdown("signal received");
    api_handle.abort();

    Ok(())
}
