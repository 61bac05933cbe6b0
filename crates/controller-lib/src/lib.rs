//! Controller library for the reconciliation control plane
//!
//! This crate provides:
//! - Typed models of the objects kept by the resource store
//! - A client for the store's REST API
//! - Label selector matching and replica diffing
//! - ReplicaSet, HPA and persistent volume controllers
//! - The controller manager that runs them, plus health and observability

pub mod controllers;
pub mod error;
pub mod health;
pub mod manager;
pub mod matching;
pub mod models;
pub mod observability;
pub mod store;

pub use controllers::{
    HpaController, LoopTiming, PvController, ReconcileLoop, Reconciler, ReplicaSetController,
    TickReport,
};
pub use error::{ControllerError, Result};
pub use health::{ControllerHealth, ControllerStatus, HealthRegistry, HealthReport, Readiness};
pub use manager::{ControllerManager, ManagerConfig};
pub use models::*;
pub use observability::{ControllerMetrics, StructuredLogger};
pub use store::{MemoryStore, ResourceStore, StoreClient, StoreConfig};
