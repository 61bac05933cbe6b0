//! Error types for the reconciliation controllers

use thiserror::Error;

pub type Result<T, E = ControllerError> = std::result::Result<T, E>;

/// Errors raised while reconciling cluster state
#[derive(Debug, Error)]
pub enum ControllerError {
    /// The store could not be reached (connection refused, timeout, ...)
    #[error("request {method} {url} failed: {source}")]
    Transport {
        method: reqwest::Method,
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The store answered with a status other than the expected one
    #[error("request {method} {url} returned {status}: {body}")]
    Status {
        method: reqwest::Method,
        url: String,
        status: u16,
        body: String,
    },

    /// A body could not be encoded or decoded
    #[error("failed to decode {what}: {source}")]
    Decode {
        what: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid store endpoint {endpoint}: {source}")]
    InvalidEndpoint {
        endpoint: String,
        #[source]
        source: url::ParseError,
    },

    #[error("{0}")]
    InvalidConfig(String),

    #[error("no pods match the selector of {owner}")]
    NoMatchingPods { owner: String },

    #[error("{owner} has no positive cpu or memory target")]
    NoMetricTargets { owner: String },

    #[error("no available persistent volume satisfies claim {claim}")]
    NoCompatibleVolume { claim: String },

    #[error("{kind} {key} already exists")]
    AlreadyExists { kind: &'static str, key: String },

    #[error("{kind} {key} not found")]
    NotFound { kind: &'static str, key: String },

    #[error("provisioning volume {volume} failed: {message}")]
    Provision { volume: String, message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A spawned reconcile task panicked or was cancelled
    #[error("reconcile task for {owner} did not complete: {message}")]
    Task { owner: String, message: String },

    /// Some operations of a batch failed; the others went through
    #[error("{} of {total} operations failed: {}", .failures.len(), summarize(.failures))]
    Batch {
        total: usize,
        failures: Vec<ControllerError>,
    },
}

fn summarize(failures: &[ControllerError]) -> String {
    failures
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl ControllerError {
    /// Whether this error concerns a single object and should not stop
    /// processing of the other objects in the same tick
    pub fn is_domain(&self) -> bool {
        matches!(
            self,
            ControllerError::NoMatchingPods { .. }
                | ControllerError::NoMetricTargets { .. }
                | ControllerError::NoCompatibleVolume { .. }
                | ControllerError::AlreadyExists { .. }
                | ControllerError::NotFound { .. }
        )
    }

    /// Number of failed operations represented by this error
    pub fn failure_count(&self) -> usize {
        match self {
            ControllerError::Batch { failures, .. } => failures.len(),
            _ => 1,
        }
    }

    /// Combine per-operation failures into one error, or `Ok` if none failed
    pub fn from_batch(total: usize, failures: Vec<ControllerError>) -> Result<()> {
        if failures.is_empty() {
            Ok(())
        } else {
            Err(ControllerError::Batch { total, failures })
        }
    }
}
