//! Controller-specific error types.
//!
//! This module defines error types specific to the MysqlCluster Controller
//! that are not covered by upstream library errors. The worker is the only
//! place that decides between retrying and dropping; everything else just
//! propagates.

use store_client::StoreError;
use thiserror::Error;

/// Errors that can occur in the MysqlCluster Controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Object store error outside of a dependent object
    #[error("Object store error: {0}")]
    Store(#[from] StoreError),

    /// Work key could not be split into namespace/name
    #[error("Invalid resource key: {0}")]
    InvalidKey(String),

    /// Creating or patching a dependent object failed
    #[error("Failed to reconcile {kind} for MysqlCluster {key}: {source}")]
    Dependent {
        kind: String,
        key: String,
        source: StoreError,
    },

    /// Credentials secret named by the cluster spec is missing
    #[error("Secret {0} referenced by the cluster does not exist")]
    SecretNotFound(String),

    /// Desired manifest could not be built
    #[error("Failed to build desired manifest: {0}")]
    Manifest(#[from] serde_json::Error),

    /// CRD registration did not complete
    #[error("CRD bootstrap failed: {0}")]
    Bootstrap(String),

    /// Stop fired before the informer cache finished its initial listing
    #[error("Error waiting for informer cache to sync: {0}")]
    CacheSync(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Reconciliation aborted by shutdown
    #[error("Reconciliation cancelled by shutdown")]
    Cancelled,

    /// Reconciliation panicked
    #[error("Reconciliation panicked: {0}")]
    Panic(String),

    /// No factory registered under the requested name
    #[error("Unknown controller: {0}")]
    UnknownController(String),
}

impl ControllerError {
    fn store_error(&self) -> Option<&StoreError> {
        match self {
            ControllerError::Store(e) | ControllerError::Dependent { source: e, .. } => Some(e),
            _ => None,
        }
    }

    /// True when the object being worked on vanished
    pub fn is_not_found(&self) -> bool {
        self.store_error().is_some_and(StoreError::is_not_found)
    }

    /// True when an optimistic-concurrency precondition failed
    pub fn is_conflict(&self) -> bool {
        self.store_error().is_some_and(StoreError::is_conflict)
    }
}
