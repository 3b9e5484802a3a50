//! Object store errors

use thiserror::Error;

/// Errors that can occur when talking to the object store
#[derive(Debug, Error)]
pub enum StoreError {
    /// Kubernetes API error not covered by a more specific variant
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// Object does not exist
    #[error("Not found: {kind} {key}")]
    NotFound { kind: String, key: String },

    /// Object already exists (create raced with another writer)
    #[error("Already exists: {kind} {key}")]
    AlreadyExists { kind: String, key: String },

    /// Resource version precondition failed
    #[error("Conflict on {kind} {key}: {message}")]
    Conflict {
        kind: String,
        key: String,
        message: String,
    },

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Watch stream failed
    #[error("Watch error: {0}")]
    Watch(String),

    /// Store could not serve the request
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Maps a kube error onto the store taxonomy, keeping NotFound and Conflict distinguishable
    pub fn from_kube(kind: &str, key: &str, err: kube::Error) -> Self {
        match err {
            kube::Error::Api(ref resp) if resp.code == 404 => StoreError::NotFound {
                kind: kind.to_string(),
                key: key.to_string(),
            },
            kube::Error::Api(ref resp) if resp.code == 409 && resp.reason == "AlreadyExists" => {
                StoreError::AlreadyExists {
                    kind: kind.to_string(),
                    key: key.to_string(),
                }
            }
            kube::Error::Api(ref resp) if resp.code == 409 => StoreError::Conflict {
                kind: kind.to_string(),
                key: key.to_string(),
                message: resp.message.clone(),
            },
            other => StoreError::Kube(other),
        }
    }

    /// True when the object does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    /// True when an optimistic-concurrency precondition failed
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}
