//! Object Store Client
//!
//! Typed, per-kind access to the Kubernetes object store and its watch feed,
//! behind a trait so controllers can be unit tested without an API server.
//!
//! # Example
//!
//! ```no_run
//! use k8s_openapi::api::core::v1::ConfigMap;
//! use store_client::{KubeObjectApi, ObjectApi};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = kube::Client::try_default().await?;
//! let config_maps = KubeObjectApi::<ConfigMap>::new(client);
//!
//! if let Some(cm) = config_maps.get_opt("default", "my-config").await? {
//!     println!("resourceVersion: {:?}", cm.metadata.resource_version);
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;
pub mod patch;
#[path = "trait.rs"]
pub mod store_trait;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use client::KubeObjectApi;
pub use error::StoreError;
pub use patch::{apply_merge_patch, contains, merge_patch_for};
pub use store_trait::{ObjectApi, WatchStream};
#[cfg(any(test, feature = "test-util"))]
pub use mock::MockObjectApi;

/// Re-exported so callers can match on watch notifications
pub use kube_runtime::watcher::Event;

/// Formats the "namespace/name" key used in errors and logs
pub fn object_key(namespace: &str, name: &str) -> String {
    format!("{namespace}/{name}")
}
