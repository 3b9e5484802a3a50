//! ObjectApi trait for mocking
//!
//! This trait abstracts per-kind object store access so that the controller can
//! run against the Kubernetes API in production and an in-memory store in tests.

use crate::error::StoreError;
use futures::stream::BoxStream;
use kube_runtime::watcher::Event;

/// Stream of watch notifications for one kind
///
/// Delivers `Init`, one `InitApply` per existing object and `InitDone` once the
/// initial listing is complete, then `Apply`/`Delete` for every change.
pub type WatchStream<K> = BoxStream<'static, Result<Event<K>, StoreError>>;

/// Per-kind object store operations
///
/// All methods must be `Send` to work with Tokio's work-stealing runtime.
/// Writes that carry `metadata.resourceVersion` in their patch body are
/// conditional and fail with [`StoreError::Conflict`] on a stale version.
#[async_trait::async_trait]
pub trait ObjectApi<K>: Send + Sync
where
    K: Clone + Send + Sync + 'static,
{
    /// Kind served by this store (e.g. "StatefulSet")
    fn kind(&self) -> &str;

    async fn get(&self, namespace: &str, name: &str) -> Result<K, StoreError>;
    async fn list(&self, namespace: &str) -> Result<Vec<K>, StoreError>;
    async fn create(&self, namespace: &str, obj: &K) -> Result<K, StoreError>;

    /// Applies a JSON merge patch to the object (status is ignored)
    async fn patch(
        &self,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<K, StoreError>;

    /// Applies a JSON merge patch to the status subresource
    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<K, StoreError>;

    async fn delete(&self, namespace: &str, name: &str) -> Result<(), StoreError>;

    /// Subscribes to changes, scoped to one namespace or all of them
    fn watch(&self, namespace: Option<&str>) -> WatchStream<K>;

    /// Like `get`, but maps NotFound to `None`
    async fn get_opt(&self, namespace: &str, name: &str) -> Result<Option<K>, StoreError> {
        match self.get(namespace, name).await {
            Ok(obj) => Ok(Some(obj)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }
}
