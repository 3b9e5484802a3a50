//! Create-or-patch for dependent objects.

use crate::error::ControllerError;
use crate::expectations::WriteExpectations;
use kube::Resource;
use serde::Serialize;
use store_client::{ObjectApi, StoreError, merge_patch_for, object_key};
use tracing::info;

/// Makes the stored object match `desired`.
///
/// A missing object is created from the manifest. An existing one is patched
/// with the minimal merge patch covering the fields `desired` sets; fields
/// defaulted by the API server are left alone. Every write is announced to
/// `expectations` so its notification does not requeue the owner. Returns the
/// stored object.
pub async fn ensure<K>(
    store: &dyn ObjectApi<K>,
    expectations: &WriteExpectations,
    namespace: &str,
    desired: &K,
) -> Result<K, ControllerError>
where
    K: Resource + Serialize + Clone + Send + Sync + 'static,
{
    let name = desired.meta().name.clone().unwrap_or_default();
    let key = object_key(namespace, &name);
    let wrap = |source: StoreError| ControllerError::Dependent {
        kind: store.kind().to_string(),
        key: key.clone(),
        source,
    };

    let Some(actual) = store.get_opt(namespace, &name).await.map_err(wrap)? else {
        info!("Creating {} {}", store.kind(), key);
        expectations.expect(store.kind(), &key);
        let created = store.create(namespace, desired).await;
        expectations.written(store.kind(), &key, version_of(created.as_ref().ok()));
        return created.map_err(wrap);
    };

    let patch = merge_patch_for(&serde_json::to_value(desired)?, &serde_json::to_value(&actual)?);
    match patch {
        None => Ok(actual),
        Some(patch) => {
            info!("Patching drifted {} {}", store.kind(), key);
            expectations.expect(store.kind(), &key);
            let patched = store.patch(namespace, &name, &patch).await;
            // An unchanged version means the patch was a no-op and nothing is broadcast
            let version = version_of(patched.as_ref().ok())
                .filter(|v| Some(*v) != actual.meta().resource_version.as_deref());
            expectations.written(store.kind(), &key, version);
            patched.map_err(wrap)
        }
    }
}

fn version_of<K: Resource>(obj: Option<&K>) -> Option<&str> {
    obj.and_then(|o| o.meta().resource_version.as_deref())
}
