//! Mock ObjectApi for unit testing
//!
//! In-memory object store that behaves like the API server for the parts the
//! controller relies on: resource versions bump on every effective write,
//! `metadata.resourceVersion` in a patch is a precondition, and every change is
//! broadcast to watchers. Write calls are counted so tests can assert that a
//! converged reconcile does not touch the store.

use crate::error::StoreError;
use crate::object_key;
use crate::patch::apply_merge_patch;
use crate::store_trait::{ObjectApi, WatchStream};
use futures::StreamExt;
use kube::Resource;
use kube_runtime::watcher::Event;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

#[derive(Clone)]
enum Change<K> {
    Apply(K),
    Delete(K),
}

type Objects<K> = BTreeMap<(String, String), K>;

/// Mock object store for one kind
///
/// Clones share the same storage, so a test can keep a handle while the
/// controller owns another.
#[derive(Clone)]
pub struct MockObjectApi<K> {
    kind: String,
    objects: Arc<Mutex<Objects<K>>>,
    changes: broadcast::Sender<Change<K>>,
    versions: Arc<AtomicU64>,
    writes: Arc<AtomicUsize>,
    failures: Arc<AtomicUsize>,
}

impl<K> MockObjectApi<K>
where
    K: Resource<DynamicType = ()> + Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Create a new mock store with its own resource version counter
    pub fn new() -> Self {
        Self::with_version_counter(Arc::new(AtomicU64::new(1)))
    }

    /// Create a mock store drawing resource versions from a shared counter,
    /// so versions stay unique across kinds like they do in etcd
    pub fn with_version_counter(versions: Arc<AtomicU64>) -> Self {
        let (changes, _) = broadcast::channel(1024);
        Self {
            kind: K::kind(&()).to_string(),
            objects: Arc::new(Mutex::new(BTreeMap::new())),
            changes,
            versions,
            writes: Arc::new(AtomicUsize::new(0)),
            failures: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of write calls (create/patch/patch_status/delete) served so far
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Make the next `n` write calls fail with [`StoreError::Unavailable`]
    pub fn fail_next_writes(&self, n: usize) {
        self.failures.store(n, Ordering::SeqCst);
    }

    /// Read an object without going through the async trait (for assertions)
    pub fn object(&self, namespace: &str, name: &str) -> Option<K> {
        self.lock()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// Number of stored objects
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// True when the store is empty
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, Objects<K>> {
        self.objects.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_version(&self) -> String {
        self.versions.fetch_add(1, Ordering::SeqCst).to_string()
    }

    fn begin_write(&self) -> Result<(), StoreError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let injected = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(StoreError::Unavailable(format!("injected {} write failure", self.kind)));
        }
        Ok(())
    }

    fn not_found(&self, namespace: &str, name: &str) -> StoreError {
        StoreError::NotFound {
            kind: self.kind.clone(),
            key: object_key(namespace, name),
        }
    }

    fn modify(
        &self,
        namespace: &str,
        name: &str,
        patch: &Value,
        status: bool,
    ) -> Result<K, StoreError> {
        self.begin_write()?;
        let mut objects = self.lock();
        let key = (namespace.to_string(), name.to_string());
        let current = objects
            .get(&key)
            .ok_or_else(|| self.not_found(namespace, name))?;

        if let Some(expected) = patch
            .pointer("/metadata/resourceVersion")
            .and_then(Value::as_str)
        {
            let actual = current.meta().resource_version.as_deref();
            if actual != Some(expected) {
                return Err(StoreError::Conflict {
                    kind: self.kind.clone(),
                    key: object_key(namespace, name),
                    message: format!(
                        "resourceVersion {expected} is stale (current {})",
                        actual.unwrap_or_default()
                    ),
                });
            }
        }

        let original = serde_json::to_value(current)?;
        let mut updated = original.clone();
        if status {
            if let Some(status_patch) = patch.get("status") {
                let mut wrapped = serde_json::Map::new();
                wrapped.insert("status".to_string(), status_patch.clone());
                apply_merge_patch(&mut updated, &Value::Object(wrapped));
            }
        } else {
            let mut body = patch.clone();
            if let Some(map) = body.as_object_mut() {
                map.remove("status");
            }
            if let Some(meta) = body.get_mut("metadata").and_then(Value::as_object_mut) {
                meta.remove("resourceVersion");
            }
            apply_merge_patch(&mut updated, &body);
        }

        if updated == original {
            return Ok(current.clone());
        }

        let mut obj: K = serde_json::from_value(updated)?;
        obj.meta_mut().resource_version = Some(self.next_version());
        objects.insert(key, obj.clone());
        // Sent under the lock so watchers never observe changes out of order
        let _ = self.changes.send(Change::Apply(obj.clone()));
        Ok(obj)
    }
}

impl<K> Default for MockObjectApi<K>
where
    K: Resource<DynamicType = ()> + Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl<K> ObjectApi<K> for MockObjectApi<K>
where
    K: Resource<DynamicType = ()> + Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    fn kind(&self) -> &str {
        &self.kind
    }

    async fn get(&self, namespace: &str, name: &str) -> Result<K, StoreError> {
        self.object(namespace, name)
            .ok_or_else(|| self.not_found(namespace, name))
    }

    async fn list(&self, namespace: &str) -> Result<Vec<K>, StoreError> {
        Ok(self
            .lock()
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .map(|(_, obj)| obj.clone())
            .collect())
    }

    async fn create(&self, namespace: &str, obj: &K) -> Result<K, StoreError> {
        self.begin_write()?;
        let name = obj
            .meta()
            .name
            .clone()
            .ok_or_else(|| StoreError::Unavailable(format!("{} without a name", self.kind)))?;
        let mut objects = self.lock();
        let key = (namespace.to_string(), name.clone());
        if objects.contains_key(&key) {
            return Err(StoreError::AlreadyExists {
                kind: self.kind.clone(),
                key: object_key(namespace, &name),
            });
        }

        let mut obj = obj.clone();
        let meta = obj.meta_mut();
        meta.namespace = Some(namespace.to_string());
        meta.resource_version = Some(self.next_version());
        meta.uid.get_or_insert_with(|| uuid::Uuid::new_v4().to_string());
        objects.insert(key, obj.clone());
        let _ = self.changes.send(Change::Apply(obj.clone()));
        Ok(obj)
    }

    async fn patch(&self, namespace: &str, name: &str, patch: &Value) -> Result<K, StoreError> {
        self.modify(namespace, name, patch, false)
    }

    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        patch: &Value,
    ) -> Result<K, StoreError> {
        self.modify(namespace, name, patch, true)
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        self.begin_write()?;
        let mut objects = self.lock();
        let obj = objects
            .remove(&(namespace.to_string(), name.to_string()))
            .ok_or_else(|| self.not_found(namespace, name))?;
        let _ = self.changes.send(Change::Delete(obj));
        Ok(())
    }

    fn watch(&self, namespace: Option<&str>) -> WatchStream<K> {
        let scope = namespace.map(str::to_string);
        let in_scope = |scope: &Option<String>, obj: &K| match scope {
            Some(ns) => obj.meta().namespace.as_deref() == Some(ns.as_str()),
            None => true,
        };

        // Subscribe and snapshot under the same lock so no change falls in between
        let objects = self.lock();
        let receiver = self.changes.subscribe();
        let mut initial = vec![Event::Init];
        initial.extend(
            objects
                .values()
                .filter(|obj| in_scope(&scope, obj))
                .cloned()
                .map(Event::InitApply),
        );
        initial.push(Event::InitDone);
        drop(objects);

        let changes = futures::stream::unfold((receiver, scope), move |(mut rx, scope)| async move {
            loop {
                match rx.recv().await {
                    Ok(Change::Apply(obj)) if in_scope(&scope, &obj) => {
                        return Some((Ok(Event::Apply(obj)), (rx, scope)));
                    }
                    Ok(Change::Delete(obj)) if in_scope(&scope, &obj) => {
                        return Some((Ok(Event::Delete(obj)), (rx, scope)));
                    }
                    Ok(_) | Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => return None,
                }
            }
        });

        futures::stream::iter(initial.into_iter().map(Ok))
            .chain(changes)
            .boxed()
    }
}
