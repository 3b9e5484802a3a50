//! Kubernetes-backed object store
//!
//! Thin typed wrapper over `kube::Api` that maps API errors onto [`StoreError`]
//! and exposes the `kube_runtime` watcher as the watch feed.

use crate::error::StoreError;
use crate::object_key;
use crate::store_trait::{ObjectApi, WatchStream};
use futures::{StreamExt, TryStreamExt};
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::{Client, Resource};
use kube_runtime::{WatchStreamExt, watcher};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::marker::PhantomData;
use tracing::debug;

/// Object store for one namespaced kind, backed by the Kubernetes API
pub struct KubeObjectApi<K> {
    client: Client,
    kind: String,
    _kind: PhantomData<fn() -> K>,
}

impl<K> Clone for KubeObjectApi<K> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            kind: self.kind.clone(),
            _kind: PhantomData,
        }
    }
}

impl<K> KubeObjectApi<K>
where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>,
{
    /// Creates a store for `K` using the given client
    pub fn new(client: Client) -> Self {
        Self {
            client,
            kind: K::kind(&()).to_string(),
            _kind: PhantomData,
        }
    }

    fn api(&self, namespace: &str) -> Api<K> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait::async_trait]
impl<K> ObjectApi<K> for KubeObjectApi<K>
where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
        + Clone
        + Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static,
{
    fn kind(&self) -> &str {
        &self.kind
    }

    async fn get(&self, namespace: &str, name: &str) -> Result<K, StoreError> {
        self.api(namespace)
            .get(name)
            .await
            .map_err(|e| StoreError::from_kube(&self.kind, &object_key(namespace, name), e))
    }

    async fn list(&self, namespace: &str) -> Result<Vec<K>, StoreError> {
        let list = self
            .api(namespace)
            .list(&ListParams::default())
            .await
            .map_err(|e| StoreError::from_kube(&self.kind, namespace, e))?;
        Ok(list.items)
    }

    async fn create(&self, namespace: &str, obj: &K) -> Result<K, StoreError> {
        let name = obj.meta().name.clone().unwrap_or_default();
        debug!("Creating {} {}/{}", self.kind, namespace, name);
        self.api(namespace)
            .create(&PostParams::default(), obj)
            .await
            .map_err(|e| StoreError::from_kube(&self.kind, &object_key(namespace, &name), e))
    }

    async fn patch(
        &self,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<K, StoreError> {
        debug!("Patching {} {}/{}", self.kind, namespace, name);
        self.api(namespace)
            .patch(name, &PatchParams::default(), &Patch::Merge(patch))
            .await
            .map_err(|e| StoreError::from_kube(&self.kind, &object_key(namespace, name), e))
    }

    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<K, StoreError> {
        debug!("Patching {} {}/{} status", self.kind, namespace, name);
        self.api(namespace)
            .patch_status(name, &PatchParams::default(), &Patch::Merge(patch))
            .await
            .map_err(|e| StoreError::from_kube(&self.kind, &object_key(namespace, name), e))
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        debug!("Deleting {} {}/{}", self.kind, namespace, name);
        self.api(namespace)
            .delete(name, &DeleteParams::default())
            .await
            .map(|_| ())
            .map_err(|e| StoreError::from_kube(&self.kind, &object_key(namespace, name), e))
    }

    fn watch(&self, namespace: Option<&str>) -> WatchStream<K> {
        let api: Api<K> = match namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        };
        watcher(api, watcher::Config::default())
            .default_backoff()
            .map_err(|e| StoreError::Watch(e.to_string()))
            .boxed()
    }
}
