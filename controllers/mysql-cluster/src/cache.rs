//! Local mirror of a watched kind.
//!
//! The cache is fed exclusively by its informer task through [`ResourceCache::apply`];
//! everyone else only reads. Objects are stored behind `Arc` so readers never
//! hold the lock longer than a map lookup.

use crate::error::ControllerError;
use kube::Resource;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use store_client::Event;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Work key of an object: "namespace/name", or just "name" for cluster-scoped objects
pub fn key_of<K: Resource>(obj: &K) -> String {
    let meta = obj.meta();
    let name = meta.name.as_deref().unwrap_or_default();
    match meta.namespace.as_deref() {
        Some(ns) if !ns.is_empty() => format!("{ns}/{name}"),
        _ => name.to_string(),
    }
}

/// Splits a work key into namespace and name.
///
/// Only namespaced keys are valid here; anything else is malformed.
pub fn split_key(key: &str) -> Result<(&str, &str), ControllerError> {
    match key.split_once('/') {
        Some((ns, name)) if !ns.is_empty() && !name.is_empty() && !name.contains('/') => {
            Ok((ns, name))
        }
        _ => Err(ControllerError::InvalidKey(key.to_string())),
    }
}

#[derive(Debug)]
struct Snapshot<K> {
    objects: HashMap<String, Arc<K>>,
    /// Objects received since the last `Init`, swapped in on `InitDone`
    relist: Option<HashMap<String, Arc<K>>>,
}

/// Read-mostly store of the latest observed version of each object
#[derive(Debug)]
pub struct ResourceCache<K> {
    state: RwLock<Snapshot<K>>,
    synced: watch::Sender<bool>,
}

impl<K> Default for ResourceCache<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K> ResourceCache<K> {
    pub fn new() -> Self {
        let (synced, _) = watch::channel(false);
        Self {
            state: RwLock::new(Snapshot {
                objects: HashMap::new(),
                relist: None,
            }),
            synced,
        }
    }

    /// Latest observed object for `key`
    pub fn get(&self, key: &str) -> Option<Arc<K>> {
        self.read(|s| s.objects.get(key).cloned())
    }

    /// All cached objects, in no particular order
    pub fn list(&self) -> Vec<Arc<K>> {
        self.read(|s| s.objects.values().cloned().collect())
    }

    /// Number of cached objects
    pub fn len(&self) -> usize {
        self.read(|s| s.objects.len())
    }

    /// True once the first full listing has been applied; never goes back to false
    pub fn has_synced(&self) -> bool {
        *self.synced.borrow()
    }

    /// Waits until the cache has synced. Returns false if `stop` fires first.
    pub async fn wait_for_sync(&self, stop: &CancellationToken) -> bool {
        let mut rx = self.synced.subscribe();
        tokio::select! {
            res = rx.wait_for(|synced| *synced) => res.is_ok(),
            () = stop.cancelled() => self.has_synced(),
        }
    }

    fn read<T>(&self, f: impl FnOnce(&Snapshot<K>) -> T) -> T {
        f(&self.state.read().unwrap_or_else(PoisonError::into_inner))
    }
}

impl<K: Resource> ResourceCache<K> {
    /// Applies one watch notification
    pub fn apply(&self, event: &Event<K>)
    where
        K: Clone,
    {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        match event {
            Event::Init => {
                state.relist = Some(HashMap::new());
            }
            Event::InitApply(obj) => {
                let key = key_of(obj);
                let obj = Arc::new(obj.clone());
                match state.relist.as_mut() {
                    Some(relist) => {
                        relist.insert(key, obj);
                    }
                    None => {
                        state.objects.insert(key, obj);
                    }
                }
            }
            Event::InitDone => {
                if let Some(relist) = state.relist.take() {
                    state.objects = relist;
                }
                drop(state);
                if !self.has_synced() {
                    debug!("Cache synced");
                }
                self.synced.send_replace(true);
            }
            Event::Apply(obj) => {
                state.objects.insert(key_of(obj), Arc::new(obj.clone()));
            }
            Event::Delete(obj) => {
                state.objects.remove(&key_of(obj));
            }
        }
    }
}
