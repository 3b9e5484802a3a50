//! Expectations for the controller's own writes.
//!
//! Every create or patch of a dependent object comes back as a watch
//! notification. The reconciler already knows the outcome of those writes, so
//! the enqueuer consumes the matching notification instead of scheduling
//! another sync of the owning cluster.

use crate::cache::key_of;
use kube::Resource;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Expectation {
    /// Write issued, result not known yet
    Pending,
    /// Notification arrived before the write returned
    Observed,
    /// Write returned this resourceVersion
    Written(String),
}

/// Outstanding writes, keyed by kind and object key
#[derive(Debug, Default)]
pub struct WriteExpectations {
    entries: Mutex<HashMap<String, Expectation>>,
}

impl WriteExpectations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Announces a write of `kind` `key`; call right before issuing it
    pub fn expect(&self, kind: &str, key: &str) {
        self.lock().insert(entry_key(kind, key), Expectation::Pending);
    }

    /// Records the outcome of an announced write.
    ///
    /// `version` is the resourceVersion the store returned, or `None` when the
    /// write failed or changed nothing and therefore produces no notification.
    pub fn written(&self, kind: &str, key: &str, version: Option<&str>) {
        let entry = entry_key(kind, key);
        let mut entries = self.lock();
        let pending = entries.get(&entry) == Some(&Expectation::Pending);
        match version {
            Some(version) if pending => {
                entries.insert(entry, Expectation::Written(version.to_string()));
            }
            _ => {
                entries.remove(&entry);
            }
        }
    }

    /// True when `obj` is the notification of an announced write.
    ///
    /// A match consumes the expectation; any later change to the object is
    /// reported as foreign again.
    pub fn observe<K: Resource<DynamicType = ()>>(&self, obj: &K) -> bool {
        let entry = entry_key(&K::kind(&()), &key_of(obj));
        let mut entries = self.lock();
        match entries.get(&entry).cloned() {
            Some(Expectation::Pending) => {
                entries.insert(entry, Expectation::Observed);
                true
            }
            Some(Expectation::Written(version)) => {
                let own = obj.meta().resource_version.as_deref() == Some(version.as_str());
                if own {
                    entries.remove(&entry);
                }
                own
            }
            Some(Expectation::Observed) | None => false,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Expectation>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn entry_key(kind: &str, key: &str) -> String {
    format!("{kind}:{key}")
}
