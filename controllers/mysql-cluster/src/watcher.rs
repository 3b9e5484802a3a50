//! Watch notifications to work keys.
//!
//! Every informer feeds its stream into an [`EventEnqueuer`] method, which maps
//! the notification to the owning cluster and adds its key to the queue. The
//! cluster informer additionally maintains the cluster cache.

use crate::cache::{ResourceCache, key_of};
use crate::expectations::WriteExpectations;
use crate::queue::RetryQueue;
use crds::{CLUSTER_LABEL, MysqlCluster};
use futures::StreamExt;
use k8s_openapi::api::core::v1::Secret;
use kube::Resource;
use std::sync::Arc;
use store_client::{Event, WatchStream, object_key};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Translates watch notifications into queue additions
#[derive(Clone)]
pub struct EventEnqueuer {
    queue: Arc<RetryQueue>,
    clusters: Arc<ResourceCache<MysqlCluster>>,
    expectations: Arc<WriteExpectations>,
}

impl EventEnqueuer {
    pub fn new(
        queue: Arc<RetryQueue>,
        clusters: Arc<ResourceCache<MysqlCluster>>,
        expectations: Arc<WriteExpectations>,
    ) -> Self {
        Self {
            queue,
            clusters,
            expectations,
        }
    }

    /// Handles a MysqlCluster notification: updates the cache, then enqueues.
    ///
    /// Status-only updates are not enqueued since the controller writes the
    /// status itself. After a (re)list every cached cluster is enqueued once.
    /// A hand-edited status is therefore only corrected on the next spec
    /// change or relist.
    pub fn on_cluster_event(&self, event: &Event<MysqlCluster>) {
        match event {
            Event::Apply(cluster) => {
                let key = key_of(cluster);
                let changed = self
                    .clusters
                    .get(&key)
                    .is_none_or(|old| !same_intent(&old, cluster));
                self.clusters.apply(event);
                if changed {
                    self.enqueue(key, "MysqlCluster");
                } else {
                    trace!("Ignoring status-only update of MysqlCluster {}", key);
                }
            }
            Event::Delete(cluster) => {
                self.clusters.apply(event);
                self.enqueue(key_of(cluster), "MysqlCluster");
            }
            Event::InitDone => {
                self.clusters.apply(event);
                for cluster in self.clusters.list() {
                    self.enqueue(key_of(cluster.as_ref()), "MysqlCluster");
                }
            }
            Event::Init | Event::InitApply(_) => self.clusters.apply(event),
        }
    }

    /// Handles a notification for an object owned by a cluster.
    ///
    /// Notifications of the controller's own creates and patches are dropped;
    /// deletions always enqueue.
    pub fn on_dependent_event<K: Resource<DynamicType = ()>>(&self, event: &Event<K>) {
        let obj = match event {
            Event::Apply(obj) => {
                if self.expectations.observe(obj) {
                    trace!("Ignoring own write of {} {}", K::kind(&()), key_of(obj));
                    return;
                }
                obj
            }
            Event::InitApply(obj) | Event::Delete(obj) => obj,
            Event::Init | Event::InitDone => return,
        };
        match owning_cluster(obj) {
            Some(owner) => self.enqueue(owner, &K::kind(&())),
            None => trace!("{} {} has no owning MysqlCluster", K::kind(&()), key_of(obj)),
        }
    }

    /// Handles a Secret notification by enqueueing every cached cluster in the
    /// same namespace whose spec references the secret
    pub fn on_secret_event(&self, event: &Event<Secret>) {
        let secret = match event {
            Event::Apply(obj) | Event::InitApply(obj) | Event::Delete(obj) => obj,
            Event::Init | Event::InitDone => return,
        };
        let namespace = secret.metadata.namespace.as_deref().unwrap_or_default();
        let name = secret.metadata.name.as_deref().unwrap_or_default();
        for cluster in self.clusters.list() {
            if cluster.metadata.namespace.as_deref() == Some(namespace)
                && cluster.spec.secret_name == name
            {
                self.enqueue(key_of(cluster.as_ref()), "Secret");
            }
        }
    }

    fn enqueue(&self, key: String, source: &str) {
        debug!("Enqueueing MysqlCluster {} (from {} event)", key, source);
        self.queue.add(&key);
    }
}

/// Key of the cluster owning `obj`.
///
/// The controller owner reference wins; the cluster label is the fallback for
/// objects created before the owner had a UID.
pub fn owning_cluster<K: Resource>(obj: &K) -> Option<String> {
    let meta = obj.meta();
    let namespace = meta.namespace.as_deref()?;
    let from_owner = meta.owner_references.as_ref().and_then(|refs| {
        refs.iter()
            .find(|r| r.kind == "MysqlCluster" && r.controller == Some(true))
            .map(|r| r.name.clone())
    });
    let name = from_owner.or_else(|| meta.labels.as_ref()?.get(CLUSTER_LABEL).cloned())?;
    Some(object_key(namespace, &name))
}

fn same_intent(old: &MysqlCluster, new: &MysqlCluster) -> bool {
    old.spec == new.spec
        && old.metadata.labels == new.metadata.labels
        && old.metadata.annotations == new.metadata.annotations
        && old.metadata.deletion_timestamp == new.metadata.deletion_timestamp
}

/// Drives one watch stream until `stop` fires or the stream ends.
///
/// Errors are logged and the loop keeps going; the underlying watcher
/// re-establishes the watch on its own.
pub async fn run_informer<K, F>(
    kind: &'static str,
    mut stream: WatchStream<K>,
    stop: CancellationToken,
    mut handle: F,
) where
    K: Send + 'static,
    F: FnMut(&Event<K>) + Send,
{
    debug!("Starting {} informer", kind);
    loop {
        tokio::select! {
            () = stop.cancelled() => break,
            next = stream.next() => match next {
                Some(Ok(event)) => handle(&event),
                Some(Err(e)) => warn!("{} watch error: {}", kind, e),
                None => {
                    warn!("{} watch stream ended", kind);
                    break;
                }
            }
        }
    }
    debug!("{} informer stopped", kind);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backoff::ExponentialBackoff;
    use crate::test_utils::{cluster, secret};
    use k8s_openapi::api::apps::v1::StatefulSet;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
    use std::collections::BTreeMap;
    use std::time::Duration;

    fn enqueuer() -> (EventEnqueuer, Arc<RetryQueue>, Arc<ResourceCache<MysqlCluster>>) {
        let (enqueuer, queue, clusters, _) = enqueuer_with_expectations();
        (enqueuer, queue, clusters)
    }

    fn enqueuer_with_expectations() -> (
        EventEnqueuer,
        Arc<RetryQueue>,
        Arc<ResourceCache<MysqlCluster>>,
        Arc<WriteExpectations>,
    ) {
        let queue = Arc::new(RetryQueue::new(
            "test",
            ExponentialBackoff::new(Duration::from_millis(5), Duration::from_secs(1)),
        ));
        let clusters = Arc::new(ResourceCache::new());
        let expectations = Arc::new(WriteExpectations::new());
        (
            EventEnqueuer::new(
                Arc::clone(&queue),
                Arc::clone(&clusters),
                Arc::clone(&expectations),
            ),
            queue,
            clusters,
            expectations,
        )
    }

    fn sts(meta: ObjectMeta) -> StatefulSet {
        StatefulSet {
            metadata: meta,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_cluster_events_update_cache_and_enqueue() {
        let (enqueuer, queue, clusters) = enqueuer();
        enqueuer.on_cluster_event(&Event::Init);
        enqueuer.on_cluster_event(&Event::InitApply(cluster("foo", 2)));
        assert!(queue.is_empty());
        enqueuer.on_cluster_event(&Event::InitDone);
        assert!(clusters.get("default/foo").is_some());
        assert_eq!(queue.get().await.as_deref(), Some("default/foo"));
        queue.done("default/foo");

        enqueuer.on_cluster_event(&Event::Delete(cluster("foo", 2)));
        assert!(clusters.get("default/foo").is_none());
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn test_status_only_update_is_not_enqueued() {
        let (enqueuer, queue, clusters) = enqueuer();
        enqueuer.on_cluster_event(&Event::Apply(cluster("foo", 2)));
        assert_eq!(queue.get().await.as_deref(), Some("default/foo"));
        queue.done("default/foo");

        let mut with_status = cluster("foo", 2);
        with_status.status = Some(Default::default());
        enqueuer.on_cluster_event(&Event::Apply(with_status));
        assert!(queue.is_empty());
        assert!(clusters.get("default/foo").unwrap().status.is_some());

        enqueuer.on_cluster_event(&Event::Apply(cluster("foo", 3)));
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn test_dependent_resolves_owner_reference_then_label() {
        let (enqueuer, queue, _) = enqueuer();
        let owned = sts(ObjectMeta {
            name: Some("foo-mysql".to_string()),
            namespace: Some("default".to_string()),
            owner_references: Some(vec![OwnerReference {
                api_version: "mysql.microscaler.io/v1alpha1".to_string(),
                kind: "MysqlCluster".to_string(),
                name: "foo".to_string(),
                uid: "uid-1".to_string(),
                controller: Some(true),
                ..Default::default()
            }]),
            ..Default::default()
        });
        enqueuer.on_dependent_event(&Event::Delete(owned));
        assert_eq!(queue.get().await.as_deref(), Some("default/foo"));

        let labelled = sts(ObjectMeta {
            name: Some("bar-mysql".to_string()),
            namespace: Some("default".to_string()),
            labels: Some(BTreeMap::from([(CLUSTER_LABEL.to_string(), "bar".to_string())])),
            ..Default::default()
        });
        enqueuer.on_dependent_event(&Event::Apply(labelled));
        assert_eq!(queue.get().await.as_deref(), Some("default/bar"));

        let orphan = sts(ObjectMeta {
            name: Some("other".to_string()),
            namespace: Some("default".to_string()),
            ..Default::default()
        });
        enqueuer.on_dependent_event(&Event::Apply(orphan));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_secret_enqueues_referencing_clusters() {
        let (enqueuer, queue, _) = enqueuer();
        enqueuer.on_cluster_event(&Event::Apply(cluster("foo", 1)));
        assert_eq!(queue.get().await.as_deref(), Some("default/foo"));
        queue.done("default/foo");

        let mut unrelated = secret("other");
        enqueuer.on_secret_event(&Event::Apply(unrelated.clone()));
        assert!(queue.is_empty());

        unrelated.metadata.namespace = Some("elsewhere".to_string());
        unrelated.metadata.name = Some("foo-secret".to_string());
        enqueuer.on_secret_event(&Event::Apply(unrelated));
        assert!(queue.is_empty());

        enqueuer.on_secret_event(&Event::Apply(secret("foo-secret")));
        assert_eq!(queue.get().await.as_deref(), Some("default/foo"));
    }

    #[tokio::test]
    async fn test_own_writes_do_not_requeue_owner() {
        let (enqueuer, queue, _, expectations) = enqueuer_with_expectations();
        let labelled = |rv: &str| {
            sts(ObjectMeta {
                name: Some("foo-mysql".to_string()),
                namespace: Some("default".to_string()),
                resource_version: Some(rv.to_string()),
                labels: Some(BTreeMap::from([(CLUSTER_LABEL.to_string(), "foo".to_string())])),
                ..Default::default()
            })
        };

        expectations.expect("StatefulSet", "default/foo-mysql");
        expectations.written("StatefulSet", "default/foo-mysql", Some("7"));
        enqueuer.on_dependent_event(&Event::Apply(labelled("7")));
        assert!(queue.is_empty());

        // A later foreign edit still enqueues
        enqueuer.on_dependent_event(&Event::Apply(labelled("8")));
        assert_eq!(queue.get().await.as_deref(), Some("default/foo"));
        queue.done("default/foo");

        // Deletions are never attributed to the controller
        expectations.expect("StatefulSet", "default/foo-mysql");
        enqueuer.on_dependent_event(&Event::Delete(labelled("8")));
        assert_eq!(queue.len(), 1);
    }
}
