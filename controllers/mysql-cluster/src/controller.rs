//! Main controller implementation.
//!
//! This module contains the `Controller` struct that orchestrates startup and
//! shutdown of the MysqlCluster Controller:
//! CRD bootstrap, informers, cache sync barrier, worker pool, graceful drain.

use crate::backoff::ExponentialBackoff;
use crate::bootstrap::BootstrapManager;
use crate::cache::ResourceCache;
use crate::config::ControllerConfig;
use crate::error::ControllerError;
use crate::expectations::WriteExpectations;
use crate::queue::RetryQueue;
use crate::reconciler::Reconciler;
use crate::registry::ControllerContext;
use crate::stores::ObjectStores;
use crate::watcher::{EventEnqueuer, run_informer};
use crate::worker::{KeyProcessor, WorkerPool};
use crds::MysqlCluster;
use kube::CustomResourceExt;
use std::sync::Arc;
use store_client::{Event, WatchStream};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Name the controller is registered under
pub const CONTROLLER_NAME: &str = "mysqlcluster";

/// MysqlCluster controller
pub struct Controller {
    config: ControllerConfig,
    stores: ObjectStores,
    bootstrap: BootstrapManager,
    queue: Arc<RetryQueue>,
    clusters: Arc<ResourceCache<MysqlCluster>>,
    expectations: Arc<WriteExpectations>,
    processor: Arc<dyn KeyProcessor>,
}

impl Controller {
    /// Wires a controller from the shared context
    pub fn new(ctx: &ControllerContext) -> Self {
        let config = ctx.config.clone();
        let queue = Arc::new(RetryQueue::new(
            CONTROLLER_NAME,
            ExponentialBackoff::new(config.backoff_base, config.backoff_max),
        ));
        let clusters = Arc::new(ResourceCache::new());
        let expectations = Arc::new(WriteExpectations::new());
        let processor: Arc<dyn KeyProcessor> = Arc::new(Reconciler::new(
            Arc::clone(&clusters),
            ctx.stores.clone(),
            Arc::clone(&ctx.state),
            Arc::clone(&expectations),
        ));
        let bootstrap = BootstrapManager::new(
            Arc::clone(&ctx.registrar),
            config.crd_ready_attempts,
            config.crd_ready_interval,
        );
        Self {
            config,
            stores: ctx.stores.clone(),
            bootstrap,
            queue,
            clusters,
            expectations,
            processor,
        }
    }

    /// Replaces the key processor with one wrapping it
    pub fn wrap_processor<F>(mut self, wrap: F) -> Self
    where
        F: FnOnce(Arc<dyn KeyProcessor>) -> Arc<dyn KeyProcessor>,
    {
        self.processor = wrap(self.processor);
        self
    }

    /// Runs the controller until `stop` fires.
    ///
    /// Bootstrap failures and a stop signal before the cache has synced are
    /// returned as errors; after that the call only returns once every worker
    /// has drained and exited.
    pub async fn start(
        self,
        workers: usize,
        stop: CancellationToken,
    ) -> Result<(), ControllerError> {
        info!("Starting MysqlCluster controller");

        if self.config.skip_bootstrap {
            info!("Skipping CRD bootstrap");
        } else {
            self.bootstrap.ensure_kind(&MysqlCluster::crd(), &stop).await?;
        }

        // Informers outlive `stop` until the workers have drained
        let informer_stop = CancellationToken::new();
        let mut informers = self.spawn_informers(&informer_stop);

        info!("Waiting for informer caches to sync");
        if !self.clusters.wait_for_sync(&stop).await {
            informer_stop.cancel();
            informers.shutdown().await;
            return Err(ControllerError::CacheSync(
                "stop signal received before the MysqlCluster cache synced".to_string(),
            ));
        }

        info!("Informer caches synced, {} MysqlClusters cached", self.clusters.len());

        let pool = WorkerPool::start(
            workers,
            Arc::clone(&self.queue),
            Arc::clone(&self.processor),
            stop.clone(),
        );
        info!("MysqlCluster controller started");

        stop.cancelled().await;
        info!(
            "Shutting down MysqlCluster controller, draining {} queued keys",
            self.queue.len()
        );
        self.queue.shut_down();
        pool.join().await;

        informer_stop.cancel();
        while let Some(res) = informers.join_next().await {
            if let Err(e) = res {
                error!("Informer task failed: {}", e);
            }
        }
        info!("MysqlCluster controller stopped");
        Ok(())
    }

    fn spawn_informers(&self, stop: &CancellationToken) -> JoinSet<()> {
        let namespace = self.config.namespace.as_deref();
        let enqueuer = EventEnqueuer::new(
            Arc::clone(&self.queue),
            Arc::clone(&self.clusters),
            Arc::clone(&self.expectations),
        );
        let mut informers = JoinSet::new();

        let e = enqueuer.clone();
        spawn(
            &mut informers,
            "MysqlCluster",
            self.stores.clusters.watch(namespace),
            stop,
            move |ev| e.on_cluster_event(ev),
        );
        let e = enqueuer.clone();
        spawn(
            &mut informers,
            "StatefulSet",
            self.stores.stateful_sets.watch(namespace),
            stop,
            move |ev| e.on_dependent_event(ev),
        );
        let e = enqueuer.clone();
        spawn(
            &mut informers,
            "Service",
            self.stores.services.watch(namespace),
            stop,
            move |ev| e.on_dependent_event(ev),
        );
        let e = enqueuer.clone();
        spawn(
            &mut informers,
            "ConfigMap",
            self.stores.config_maps.watch(namespace),
            stop,
            move |ev| e.on_dependent_event(ev),
        );
        let e = enqueuer.clone();
        spawn(
            &mut informers,
            "PodDisruptionBudget",
            self.stores.pod_disruption_budgets.watch(namespace),
            stop,
            move |ev| e.on_dependent_event(ev),
        );
        let e = enqueuer;
        spawn(
            &mut informers,
            "Secret",
            self.stores.secrets.watch(namespace),
            stop,
            move |ev| e.on_secret_event(ev),
        );
        informers
    }
}

fn spawn<K, F>(
    set: &mut JoinSet<()>,
    kind: &'static str,
    stream: WatchStream<K>,
    stop: &CancellationToken,
    handle: F,
) where
    K: Send + 'static,
    F: FnMut(&Event<K>) + Send + 'static,
{
    set.spawn(run_informer(kind, stream, stop.clone(), handle));
}
