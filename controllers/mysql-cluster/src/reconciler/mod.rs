//! Reconciliation logic for MysqlCluster resources.
//!
//! - `dependents`: create-or-patch of the dependent objects
//! - `status`: Ready condition and status write-back

pub mod dependents;
pub mod status;


use crate::cache::{ResourceCache, split_key};
use crate::error::ControllerError;
use crate::expectations::WriteExpectations;
use crate::state::StateComputer;
use crate::stores::ObjectStores;
use crate::worker::KeyProcessor;
use async_trait::async_trait;
use crds::{CONFIG_REV_ANNOTATION, MysqlCluster, SECRET_REV_ANNOTATION};
use dependents::ensure;
use k8s_openapi::api::apps::v1::StatefulSet;
use std::sync::Arc;
use store_client::object_key;
use tracing::{debug, error, info};

/// Reconciles MysqlCluster resources against their dependent objects.
pub struct Reconciler {
    clusters: Arc<ResourceCache<MysqlCluster>>,
    stores: ObjectStores,
    state: Arc<dyn StateComputer>,
    expectations: Arc<WriteExpectations>,
}

impl Reconciler {
    /// Creates a new reconciler instance.
    pub fn new(
        clusters: Arc<ResourceCache<MysqlCluster>>,
        stores: ObjectStores,
        state: Arc<dyn StateComputer>,
        expectations: Arc<WriteExpectations>,
    ) -> Self {
        Self {
            clusters,
            stores,
            state,
            expectations,
        }
    }

    /// Converges the dependent objects and status of one cluster.
    ///
    /// This method:
    /// 1. Computes the desired dependent objects from the spec
    /// 2. Creates or patches the ConfigMap
    /// 3. Reads the credentials Secret
    /// 4. Stamps the ConfigMap and Secret versions on the pod template, so a
    ///    change to either rolls the pods
    /// 5. Creates or patches the StatefulSet, Services and PodDisruptionBudget
    /// 6. Writes the status if it changed
    ///
    /// Writes only happen for objects that are missing or have drifted.
    pub async fn sync(&self, cluster: &MysqlCluster) -> Result<(), ControllerError> {
        let namespace = cluster.metadata.namespace.as_deref().unwrap_or_default();
        let name = cluster.metadata.name.as_deref().unwrap_or_default();
        debug!("Syncing MysqlCluster {}/{}", namespace, name);

        let mut desired = self.state.desired_state(cluster)?;

        let expectations = self.expectations.as_ref();
        let config_map = ensure(
            self.stores.config_maps.as_ref(),
            expectations,
            namespace,
            &desired.config_map,
        )
        .await?;

        let secret = self
            .stores
            .secrets
            .get_opt(namespace, &cluster.spec.secret_name)
            .await?
            .ok_or_else(|| {
                ControllerError::SecretNotFound(object_key(namespace, &cluster.spec.secret_name))
            })?;

        stamp_revisions(
            &mut desired.stateful_set,
            config_map.metadata.resource_version.as_deref().unwrap_or_default(),
            secret.metadata.resource_version.as_deref().unwrap_or_default(),
        );

        let stateful_set = ensure(
            self.stores.stateful_sets.as_ref(),
            expectations,
            namespace,
            &desired.stateful_set,
        )
        .await?;
        ensure(
            self.stores.services.as_ref(),
            expectations,
            namespace,
            &desired.headless_service,
        )
        .await?;
        ensure(
            self.stores.services.as_ref(),
            expectations,
            namespace,
            &desired.master_service,
        )
        .await?;
        ensure(
            self.stores.pod_disruption_budgets.as_ref(),
            expectations,
            namespace,
            &desired.pod_disruption_budget,
        )
        .await?;

        status::update_status(self.stores.clusters.as_ref(), cluster, &stateful_set).await
    }
}

#[async_trait]
impl KeyProcessor for Reconciler {
    async fn process_key(&self, key: &str) -> Result<(), ControllerError> {
        let (namespace, name) = match split_key(key) {
            Ok(parts) => parts,
            Err(e) => {
                // Permanent: retrying cannot fix a malformed key
                error!("Dropping work item: {}", e);
                return Ok(());
            }
        };

        let Some(cluster) = self.clusters.get(key) else {
            info!("MysqlCluster {}/{} has been deleted", namespace, name);
            return Ok(());
        };

        match self.sync(&cluster).await {
            Err(e) if e.is_not_found() => {
                info!("Object vanished while syncing MysqlCluster {}: {}", key, e);
                Ok(())
            }
            res => res,
        }
    }
}

/// Sets the `config_rev`/`secret_rev` pod-template annotations
fn stamp_revisions(stateful_set: &mut StatefulSet, config_rev: &str, secret_rev: &str) {
    let Some(spec) = stateful_set.spec.as_mut() else {
        return;
    };
    let annotations = spec
        .template
        .metadata
        .get_or_insert_with(Default::default)
        .annotations
        .get_or_insert_with(Default::default);
    annotations.insert(CONFIG_REV_ANNOTATION.to_string(), config_rev.to_string());
    annotations.insert(SECRET_REV_ANNOTATION.to_string(), secret_rev.to_string());
}
