//! Per-kind object store handles used by the controller.

use crds::MysqlCluster;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service};
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use std::sync::Arc;
use store_client::{KubeObjectApi, ObjectApi};

/// Object store access for every kind the controller reads or writes
#[derive(Clone)]
pub struct ObjectStores {
    pub clusters: Arc<dyn ObjectApi<MysqlCluster>>,
    pub stateful_sets: Arc<dyn ObjectApi<StatefulSet>>,
    pub services: Arc<dyn ObjectApi<Service>>,
    pub config_maps: Arc<dyn ObjectApi<ConfigMap>>,
    pub secrets: Arc<dyn ObjectApi<Secret>>,
    pub pod_disruption_budgets: Arc<dyn ObjectApi<PodDisruptionBudget>>,
}

impl ObjectStores {
    /// Stores backed by the Kubernetes API
    pub fn kube(client: kube::Client) -> Self {
        Self {
            clusters: Arc::new(KubeObjectApi::new(client.clone())),
            stateful_sets: Arc::new(KubeObjectApi::new(client.clone())),
            services: Arc::new(KubeObjectApi::new(client.clone())),
            config_maps: Arc::new(KubeObjectApi::new(client.clone())),
            secrets: Arc::new(KubeObjectApi::new(client.clone())),
            pod_disruption_budgets: Arc::new(KubeObjectApi::new(client)),
        }
    }
}
