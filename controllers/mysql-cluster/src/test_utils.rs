//! Shared fixtures for unit tests.

use crate::bootstrap::SchemaRegistrar;
use crate::error::ControllerError;
use crate::stores::ObjectStores;
use async_trait::async_trait;
use crds::{MysqlCluster, MysqlClusterSpec};
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service};
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use store_client::MockObjectApi;

/// In-memory stores for every kind, sharing one resource version counter
#[derive(Clone)]
pub struct MockStores {
    pub clusters: MockObjectApi<MysqlCluster>,
    pub stateful_sets: MockObjectApi<StatefulSet>,
    pub services: MockObjectApi<Service>,
    pub config_maps: MockObjectApi<ConfigMap>,
    pub secrets: MockObjectApi<Secret>,
    pub pod_disruption_budgets: MockObjectApi<PodDisruptionBudget>,
}

impl MockStores {
    pub fn new() -> Self {
        let versions = Arc::new(AtomicU64::new(1));
        Self {
            clusters: MockObjectApi::with_version_counter(versions.clone()),
            stateful_sets: MockObjectApi::with_version_counter(versions.clone()),
            services: MockObjectApi::with_version_counter(versions.clone()),
            config_maps: MockObjectApi::with_version_counter(versions.clone()),
            secrets: MockObjectApi::with_version_counter(versions.clone()),
            pod_disruption_budgets: MockObjectApi::with_version_counter(versions),
        }
    }

    pub fn object_stores(&self) -> ObjectStores {
        ObjectStores {
            clusters: Arc::new(self.clusters.clone()),
            stateful_sets: Arc::new(self.stateful_sets.clone()),
            services: Arc::new(self.services.clone()),
            config_maps: Arc::new(self.config_maps.clone()),
            secrets: Arc::new(self.secrets.clone()),
            pod_disruption_budgets: Arc::new(self.pod_disruption_budgets.clone()),
        }
    }

    /// Writes issued by the controller to any kind
    pub fn write_count(&self) -> usize {
        self.clusters.write_count()
            + self.stateful_sets.write_count()
            + self.services.write_count()
            + self.config_maps.write_count()
            + self.secrets.write_count()
            + self.pod_disruption_budgets.write_count()
    }
}

/// Cluster `name` in namespace `default`, referencing secret `<name>-secret`
pub fn cluster(name: &str, replicas: i32) -> MysqlCluster {
    MysqlCluster {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some("default".to_string()),
            ..Default::default()
        },
        spec: MysqlClusterSpec {
            replicas,
            secret_name: format!("{name}-secret"),
            mysql_conf: BTreeMap::new(),
            max_unavailable: None,
        },
        status: None,
    }
}

/// Credentials secret `name` in namespace `default`
pub fn secret(name: &str) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some("default".to_string()),
            ..Default::default()
        },
        data: Some(BTreeMap::from([(
            "ROOT_PASSWORD".to_string(),
            ByteString(b"s3cr3t".to_vec()),
        )])),
        ..Default::default()
    }
}

/// Registrar that reports the kind established after a number of polls
pub struct MockRegistrar {
    registered: bool,
    established_after: u32,
    polls: AtomicU32,
    names: Mutex<Vec<String>>,
}

impl MockRegistrar {
    pub fn registered() -> Self {
        Self {
            registered: true,
            established_after: 0,
            polls: AtomicU32::new(0),
            names: Mutex::new(Vec::new()),
        }
    }

    pub fn established_after(polls: u32) -> Self {
        Self {
            registered: false,
            established_after: polls,
            polls: AtomicU32::new(0),
            names: Mutex::new(Vec::new()),
        }
    }

    pub fn register_calls(&self) -> usize {
        self.names.lock().unwrap().len()
    }

    pub fn registered_names(&self) -> Vec<String> {
        self.names.lock().unwrap().clone()
    }

    pub fn polls(&self) -> u32 {
        self.polls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SchemaRegistrar for MockRegistrar {
    async fn is_registered(&self, _name: &str) -> Result<bool, ControllerError> {
        Ok(self.registered)
    }

    async fn register(&self, crd: &CustomResourceDefinition) -> Result<(), ControllerError> {
        self.names
            .lock()
            .unwrap()
            .push(crd.metadata.name.clone().unwrap_or_default());
        Ok(())
    }

    async fn is_established(&self, _name: &str) -> Result<bool, ControllerError> {
        let polls = self.polls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(polls > self.established_after)
    }
}
