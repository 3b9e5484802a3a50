//! Desired state of a cluster's dependent objects.
//!
//! [`StateComputer`] is a pure function of the cluster object: no I/O and no
//! reads of the observed world. The reconciler diffs its output against what
//! the object store holds.

use crate::error::ControllerError;
use crds::{Component, MysqlCluster};
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{ConfigMap, Service};
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use kube::Resource;
use serde_json::{Value, json};
use std::collections::BTreeMap;

/// MySQL client port
pub const MYSQL_PORT: i32 = 3306;

/// Key of the rendered configuration inside the cluster ConfigMap
pub const MY_CNF_KEY: &str = "my.cnf";

/// Key in the credentials Secret holding the root password
pub const ROOT_PASSWORD_KEY: &str = "ROOT_PASSWORD";

const ROLE_LABEL: &str = "mysql.microscaler.io/role";

/// One desired instance of each dependent kind
#[derive(Debug, Clone, PartialEq)]
pub struct DependentResourceSet {
    pub stateful_set: StatefulSet,
    pub headless_service: Service,
    pub master_service: Service,
    pub config_map: ConfigMap,
    pub pod_disruption_budget: PodDisruptionBudget,
}

/// Computes the dependent objects implied by a cluster spec
pub trait StateComputer: Send + Sync {
    fn desired_state(
        &self,
        cluster: &MysqlCluster,
    ) -> Result<DependentResourceSet, ControllerError>;
}

/// Default MySQL topology: a StatefulSet fronted by a headless and a master Service
#[derive(Debug, Clone)]
pub struct MysqlStateComputer {
    image: String,
    service_account: String,
}

impl MysqlStateComputer {
    pub fn new(image: impl Into<String>, service_account: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            service_account: service_account.into(),
        }
    }

    fn metadata(
        &self,
        cluster: &MysqlCluster,
        component: Component,
    ) -> Result<Value, ControllerError> {
        let mut meta = json!({
            "name": cluster.name_for(component),
            "namespace": cluster.metadata.namespace.as_deref().unwrap_or_default(),
            "labels": cluster.selector_labels(),
        });
        if let Some(owner) = cluster.controller_owner_ref(&()) {
            meta["ownerReferences"] = json!([serde_json::to_value(owner)?]);
        }
        Ok(meta)
    }

    fn stateful_set(&self, cluster: &MysqlCluster) -> Result<StatefulSet, ControllerError> {
        let labels = cluster.selector_labels();
        let manifest = json!({
            "apiVersion": "apps/v1",
            "kind": "StatefulSet",
            "metadata": self.metadata(cluster, Component::StatefulSet)?,
            "spec": {
                "replicas": cluster.spec.replicas,
                "serviceName": cluster.name_for(Component::HeadlessService),
                "selector": { "matchLabels": labels },
                "template": {
                    "metadata": { "labels": labels },
                    "spec": {
                        "serviceAccountName": self.service_account,
                        "containers": [{
                            "name": "mysql",
                            "image": self.image,
                            "ports": [{ "name": "mysql", "containerPort": MYSQL_PORT }],
                            "env": [{
                                "name": "MYSQL_ROOT_PASSWORD",
                                "valueFrom": { "secretKeyRef": {
                                    "name": cluster.spec.secret_name,
                                    "key": ROOT_PASSWORD_KEY,
                                }},
                            }],
                            "volumeMounts": [{ "name": "conf", "mountPath": "/etc/mysql/conf.d" }],
                        }],
                        "volumes": [{
                            "name": "conf",
                            "configMap": { "name": cluster.name_for(Component::ConfigMap) },
                        }],
                    },
                },
            },
        });
        Ok(serde_json::from_value(manifest)?)
    }

    fn service(
        &self,
        cluster: &MysqlCluster,
        component: Component,
    ) -> Result<Service, ControllerError> {
        let mut selector = cluster.selector_labels();
        let mut spec = json!({
            "ports": [{ "name": "mysql", "port": MYSQL_PORT, "targetPort": MYSQL_PORT }],
        });
        if component == Component::HeadlessService {
            spec["clusterIP"] = json!("None");
            spec["publishNotReadyAddresses"] = json!(true);
        } else {
            selector.insert(ROLE_LABEL.to_string(), "master".to_string());
        }
        spec["selector"] = json!(selector);
        let manifest = json!({
            "apiVersion": "v1",
            "kind": "Service",
            "metadata": self.metadata(cluster, component)?,
            "spec": spec,
        });
        Ok(serde_json::from_value(manifest)?)
    }

    fn config_map(&self, cluster: &MysqlCluster) -> Result<ConfigMap, ControllerError> {
        let manifest = json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": self.metadata(cluster, Component::ConfigMap)?,
            "data": { (MY_CNF_KEY): render_my_cnf(&cluster.spec.mysql_conf) },
        });
        Ok(serde_json::from_value(manifest)?)
    }

    fn pod_disruption_budget(
        &self,
        cluster: &MysqlCluster,
    ) -> Result<PodDisruptionBudget, ControllerError> {
        let manifest = json!({
            "apiVersion": "policy/v1",
            "kind": "PodDisruptionBudget",
            "metadata": self.metadata(cluster, Component::PodDisruptionBudget)?,
            "spec": {
                "maxUnavailable": cluster.spec.max_unavailable.unwrap_or(1),
                "selector": { "matchLabels": cluster.selector_labels() },
            },
        });
        Ok(serde_json::from_value(manifest)?)
    }
}

impl StateComputer for MysqlStateComputer {
    fn desired_state(
        &self,
        cluster: &MysqlCluster,
    ) -> Result<DependentResourceSet, ControllerError> {
        Ok(DependentResourceSet {
            stateful_set: self.stateful_set(cluster)?,
            headless_service: self.service(cluster, Component::HeadlessService)?,
            master_service: self.service(cluster, Component::MasterService)?,
            config_map: self.config_map(cluster)?,
            pod_disruption_budget: self.pod_disruption_budget(cluster)?,
        })
    }
}

/// Renders the `[mysqld]` section; user settings override the defaults
pub fn render_my_cnf(overrides: &BTreeMap<String, String>) -> String {
    let mut settings: BTreeMap<&str, &str> = BTreeMap::from([
        ("character-set-server", "utf8mb4"),
        ("default-storage-engine", "InnoDB"),
        ("log-bin", "mysql-bin"),
        ("skip-name-resolve", "ON"),
    ]);
    settings.extend(overrides.iter().map(|(k, v)| (k.as_str(), v.as_str())));

    let mut out = String::from("[mysqld]\n");
    for (key, value) in settings {
        out.push_str(key);
        out.push_str(" = ");
        out.push_str(value);
        out.push('\n');
    }
    out
}
