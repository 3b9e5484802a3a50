//! MysqlCluster CRD
//!
//! Declares a replicated MySQL cluster. The controller owns the status;
//! everything under `spec` is user intent.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// API group of the MysqlCluster CRD
pub const GROUP: &str = "mysql.microscaler.io";

/// Fully qualified CRD name (`<plural>.<group>`)
pub const CRD_NAME: &str = "mysqlclusters.mysql.microscaler.io";

/// Label carried by every dependent object, valued with the owning cluster name
pub const CLUSTER_LABEL: &str = "mysql.microscaler.io/cluster";

/// Pod-template annotation holding the ConfigMap resource version
pub const CONFIG_REV_ANNOTATION: &str = "config_rev";

/// Pod-template annotation holding the credentials Secret resource version
pub const SECRET_REV_ANNOTATION: &str = "secret_rev";

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[kube(
    group = "mysql.microscaler.io",
    version = "v1alpha1",
    kind = "MysqlCluster",
    plural = "mysqlclusters",
    shortname = "mysql",
    namespaced,
    status = "MysqlClusterStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct MysqlClusterSpec {
    /// Number of MySQL nodes
    #[serde(default = "default_replicas")]
    pub replicas: i32,

    /// Name of the Secret holding the cluster credentials (e.g. ROOT_PASSWORD)
    pub secret_name: String,

    /// Extra `my.cnf` settings, rendered into the cluster ConfigMap
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub mysql_conf: BTreeMap<String, String>,

    /// Maximum number of unavailable nodes tolerated by the disruption budget
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_unavailable: Option<i32>,
}

fn default_replicas() -> i32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MysqlClusterStatus {
    /// Latest observations of the cluster state
    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// Number of nodes reporting ready
    #[serde(default)]
    pub ready_nodes: i32,
}

/// Condition represents one typed observation of the cluster
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition
    #[schemars(with = "String")]
    pub r#type: ClusterConditionType,

    /// Status of the condition (True, False, Unknown)
    pub status: ConditionStatus,

    /// Machine-readable reason for the last status
    #[serde(default)]
    pub reason: String,

    /// Human-readable details
    #[serde(default)]
    pub message: String,

    /// Time of the last status flip
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<chrono::DateTime<chrono::Utc>>,
}

/// Condition type. Types this controller does not manage are kept verbatim.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(from = "String", into = "String")]
pub enum ClusterConditionType {
    /// All nodes are running and ready
    Ready,
    Other(String),
}

impl ClusterConditionType {
    pub fn as_str(&self) -> &str {
        match self {
            ClusterConditionType::Ready => "Ready",
            ClusterConditionType::Other(other) => other,
        }
    }
}

impl From<String> for ClusterConditionType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "Ready" => ClusterConditionType::Ready,
            _ => ClusterConditionType::Other(value),
        }
    }
}

impl From<ClusterConditionType> for String {
    fn from(value: ClusterConditionType) -> Self {
        match value {
            ClusterConditionType::Ready => "Ready".to_string(),
            ClusterConditionType::Other(other) => other,
        }
    }
}

impl std::fmt::Display for ClusterConditionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub enum ConditionStatus {
    True,
    False,
    #[default]
    Unknown,
}

/// Dependent objects created for every cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Component {
    StatefulSet,
    HeadlessService,
    MasterService,
    ConfigMap,
    PodDisruptionBudget,
}

impl MysqlCluster {
    /// Name of a dependent object, following `<cluster-name>-mysql[-suffix]`
    pub fn name_for(&self, component: Component) -> String {
        let name = self.metadata.name.as_deref().unwrap_or_default();
        match component {
            Component::HeadlessService => format!("{name}-mysql-nodes"),
            Component::MasterService => format!("{name}-mysql-master"),
            Component::StatefulSet | Component::ConfigMap | Component::PodDisruptionBudget => {
                format!("{name}-mysql")
            }
        }
    }

    /// Labels stamped on every dependent object and used as pod selector
    pub fn selector_labels(&self) -> BTreeMap<String, String> {
        let name = self.metadata.name.clone().unwrap_or_default();
        BTreeMap::from([
            ("app.kubernetes.io/name".to_string(), "mysql".to_string()),
            (CLUSTER_LABEL.to_string(), name),
        ])
    }

    /// Looks up a condition by type
    pub fn condition(&self, condition_type: ClusterConditionType) -> Option<&Condition> {
        self.status
            .as_ref()?
            .conditions
            .iter()
            .find(|c| c.r#type == condition_type)
    }
}
