//! Status derivation for MysqlCluster.
//!
//! The status is a pure function of the StatefulSet observation and the
//! previous status; it is written back only when it differs.

use crate::conditions::{ConditionUpdate, set_condition};
use crate::error::ControllerError;
use chrono::{DateTime, SubsecRound, Utc};
use crds::{ClusterConditionType, ConditionStatus, MysqlCluster, MysqlClusterStatus};
use k8s_openapi::api::apps::v1::StatefulSet;
use store_client::ObjectApi;
use tracing::{debug, info};

pub const REASON_READY: &str = "StatefulSetReady";
pub const REASON_NOT_READY: &str = "StatefulSetNotReady";

/// Computes the cluster status from the observed StatefulSet.
///
/// Ready is True only when the ready replica count matches both the
/// StatefulSet's and the cluster's declared replicas.
pub fn compute_status(
    cluster: &MysqlCluster,
    stateful_set: &StatefulSet,
    now: DateTime<Utc>,
) -> MysqlClusterStatus {
    let ready_replicas = stateful_set
        .status
        .as_ref()
        .and_then(|s| s.ready_replicas)
        .unwrap_or(0);
    let declared = stateful_set
        .spec
        .as_ref()
        .and_then(|s| s.replicas)
        .unwrap_or(1);

    let update = if ready_replicas == declared && declared == cluster.spec.replicas {
        ConditionUpdate::new(
            ClusterConditionType::Ready,
            ConditionStatus::True,
            REASON_READY,
            format!("{ready_replicas}/{declared} nodes ready"),
        )
    } else {
        ConditionUpdate::new(
            ClusterConditionType::Ready,
            ConditionStatus::False,
            REASON_NOT_READY,
            format!(
                "{ready_replicas}/{declared} nodes ready, {} requested",
                cluster.spec.replicas
            ),
        )
    };

    let existing = cluster
        .status
        .as_ref()
        .map(|s| s.conditions.as_slice())
        .unwrap_or_default();
    MysqlClusterStatus {
        conditions: set_condition(existing, update, now),
        ready_nodes: ready_replicas,
    }
}

/// Writes the derived status if it differs from the observed one.
///
/// The patch carries the cluster's resourceVersion, so a concurrent update
/// turns into a conflict and the whole sync is retried.
pub async fn update_status(
    clusters: &dyn ObjectApi<MysqlCluster>,
    cluster: &MysqlCluster,
    stateful_set: &StatefulSet,
) -> Result<(), ControllerError> {
    let namespace = cluster.metadata.namespace.as_deref().unwrap_or_default();
    let name = cluster.metadata.name.as_deref().unwrap_or_default();

    let status = compute_status(cluster, stateful_set, Utc::now().trunc_subsecs(0));
    if cluster.status.as_ref() == Some(&status) {
        debug!("MysqlCluster {}/{} status unchanged", namespace, name);
        return Ok(());
    }

    let patch = serde_json::json!({
        "metadata": { "resourceVersion": cluster.metadata.resource_version },
        "status": status,
    });
    clusters.patch_status(namespace, name, &patch).await?;
    info!(
        "Updated MysqlCluster {}/{} status: {}/{} nodes ready",
        namespace, name, status.ready_nodes, cluster.spec.replicas
    );
    Ok(())
}
