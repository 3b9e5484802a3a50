//! MysqlCluster CRD Definitions
//!
//! Kubernetes Custom Resource Definitions for the MySQL cluster controller.

pub mod mysql_cluster;

pub use mysql_cluster::*;
