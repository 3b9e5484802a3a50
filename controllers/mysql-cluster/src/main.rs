//! MysqlCluster Controller
//!
//! Converges every `MysqlCluster` custom resource into its dependent objects:
//! - StatefulSet running the MySQL nodes
//! - Headless Service for peer discovery and a master Service
//! - ConfigMap with the rendered `my.cnf`
//! - PodDisruptionBudget
//!
//! and reports readiness through the `Ready` status condition.

mod backoff;
mod bootstrap;
mod cache;
mod conditions;
mod config;
mod controller;
mod error;
mod expectations;
mod queue;
mod reconciler;
mod registry;
mod state;
mod stores;
mod watcher;
mod worker;

#[cfg(test)]
mod test_utils;

use anyhow::Context;
use bootstrap::KubeSchemaRegistrar;
use config::ControllerConfig;
use registry::{ControllerContext, ControllerRegistry};
use state::MysqlStateComputer;
use std::sync::Arc;
use stores::ObjectStores;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if rustls::crypto::ring::default_provider().install_default().is_err() {
        warn!("rustls crypto provider was already installed");
    }

    info!("Starting MysqlCluster Controller");

    // Load configuration from environment variables
    let config = ControllerConfig::from_env()?;
    info!("Configuration:");
    info!("  Namespace: {}", config.namespace.as_deref().unwrap_or("all namespaces"));
    info!("  Service account: {}", config.service_account);
    info!("  Workers: {}", config.workers);
    info!("  CRD bootstrap: {}", if config.skip_bootstrap { "skipped" } else { "enabled" });
    info!("  MySQL image: {}", config.mysql_image);

    let client = kube::Client::try_default()
        .await
        .context("failed to create Kubernetes client")?;

    let ctx = ControllerContext {
        state: Arc::new(MysqlStateComputer::new(
            config.mysql_image.clone(),
            config.service_account.clone(),
        )),
        stores: ObjectStores::kube(client.clone()),
        registrar: Arc::new(KubeSchemaRegistrar::new(client)),
        config,
    };

    let stop = CancellationToken::new();
    {
        let stop = stop.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Received shutdown signal");
                    stop.cancel();
                }
                Err(e) => warn!("Failed to listen for shutdown signal: {}", e),
            }
        });
    }

    ControllerRegistry::with_defaults().run_all(&ctx, stop).await?;
    info!("MysqlCluster Controller stopped");
    Ok(())
}
