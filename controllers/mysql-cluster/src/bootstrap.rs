//! CRD registration at startup.
//!
//! The controller installs its own CRD unless told the kind is already there,
//! and refuses to start if the API server does not establish it in time.

use crate::error::ControllerError;
use async_trait::async_trait;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Api, PostParams};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Registers custom resource kinds and reports their readiness
#[async_trait]
pub trait SchemaRegistrar: Send + Sync {
    /// True when a CRD with this name exists
    async fn is_registered(&self, name: &str) -> Result<bool, ControllerError>;

    /// Creates the CRD; an existing one counts as success
    async fn register(&self, crd: &CustomResourceDefinition) -> Result<(), ControllerError>;

    /// True once the API server serves the kind
    async fn is_established(&self, name: &str) -> Result<bool, ControllerError>;
}

/// Registrar backed by the apiextensions API
pub struct KubeSchemaRegistrar {
    api: Api<CustomResourceDefinition>,
}

impl KubeSchemaRegistrar {
    pub fn new(client: kube::Client) -> Self {
        Self {
            api: Api::all(client),
        }
    }
}

#[async_trait]
impl SchemaRegistrar for KubeSchemaRegistrar {
    async fn is_registered(&self, name: &str) -> Result<bool, ControllerError> {
        Ok(self.api.get_opt(name).await?.is_some())
    }

    async fn register(&self, crd: &CustomResourceDefinition) -> Result<(), ControllerError> {
        match self.api.create(&PostParams::default(), crd).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(err)) if err.code == 409 => {
                debug!("CRD {:?} already exists", crd.metadata.name);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn is_established(&self, name: &str) -> Result<bool, ControllerError> {
        let Some(crd) = self.api.get_opt(name).await? else {
            return Ok(false);
        };
        let conditions = crd
            .status
            .and_then(|s| s.conditions)
            .unwrap_or_default();
        for condition in &conditions {
            match (condition.type_.as_str(), condition.status.as_str()) {
                ("Established", "True") => return Ok(true),
                ("NamesAccepted", "False") => {
                    return Err(ControllerError::Bootstrap(format!(
                        "CRD {name} names not accepted: {}",
                        condition.message.as_deref().unwrap_or_default()
                    )));
                }
                _ => {}
            }
        }
        Ok(false)
    }
}

/// Ensures a custom resource kind exists before any informer starts
pub struct BootstrapManager {
    registrar: Arc<dyn SchemaRegistrar>,
    attempts: u32,
    interval: Duration,
}

impl BootstrapManager {
    /// Polls up to `attempts` times, `interval` apart
    pub fn new(registrar: Arc<dyn SchemaRegistrar>, attempts: u32, interval: Duration) -> Self {
        Self {
            registrar,
            attempts,
            interval,
        }
    }

    /// Registers `crd` unless present and waits until it is established.
    ///
    /// Running out of attempts is fatal: the caller must not start serving.
    pub async fn ensure_kind(
        &self,
        crd: &CustomResourceDefinition,
        stop: &CancellationToken,
    ) -> Result<(), ControllerError> {
        let name = crd.metadata.name.as_deref().unwrap_or_default();
        if self.registrar.is_registered(name).await? {
            info!("CRD {} already registered", name);
            return Ok(());
        }

        info!("Creating CRD {}", name);
        self.registrar.register(crd).await?;

        for attempt in 1..=self.attempts {
            if self.registrar.is_established(name).await? {
                info!("CRD {} established", name);
                return Ok(());
            }
            debug!("CRD {} not established yet (attempt {}/{})", name, attempt, self.attempts);
            tokio::select! {
                () = tokio::time::sleep(self.interval) => {}
                () = stop.cancelled() => return Err(ControllerError::Cancelled),
            }
        }

        warn!("CRD {} not established after {} attempts", name, self.attempts);
        Err(ControllerError::Bootstrap(format!(
            "CRD {name} not established after {} attempts",
            self.attempts
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::MockRegistrar;
    use crds::{CRD_NAME, MysqlCluster};
    use kube::CustomResourceExt;

    fn manager(registrar: &Arc<MockRegistrar>, attempts: u32) -> BootstrapManager {
        BootstrapManager::new(registrar.clone(), attempts, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_already_registered_kind_succeeds_immediately() {
        let registrar = Arc::new(MockRegistrar::registered());
        manager(&registrar, 3)
            .ensure_kind(&MysqlCluster::crd(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(registrar.register_calls(), 0);
    }

    #[tokio::test]
    async fn test_registers_and_waits_until_established() {
        let registrar = Arc::new(MockRegistrar::established_after(2));
        manager(&registrar, 5)
            .ensure_kind(&MysqlCluster::crd(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(registrar.register_calls(), 1);
        assert_eq!(registrar.registered_names(), vec![CRD_NAME.to_string()]);
        assert_eq!(registrar.polls(), 3);
    }

    #[tokio::test]
    async fn test_exceeding_attempts_is_fatal() {
        let registrar = Arc::new(MockRegistrar::established_after(10));
        let err = manager(&registrar, 3)
            .ensure_kind(&MysqlCluster::crd(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ControllerError::Bootstrap(_)));
        assert_eq!(registrar.polls(), 3);
    }

    #[tokio::test]
    async fn test_stop_interrupts_polling() {
        let registrar = Arc::new(MockRegistrar::established_after(u32::MAX));
        let stop = CancellationToken::new();
        stop.cancel();
        let err = BootstrapManager::new(registrar, 100, Duration::from_secs(60))
            .ensure_kind(&MysqlCluster::crd(), &stop)
            .await
            .unwrap_err();
        assert!(matches!(err, ControllerError::Cancelled));
    }
}
