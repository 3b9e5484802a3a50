//! Controller registry.
//!
//! Factories are registered explicitly at startup and built from a shared
//! [`ControllerContext`]; there is no global registration.

use crate::bootstrap::SchemaRegistrar;
use crate::config::ControllerConfig;
use crate::controller::{CONTROLLER_NAME, Controller};
use crate::error::ControllerError;
use crate::state::StateComputer;
use crate::stores::ObjectStores;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Everything a controller factory needs
#[derive(Clone)]
pub struct ControllerContext {
    pub config: ControllerConfig,
    pub stores: ObjectStores,
    pub registrar: Arc<dyn SchemaRegistrar>,
    pub state: Arc<dyn StateComputer>,
}

/// Builds a controller from the context
pub type ControllerFactory = fn(&ControllerContext) -> Controller;

/// Named controller factories
#[derive(Default)]
pub struct ControllerRegistry {
    factories: BTreeMap<&'static str, ControllerFactory>,
}

impl ControllerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in controller
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(CONTROLLER_NAME, Controller::new);
        registry
    }

    pub fn register(&mut self, name: &'static str, factory: ControllerFactory) {
        self.factories.insert(name, factory);
    }

    /// Registered controller names, sorted
    pub fn names(&self) -> Vec<&'static str> {
        self.factories.keys().copied().collect()
    }

    /// Builds the controller registered under `name`
    pub fn build(
        &self,
        name: &str,
        ctx: &ControllerContext,
    ) -> Result<Controller, ControllerError> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| ControllerError::UnknownController(name.to_string()))?;
        Ok(factory(ctx))
    }

    /// Runs every registered controller until `stop` fires.
    ///
    /// If one controller fails the others are stopped too, and the first
    /// error is returned once all of them have exited.
    pub async fn run_all(
        &self,
        ctx: &ControllerContext,
        stop: CancellationToken,
    ) -> Result<(), ControllerError> {
        let mut running = JoinSet::new();
        for name in self.names() {
            info!("Starting controller {}", name);
            let controller = self.build(name, ctx)?;
            let workers = ctx.config.workers;
            let stop = stop.clone();
            running.spawn(async move { (name, controller.start(workers, stop).await) });
        }

        let mut first_error = None;
        while let Some(joined) = running.join_next().await {
            let result = match joined {
                Ok((name, Err(e))) => {
                    error!("Controller {} failed: {}", name, e);
                    Err(e)
                }
                Ok((name, Ok(()))) => {
                    info!("Controller {} exited", name);
                    Ok(())
                }
                Err(e) => Err(ControllerError::Panic(e.to_string())),
            };
            if let Err(e) = result {
                stop.cancel();
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::MysqlStateComputer;
    use crate::test_utils::{MockRegistrar, MockStores};
    use std::time::Duration;

    fn context(registrar: MockRegistrar) -> ControllerContext {
        ControllerContext {
            config: ControllerConfig {
                crd_ready_attempts: 2,
                crd_ready_interval: Duration::from_millis(1),
                ..Default::default()
            },
            stores: MockStores::new().object_stores(),
            registrar: Arc::new(registrar),
            state: Arc::new(MysqlStateComputer::new("percona:5.7", "default")),
        }
    }

    #[test]
    fn test_defaults_register_mysqlcluster() {
        let registry = ControllerRegistry::with_defaults();
        assert_eq!(registry.names(), vec![CONTROLLER_NAME]);
        assert!(registry.build(CONTROLLER_NAME, &context(MockRegistrar::registered())).is_ok());
        assert!(matches!(
            registry.build("nope", &context(MockRegistrar::registered())),
            Err(ControllerError::UnknownController(_))
        ));
    }

    #[tokio::test]
    async fn test_run_all_returns_bootstrap_failure() {
        let registry = ControllerRegistry::with_defaults();
        let stop = CancellationToken::new();
        let res = tokio::time::timeout(
            Duration::from_secs(2),
            registry.run_all(&context(MockRegistrar::established_after(10)), stop.clone()),
        )
        .await
        .unwrap();
        assert!(matches!(res, Err(ControllerError::Bootstrap(_))));
        assert!(stop.is_cancelled());
    }

    #[tokio::test]
    async fn test_run_all_stops_on_signal() {
        let registry = ControllerRegistry::with_defaults();
        let stop = CancellationToken::new();
        let ctx = context(MockRegistrar::registered());
        let run = {
            let stop = stop.clone();
            tokio::spawn(async move { registry.run_all(&ctx, stop).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        stop.cancel();
        let res = tokio::time::timeout(Duration::from_secs(2), run).await.unwrap().unwrap();
        assert!(res.is_ok());
    }
}
