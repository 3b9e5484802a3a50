//! Controller configuration.
//!
//! Values come from environment variables and are passed down explicitly;
//! nothing reads the environment after startup.

use crate::error::ControllerError;
use std::str::FromStr;
use std::time::Duration;

/// Runtime settings for the MysqlCluster Controller
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Namespace to watch (`None` = all namespaces)
    pub namespace: Option<String>,
    /// Service account the MySQL pods run as
    pub service_account: String,
    /// Skip CRD registration when the kind is known to be installed
    pub skip_bootstrap: bool,
    /// Number of concurrent reconcile workers
    pub workers: usize,
    /// First retry delay after a failed reconcile
    pub backoff_base: Duration,
    /// Retry delay ceiling
    pub backoff_max: Duration,
    /// How many times to poll for the CRD to become established
    pub crd_ready_attempts: u32,
    /// Delay between CRD readiness polls
    pub crd_ready_interval: Duration,
    /// Container image for MySQL nodes
    pub mysql_image: String,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            namespace: None,
            service_account: "default".to_string(),
            skip_bootstrap: false,
            workers: 2,
            backoff_base: Duration::from_millis(5),
            backoff_max: Duration::from_secs(1000),
            crd_ready_attempts: 30,
            crd_ready_interval: Duration::from_secs(1),
            mysql_image: "percona:5.7".to_string(),
        }
    }
}

impl ControllerConfig {
    /// Loads configuration from environment variables
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration from an arbitrary key lookup, falling back to defaults
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ControllerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let config = Self {
            namespace: lookup("WATCH_NAMESPACE").filter(|ns| !ns.is_empty()),
            service_account: lookup("SERVICE_ACCOUNT").unwrap_or(defaults.service_account),
            skip_bootstrap: parse(&lookup, "SKIP_CRD_BOOTSTRAP")?
                .unwrap_or(defaults.skip_bootstrap),
            workers: parse(&lookup, "WORKERS")?.unwrap_or(defaults.workers),
            backoff_base: parse(&lookup, "BACKOFF_BASE_MS")?
                .map_or(defaults.backoff_base, Duration::from_millis),
            backoff_max: parse(&lookup, "BACKOFF_MAX_SECS")?
                .map_or(defaults.backoff_max, Duration::from_secs),
            crd_ready_attempts: parse(&lookup, "CRD_READY_ATTEMPTS")?
                .unwrap_or(defaults.crd_ready_attempts),
            crd_ready_interval: parse(&lookup, "CRD_READY_INTERVAL_MS")?
                .map_or(defaults.crd_ready_interval, Duration::from_millis),
            mysql_image: lookup("MYSQL_IMAGE").unwrap_or(defaults.mysql_image),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ControllerError> {
        if self.workers == 0 {
            return Err(ControllerError::InvalidConfig(
                "WORKERS must be at least 1".to_string(),
            ));
        }
        if self.backoff_base > self.backoff_max {
            return Err(ControllerError::InvalidConfig(format!(
                "backoff base {:?} exceeds ceiling {:?}",
                self.backoff_base, self.backoff_max
            )));
        }
        if self.crd_ready_attempts == 0 {
            return Err(ControllerError::InvalidConfig(
                "CRD_READY_ATTEMPTS must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse<F, T>(lookup: &F, key: &str) -> Result<Option<T>, ControllerError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    lookup(key)
        .map(|raw| {
            raw.trim().parse::<T>().map_err(|e| {
                ControllerError::InvalidConfig(format!("{key}={raw:?} is invalid: {e}"))
            })
        })
        .transpose()
}
