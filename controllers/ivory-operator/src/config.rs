//! Operator configuration read from the environment.

use crate::error::ControllerError;
use std::time::Duration;

pub const DEFAULT_CONCURRENCY: u16 = 4;
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(60 * 60);
pub const DEFAULT_UPGRADE_IMAGE: &str = "registry.microscaler.io/ivory/ivory-upgrade:latest";
pub const DEFAULT_CLUSTER_DOMAIN: &str = "cluster.local";
pub const DEFAULT_FIELD_MANAGER: &str = "ivory-operator";

/// Settings shared by both controllers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperatorConfig {
    /// Namespace to watch; all namespaces when unset
    pub namespace: Option<String>,
    /// Reconciles running at once per controller
    pub concurrency: u16,
    /// Requeue interval after a successful reconcile
    pub refresh_interval: Duration,
    /// Image of upgrade and data cleanup jobs when the upgrade names none
    pub upgrade_image: String,
    pub cluster_domain: String,
    pub field_manager: String,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            namespace: None,
            concurrency: DEFAULT_CONCURRENCY,
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            upgrade_image: DEFAULT_UPGRADE_IMAGE.to_string(),
            cluster_domain: DEFAULT_CLUSTER_DOMAIN.to_string(),
            field_manager: DEFAULT_FIELD_MANAGER.to_string(),
        }
    }
}

impl OperatorConfig {
    /// Reads the configuration from environment variables.
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads the configuration through `lookup`. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ControllerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let concurrency = match get("IVORY_OPERATOR_CONCURRENCY") {
            Some(v) => match v.trim().parse::<u16>() {
                Ok(n) if n > 0 => n,
                _ => {
                    return Err(ControllerError::InvalidConfig(format!(
                        "IVORY_OPERATOR_CONCURRENCY must be a positive integer, got {v:?}"
                    )));
                }
            },
            None => defaults.concurrency,
        };

        let refresh_interval = match get("IVORY_OPERATOR_REFRESH_INTERVAL_SECS") {
            Some(v) => match v.trim().parse::<u64>() {
                Ok(n) if n > 0 => Duration::from_secs(n),
                _ => {
                    return Err(ControllerError::InvalidConfig(format!(
                        "IVORY_OPERATOR_REFRESH_INTERVAL_SECS must be a positive integer, got {v:?}"
                    )));
                }
            },
            None => defaults.refresh_interval,
        };

        Ok(Self {
            namespace: get("WATCH_NAMESPACE"),
            concurrency,
            refresh_interval,
            upgrade_image: get("RELATED_IMAGE_IVORYUPGRADE").unwrap_or(defaults.upgrade_image),
            cluster_domain: get("KUBERNETES_CLUSTER_DOMAIN").unwrap_or(defaults.cluster_domain),
            field_manager: get("IVORY_OPERATOR_FIELD_MANAGER").unwrap_or(defaults.field_manager),
        })
    }
}
