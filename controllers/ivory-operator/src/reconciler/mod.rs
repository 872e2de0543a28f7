//! Reconciliation logic for the Ivory CRDs.
//!
//! - `cluster`: IvoryCluster configuration, monitoring, users and stanza
//! - `upgrade`: the IvoryUpgrade state machine
//! - `apply`, `status`: idempotent writes and status commits shared by both

pub mod apply;
pub mod cluster;
pub mod exec;
pub mod status;
pub mod upgrade;

use crate::backoff::FibonacciBackoff;
use crate::config::OperatorConfig;
use ivory_store::{ObjectStore, PodExec, SecretGenerator};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::warn;

/// Backoff state for a resource
#[derive(Debug, Clone)]
struct BackoffState {
    backoff: FibonacciBackoff,
    error_count: u32,
}

impl BackoffState {
    fn new() -> Self {
        Self {
            backoff: FibonacciBackoff::default(),
            error_count: 0,
        }
    }

    fn increment_error(&mut self) {
        self.error_count += 1;
    }
}

/// Reconciles IvoryClusters and IvoryUpgrades.
pub struct Reconciler {
    pub(crate) store: Arc<dyn ObjectStore>,
    pub(crate) exec: Arc<dyn PodExec>,
    pub(crate) secrets: Arc<dyn SecretGenerator>,
    pub(crate) config: OperatorConfig,
    /// Error count tracking per resource (kind/namespace/name -> BackoffState)
    backoff_states: Arc<Mutex<HashMap<String, BackoffState>>>,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        exec: Arc<dyn PodExec>,
        secrets: Arc<dyn SecretGenerator>,
        config: OperatorConfig,
    ) -> Self {
        Self {
            store,
            exec,
            secrets,
            config,
            backoff_states: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Get the Fibonacci backoff duration for a resource based on its error count
    ///
    /// Returns (backoff_seconds, error_count)
    pub fn get_backoff_for_resource(&self, resource_key: &str) -> (u64, u32) {
        match self.backoff_states.lock() {
            Ok(mut states) => {
                let state = states
                    .entry(resource_key.to_string())
                    .or_insert_with(BackoffState::new);
                (state.backoff.next_backoff_seconds(), state.error_count)
            }
            Err(e) => {
                warn!("Failed to lock backoff_states: {}, using default backoff", e);
                (crate::backoff::MIN_BACKOFF_SECONDS, 0)
            }
        }
    }

    /// Increment error count for a resource
    pub fn increment_error(&self, resource_key: &str) {
        if let Ok(mut states) = self.backoff_states.lock() {
            states
                .entry(resource_key.to_string())
                .or_insert_with(BackoffState::new)
                .increment_error();
        }
    }

    /// Forget the backoff of a resource (on successful reconciliation, or
    /// once the resource is gone)
    pub fn reset_error(&self, resource_key: &str) {
        if let Ok(mut states) = self.backoff_states.lock() {
            states.remove(resource_key);
        }
    }

    /// Number of resources with backoff state
    #[cfg(test)]
    fn tracked_resources(&self) -> usize {
        self.backoff_states.lock().map(|s| s.len()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use crate::test_utils::*;

    #[test]
    fn test_backoff_per_resource() {
        let (reconciler, _) = test_reconciler();

        reconciler.increment_error("IvoryCluster/ns/a");
        assert_eq!(reconciler.get_backoff_for_resource("IvoryCluster/ns/a"), (5, 1));
        reconciler.increment_error("IvoryCluster/ns/a");
        assert_eq!(reconciler.get_backoff_for_resource("IvoryCluster/ns/a"), (5, 2));
        reconciler.increment_error("IvoryCluster/ns/a");
        assert_eq!(reconciler.get_backoff_for_resource("IvoryCluster/ns/a"), (10, 3));

        // Other resources are unaffected
        assert_eq!(reconciler.get_backoff_for_resource("IvoryCluster/ns/b"), (5, 0));

        reconciler.reset_error("IvoryCluster/ns/a");
        assert_eq!(reconciler.get_backoff_for_resource("IvoryCluster/ns/a"), (5, 0));
    }

    #[test]
    fn test_reset_drops_backoff_state() {
        let (reconciler, _) = test_reconciler();

        reconciler.increment_error("IvoryUpgrade/ns/up");
        reconciler.increment_error("IvoryCluster/ns/hippo");
        assert_eq!(reconciler.tracked_resources(), 2);

        reconciler.reset_error("IvoryUpgrade/ns/up");
        reconciler.reset_error("IvoryCluster/ns/gone");
        assert_eq!(reconciler.tracked_resources(), 1);

        reconciler.reset_error("IvoryCluster/ns/hippo");
        assert_eq!(reconciler.tracked_resources(), 0);
    }
}
