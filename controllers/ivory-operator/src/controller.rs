//! Main controller implementation.
//!
//! Wires the Kubernetes client into the reconciler and runs one watcher
//! task per custom resource.

use crate::config::OperatorConfig;
use crate::error::ControllerError;
use crate::reconciler::Reconciler;
use crate::watcher::Watcher;
use ivory_store::{KubeStore, RandomSecretGenerator, Registry};
use kube::Client;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

/// Runs the IvoryCluster and IvoryUpgrade controllers.
#[derive(Debug)]
pub struct Controller {
    cluster_watcher: JoinHandle<Result<(), ControllerError>>,
    upgrade_watcher: JoinHandle<Result<(), ControllerError>>,
}

impl Controller {
    /// Connects to the cluster and starts both watchers.
    pub async fn new(config: OperatorConfig) -> Result<Self, ControllerError> {
        info!("Initializing Ivory operator");

        let client = Client::try_default().await?;
        let store = Arc::new(KubeStore::new(
            client.clone(),
            &Registry::new(),
            config.field_manager.clone(),
        ));

        let reconciler = Arc::new(Reconciler::new(
            store.clone(),
            store,
            Arc::new(RandomSecretGenerator),
            config.clone(),
        ));
        let watcher = Watcher::new(reconciler, client, config);

        let clusters = watcher.clone();
        let cluster_watcher = tokio::spawn(async move { clusters.watch_clusters().await });
        let upgrade_watcher = tokio::spawn(async move { watcher.watch_upgrades().await });

        Ok(Self {
            cluster_watcher,
            upgrade_watcher,
        })
    }

    /// Runs until either watcher exits.
    pub async fn run(mut self) -> Result<(), ControllerError> {
        info!("Ivory operator running");

        tokio::select! {
            result = &mut self.cluster_watcher => {
                result.map_err(|e| ControllerError::Watch(format!("IvoryCluster watcher panicked: {e}")))??;
            }
            result = &mut self.upgrade_watcher => {
                result.map_err(|e| ControllerError::Watch(format!("IvoryUpgrade watcher panicked: {e}")))??;
            }
        }

        Ok(())
    }
}
