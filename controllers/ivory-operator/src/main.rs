//! Ivory Operator
//!
//! Runs PostgreSQL clusters described by `IvoryCluster` resources and moves
//! them between major versions through `IvoryUpgrade` resources.

mod backoff;
mod config;
mod controller;
mod error;
mod reconciler;
#[cfg(test)]
mod test_utils;
mod watcher;

use crate::config::OperatorConfig;
use crate::error::ControllerError;
use controller::Controller;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,kube=warn".into());
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    if let Err(e) = rustls::crypto::ring::default_provider().install_default() {
        warn!(?e, "rustls crypto provider was already installed");
    }

    info!("Starting Ivory operator");

    let config = OperatorConfig::from_env()?;
    info!("Configuration:");
    info!(
        "  Namespace: {}",
        config.namespace.as_deref().unwrap_or("all namespaces")
    );
    info!("  Concurrency: {}", config.concurrency);
    info!("  Refresh interval: {:?}", config.refresh_interval);
    info!("  Upgrade image: {}", config.upgrade_image);

    let controller = Controller::new(config).await?;
    controller.run().await?;

    Ok(())
}
