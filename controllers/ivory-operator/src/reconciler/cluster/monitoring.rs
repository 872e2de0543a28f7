//! Metrics exporter support: its Secret, its web configuration and the
//! database objects it queries.

use super::intent::{KEY_VERIFIER, monitoring_secret_intent, secret_value, web_config_intent};
use super::observe::{Instance, container_image_id, container_running};
use crate::error::ControllerError;
use crate::reconciler::Reconciler;
use crate::reconciler::apply::{apply, delete_controlled};
use crate::reconciler::exec::PodExecutor;
use crds::naming::{self, CONTAINER_DATABASE, CONTAINER_EXPORTER};
use crds::{IvoryCluster, IvoryClusterStatus, MonitoringStatus};
use ivory::{Executor, ExecError, HashingExecutor, pgmonitor};
use ivory_store::typed::get_as;
use k8s_openapi::api::core::v1::{ConfigMap, Pod, Secret};
use kube::ResourceExt;
use tracing::{debug, info};

/// What the database must look like for the exporter.
enum ExporterAction<'a> {
    Enable { verifier: &'a str },
    Disable,
}

impl ExporterAction<'_> {
    async fn run(&self, exec: &dyn Executor, setup: &str) -> Result<(), ExecError> {
        match self {
            ExporterAction::Enable { verifier } => pgmonitor::enable_exporter(exec, verifier, setup).await,
            ExporterAction::Disable => pgmonitor::disable_exporter(exec).await,
        }
    }
}

impl Reconciler {
    /// Applies the monitoring Secret while the exporter is enabled and
    /// removes it otherwise. Returns the Secret in use.
    pub(super) async fn reconcile_monitoring_secret(
        &self,
        cluster: &IvoryCluster,
    ) -> Result<Option<Secret>, ControllerError> {
        let namespace = cluster
            .namespace()
            .ok_or(ControllerError::MissingObjectKey("namespace"))?;
        let name = naming::monitoring_secret_name(&cluster.name_any());

        if !cluster.exporter_enabled() {
            delete_controlled::<Secret>(self.store.as_ref(), &namespace, &name, cluster.uid().as_deref()).await?;
            return Ok(None);
        }

        let existing = get_as::<Secret>(self.store.as_ref(), &namespace, &name).await?;
        let intent = monitoring_secret_intent(cluster, existing.as_ref(), self.secrets.as_ref());
        Ok(Some(apply(self.store.as_ref(), &intent).await?))
    }

    /// Applies the exporter web configuration while a custom TLS secret is
    /// configured and removes it otherwise.
    pub(super) async fn reconcile_web_config(&self, cluster: &IvoryCluster) -> Result<(), ControllerError> {
        if cluster.exporter_tls_secret().is_some() {
            apply(self.store.as_ref(), &web_config_intent(cluster)).await?;
            return Ok(());
        }
        let namespace = cluster
            .namespace()
            .ok_or(ControllerError::MissingObjectKey("namespace"))?;
        delete_controlled::<ConfigMap>(
            self.store.as_ref(),
            &namespace,
            &naming::exporter_web_config_name(&cluster.name_any()),
            cluster.uid().as_deref(),
        )
        .await
    }

    /// Creates or disables the exporter's database objects on the writable
    /// pod, skipping the work when nothing changed since the last success.
    pub(super) async fn reconcile_exporter_sql(
        &self,
        cluster: &IvoryCluster,
        monitoring_secret: Option<&Secret>,
        (instance, pod): (&Instance, &Pod),
        status: &mut IvoryClusterStatus,
    ) -> Result<(), ControllerError> {
        let enabled = cluster.exporter_enabled();
        if enabled && container_running(pod, CONTAINER_EXPORTER) != Some(true) {
            debug!(instance = %instance.name, "exporter not running yet");
            return Ok(());
        }

        let Some(database_image) = container_image_id(pod, CONTAINER_DATABASE) else {
            return Ok(());
        };
        let exporter_image = if enabled {
            match container_image_id(pod, CONTAINER_EXPORTER) {
                Some(id) => id,
                None => return Ok(()),
            }
        } else {
            ""
        };

        let verifier = monitoring_secret.and_then(|s| secret_value(s, KEY_VERIFIER));
        let action = match (enabled, verifier.as_deref()) {
            (true, Some(verifier)) => ExporterAction::Enable { verifier },
            (true, None) => return Ok(()),
            (false, _) => ExporterAction::Disable,
        };

        // The setup script comes from the exporter image, so its image ID
        // stands in for the script itself.
        let hashing = HashingExecutor::new([database_image, exporter_image]);
        action.run(&hashing, "").await?;
        let revision = hashing.finish();

        let recorded = status.monitoring.as_ref().and_then(|m| m.exporter_configuration.as_deref());
        if recorded == Some(revision.as_str()) {
            return Ok(());
        }

        let namespace = cluster
            .namespace()
            .ok_or(ControllerError::MissingObjectKey("namespace"))?;
        let pod_name = pod.name_any();

        let setup = if enabled {
            let exporter = PodExecutor::new(self.exec.as_ref(), &namespace, &pod_name, CONTAINER_EXPORTER);
            pgmonitor::exporter_setup_sql(&exporter, cluster.running_version()).await?
        } else {
            String::new()
        };

        let database = PodExecutor::new(self.exec.as_ref(), &namespace, &pod_name, CONTAINER_DATABASE);
        action.run(&database, &setup).await?;

        info!(%namespace, cluster = %cluster.name_any(), enabled, "exporter configured");
        status
            .monitoring
            .get_or_insert_with(MonitoringStatus::default)
            .exporter_configuration = Some(revision);
        Ok(())
    }
}
