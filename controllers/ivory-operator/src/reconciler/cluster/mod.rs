//! IvoryCluster reconciler
//!
//! Keeps the generated configuration of a cluster applied and, once an
//! instance accepts writes, brings the database itself in line: the
//! pgBackRest stanza, the exporter's objects and the declared users.

pub mod intent;
pub mod monitoring;
pub mod observe;
pub mod stanza;
pub mod users;

#[cfg(test)]
mod cluster_test;

use crate::error::ControllerError;
use crate::reconciler::Reconciler;
use crate::reconciler::apply::apply;
use crate::reconciler::status::{commit_status, set_status_condition};
use crds::{
    CONDITION_CONFIGURATION_READY, CONDITION_WRITABLE_INSTANCE, ConditionStatus, IvoryCluster,
    IvoryClusterStatus,
};
use ivory_store::Kind;
use kube::ResourceExt;
use kube_runtime::controller::Action;
use observe::observe_instances;
use stanza::{StanzaOutcome, align_repo_status};
use std::time::Duration;
use tracing::{debug, info};

/// Wait before retrying a stanza whose configuration is not mounted yet.
pub const STANZA_RETRY_INTERVAL: Duration = Duration::from_secs(10);

pub const REASON_CONFIGURATION_APPLIED: &str = "ConfigurationApplied";
pub const REASON_WRITABLE_INSTANCE: &str = "WritableInstanceFound";
pub const REASON_NO_WRITABLE_INSTANCE: &str = "NoWritableInstance";

impl Reconciler {
    /// Reconciles one IvoryCluster, committing any status change on the way out.
    pub async fn reconcile_cluster(&self, cluster: &IvoryCluster) -> Result<Action, ControllerError> {
        let name = cluster.name_any();
        let namespace = cluster
            .namespace()
            .ok_or(ControllerError::MissingObjectKey("namespace"))?;

        // Owner references take care of everything generated.
        if cluster.metadata.deletion_timestamp.is_some() {
            debug!(%namespace, %name, "IvoryCluster is being deleted");
            return Ok(Action::await_change());
        }
        debug!(%namespace, %name, "Reconciling IvoryCluster");

        let before = cluster.status.clone().unwrap_or_default();
        let mut after = before.clone();
        let result = self.drive_cluster(cluster, &namespace, &mut after).await;

        let result = commit_status(
            self.store.as_ref(),
            Kind::IvoryCluster,
            &namespace,
            &name,
            &before,
            &after,
            result,
        )
        .await;

        if let Ok(action) = &result {
            info!(%namespace, %name, ?action, "Reconciled IvoryCluster");
        }
        result
    }

    async fn drive_cluster(
        &self,
        cluster: &IvoryCluster,
        namespace: &str,
        status: &mut IvoryClusterStatus,
    ) -> Result<Action, ControllerError> {
        let generation = cluster.metadata.generation;
        let store = self.store.as_ref();

        let instances = observe_instances(store, namespace, &cluster.name_any()).await?;

        let config = apply(
            store,
            &pgbackrest::config_map_intent(cluster, &instances.names(), &self.config.cluster_domain),
        )
        .await?;
        let monitoring_secret = self.reconcile_monitoring_secret(cluster).await?;
        self.reconcile_web_config(cluster).await?;
        let users = users::desired_users(cluster);
        let verifiers = self.reconcile_user_secrets(cluster, &users).await?;

        set_status_condition(
            &mut status.conditions,
            CONDITION_CONFIGURATION_READY,
            ConditionStatus::True,
            REASON_CONFIGURATION_APPLIED,
            "Generated configuration is applied",
            generation,
        );

        status.ivory_version.get_or_insert(cluster.spec.ivory_version);
        align_repo_status(cluster, status);
        status.observed_generation = generation;

        let Some((instance, pod)) = instances.writable_pod() else {
            set_status_condition(
                &mut status.conditions,
                CONDITION_WRITABLE_INSTANCE,
                ConditionStatus::False,
                REASON_NO_WRITABLE_INSTANCE,
                "No instance accepts writes",
                generation,
            );
            return Ok(Action::requeue(self.config.refresh_interval));
        };

        status.startup_instance = Some(instance.name.clone());
        set_status_condition(
            &mut status.conditions,
            CONDITION_WRITABLE_INSTANCE,
            ConditionStatus::True,
            REASON_WRITABLE_INSTANCE,
            format!("Instance {} accepts writes", instance.name),
            generation,
        );

        let stanza = self.reconcile_stanza(cluster, &config, pod, status).await?;
        self.reconcile_exporter_sql(cluster, monitoring_secret.as_ref(), (instance, pod), status)
            .await?;
        self.reconcile_users_sql(cluster, &users, &verifiers, pod, status)
            .await?;

        if stanza == StanzaOutcome::ConfigPending {
            return Ok(Action::requeue(STANZA_RETRY_INTERVAL));
        }
        Ok(Action::requeue(self.config.refresh_interval))
    }
}
