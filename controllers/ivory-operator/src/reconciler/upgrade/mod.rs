//! IvoryUpgrade reconciler
//!
//! Drives a human-supervised major-version upgrade. Every pass re-derives
//! where the upgrade stands from the upgrade spec and a fresh [`World`],
//! walks a fixed sequence of gates, and records the outcome in the
//! `Progressing` and `Succeeded` conditions:
//!
//! 1. `from < to`, else `UpgradeInvalid`
//! 2. the cluster can be observed and exists
//! 3. the cluster does not already declare the target version (`UpgradeResolved`)
//! 4. the cluster has not already been moved to the target (`UpgradeCompleted`)
//! 5. the cluster is shut down with a known primary
//! 6. the cluster runs the `from` version
//! 7. the cluster carries the allow-upgrade annotation naming this upgrade
//! 8. no job has failed
//!
//! Past the gates, jobs are created, and once they all complete the cluster
//! status is moved to the new version.

pub mod jobs;
pub mod world;


use crate::error::ControllerError;
use crate::reconciler::Reconciler;
use crate::reconciler::apply::{delete_exactly, ensure_job};
use crate::reconciler::status::{commit_status, set_status_condition};
use crds::naming::{
    ANNOTATION_ALLOW_UPGRADE, BACKUP_REPLICA_CREATE, LABEL_PGBACKREST_BACKUP, LABEL_ROLE,
    LABEL_UPGRADE, ROLE_REMOVE_DATA,
};
use crds::{
    CONDITION_PROGRESSING, CONDITION_SUCCEEDED, ConditionStatus, IvoryUpgrade, IvoryUpgradeStatus,
    UpgradeReason, find_condition,
};
use ivory_store::{Kind, Propagation};
use kube::ResourceExt;
use kube_runtime::controller::Action;
use std::time::Duration;
use tracing::{debug, info};
use world::{World, job_completed, job_failed, observe_world};

/// Writes `Progressing` with the given status and reason.
fn set_progressing(
    status: &mut IvoryUpgradeStatus,
    generation: Option<i64>,
    condition_status: ConditionStatus,
    reason: UpgradeReason,
    message: impl Into<String>,
) {
    set_status_condition(
        &mut status.conditions,
        CONDITION_PROGRESSING,
        condition_status,
        reason.as_str(),
        message,
        generation,
    );
}

/// Puts `Progressing` back to `True` when it is absent (`reason` is `None`)
/// or was last set by the gate with `reason`, which has now been passed.
fn set_progressing_if_reason_was(
    upgrade: &IvoryUpgrade,
    status: &mut IvoryUpgradeStatus,
    reason: Option<UpgradeReason>,
) {
    let current = find_condition(&status.conditions, CONDITION_PROGRESSING);
    let matches = match (current, reason) {
        (None, _) => true,
        (Some(c), Some(reason)) => c.reason == reason.as_str(),
        (Some(_), None) => false,
    };
    if matches {
        set_progressing(
            status,
            upgrade.metadata.generation,
            ConditionStatus::True,
            UpgradeReason::Progressing,
            format!("Upgrade progressing for cluster {}", upgrade.spec.ivory_cluster_name),
        );
    }
}

/// Job progress of one upgrade, derived from the world.
#[derive(Debug, Clone, Copy, Default)]
struct JobProgress {
    upgrade_complete: bool,
    upgrade_failed: bool,
    remove_data_complete: bool,
    remove_data_failed: bool,
}

fn job_progress(upgrade: &IvoryUpgrade, world: &World) -> JobProgress {
    let name = upgrade.name_any();
    let upgrade_job = world.jobs.get(&crds::naming::upgrade_job_name(&name));

    let mut completed = 0;
    let mut remove_data_failed = false;
    for job in world.jobs.values() {
        let labels = job.labels();
        if labels.get(LABEL_ROLE).map(String::as_str) != Some(ROLE_REMOVE_DATA)
            || labels.get(LABEL_UPGRADE) != Some(&name)
        {
            continue;
        }
        if job_completed(job) {
            completed += 1;
        } else if job_failed(job) {
            remove_data_failed = true;
        }
    }

    JobProgress {
        upgrade_complete: upgrade_job.is_some_and(job_completed),
        upgrade_failed: upgrade_job.is_some_and(job_failed),
        remove_data_complete: completed == world.replicas_expected,
        remove_data_failed,
    }
}

impl Reconciler {
    /// Reconciles one IvoryUpgrade, committing any status change on the way out.
    pub async fn reconcile_upgrade(&self, upgrade: &IvoryUpgrade) -> Result<Action, ControllerError> {
        let name = upgrade.name_any();
        let namespace = upgrade
            .namespace()
            .ok_or(ControllerError::MissingObjectKey("namespace"))?;
        debug!(%namespace, %name, "Reconciling IvoryUpgrade");

        let before = upgrade.status.clone().unwrap_or_default();
        let mut after = before.clone();
        let result = self.drive_upgrade(upgrade, &mut after).await;

        let result = commit_status(
            self.store.as_ref(),
            Kind::IvoryUpgrade,
            &namespace,
            &name,
            &before,
            &after,
            result,
        )
        .await;

        if let Ok(action) = &result {
            info!(%namespace, %name, ?action, "Reconciled IvoryUpgrade");
        }
        result
    }

    async fn drive_upgrade(
        &self,
        upgrade: &IvoryUpgrade,
        status: &mut IvoryUpgradeStatus,
    ) -> Result<Action, ControllerError> {
        let generation = upgrade.metadata.generation;
        let spec = &upgrade.spec;
        let (from, to) = (spec.from_ivory_version, spec.to_ivory_version);
        let cluster_name = &spec.ivory_cluster_name;

        // A succeeded upgrade is never driven again. Running another upgrade
        // takes a new IvoryUpgrade.
        if upgrade.has_succeeded() {
            debug!("upgrade already succeeded");
            return Ok(Action::await_change());
        }

        set_progressing_if_reason_was(upgrade, status, None);

        if from >= to {
            set_progressing(
                status,
                generation,
                ConditionStatus::False,
                UpgradeReason::Invalid,
                format!("Cannot upgrade from ivory version {from} to {to}"),
            );
            return Ok(Action::await_change());
        }

        set_progressing_if_reason_was(upgrade, status, Some(UpgradeReason::Invalid));

        let world = match observe_world(self.store.as_ref(), upgrade).await {
            Ok(world) => world,
            Err(e) => {
                set_progressing(
                    status,
                    generation,
                    ConditionStatus::False,
                    UpgradeReason::ClusterErrorWhenObservingWorld,
                    e.to_string(),
                );
                return Err(e);
            }
        };

        set_progressing_if_reason_was(
            upgrade,
            status,
            Some(UpgradeReason::ClusterErrorWhenObservingWorld),
        );

        // Nothing to do until the cluster is created; its watch wakes us.
        let Some(cluster) = world.cluster.as_ref() else {
            set_progressing(
                status,
                generation,
                ConditionStatus::False,
                UpgradeReason::ClusterNotFound,
                world.cluster_not_found.clone().unwrap_or_default(),
            );
            return Ok(Action::await_change());
        };

        set_progressing_if_reason_was(upgrade, status, Some(UpgradeReason::ClusterNotFound));

        let version = cluster.spec.ivory_version;
        let status_version = cluster.status.as_ref().and_then(|s| s.ivory_version);
        let progress = job_progress(upgrade, &world);

        // The cluster already declares the target version but this upgrade
        // never ran: someone else got it there.
        if version == to && !progress.upgrade_complete {
            set_progressing(
                status,
                generation,
                ConditionStatus::False,
                UpgradeReason::Resolved,
                format!("IvoryCluster {cluster_name} is already running version {to}"),
            );
            return Ok(Action::await_change());
        }

        set_progressing_if_reason_was(upgrade, status, Some(UpgradeReason::Resolved));

        if status_version == Some(to) {
            set_progressing(
                status,
                generation,
                ConditionStatus::False,
                UpgradeReason::Completed,
                format!("IvoryCluster {cluster_name} is running version {to}"),
            );

            if progress.upgrade_complete && progress.remove_data_complete {
                set_status_condition(
                    &mut status.conditions,
                    CONDITION_SUCCEEDED,
                    ConditionStatus::True,
                    UpgradeReason::Succeeded.as_str(),
                    format!("IvoryCluster {cluster_name} is ready to complete upgrade to version {to}"),
                    generation,
                );
            }
            return Ok(Action::await_change());
        }

        // The upgrade rewrites the primary's data directory, so every
        // instance must be stopped and the primary known.
        let Some(primary) = world.primary.as_deref().filter(|_| world.shutdown) else {
            set_progressing(
                status,
                generation,
                ConditionStatus::False,
                UpgradeReason::ClusterNotShutdown,
                "IvoryCluster instances still running",
            );
            return Ok(Action::await_change());
        };

        set_progressing_if_reason_was(upgrade, status, Some(UpgradeReason::ClusterNotShutdown));

        if version != from {
            set_progressing(
                status,
                generation,
                ConditionStatus::False,
                UpgradeReason::InvalidForCluster,
                format!("Current ivory version is {version}, but upgrade expected {from}"),
            );
            return Ok(Action::await_change());
        }

        set_progressing_if_reason_was(upgrade, status, Some(UpgradeReason::InvalidForCluster));

        // One upgrade per cluster, and only with the consent of whoever can
        // edit the cluster.
        if cluster.annotations().get(ANNOTATION_ALLOW_UPGRADE) != Some(&upgrade.name_any()) {
            set_progressing(
                status,
                generation,
                ConditionStatus::False,
                UpgradeReason::ClusterMissingRequiredAnnotation,
                format!(
                    "IvoryCluster {cluster_name} lacks annotation for upgrade {}",
                    upgrade.name_any()
                ),
            );
            return Ok(Action::await_change());
        }

        set_progressing_if_reason_was(
            upgrade,
            status,
            Some(UpgradeReason::ClusterMissingRequiredAnnotation),
        );

        // Jobs run once, so any failure fails the upgrade.
        if progress.upgrade_failed || progress.remove_data_failed {
            set_status_condition(
                &mut status.conditions,
                CONDITION_SUCCEEDED,
                ConditionStatus::False,
                UpgradeReason::Failed.as_str(),
                "Upgrade jobs failed, please check individual pod logs",
                generation,
            );
            return Ok(Action::await_change());
        }

        if progress.upgrade_complete && progress.remove_data_complete {
            return self.complete_upgrade(upgrade, &world).await;
        }

        let image = jobs::job_image(upgrade, &self.config.upgrade_image);
        if !progress.upgrade_complete {
            ensure_job(self.store.as_ref(), &jobs::upgrade_job(upgrade, cluster, primary, image)).await?;
        } else {
            for replica in &world.replicas {
                ensure_job(
                    self.store.as_ref(),
                    &jobs::remove_data_job(upgrade, cluster, replica, image),
                )
                .await?;
            }
        }

        // The upgraded data has a new system identifier; the HA agent must
        // forget the old one before it starts the primary. Safe while every
        // agent is stopped.
        if !world.consensus_endpoints.is_empty() {
            for endpoints in &world.consensus_endpoints {
                delete_exactly(self.store.as_ref(), endpoints, None).await?;
            }
            return Ok(Action::requeue(Duration::ZERO));
        }

        Ok(Action::requeue(self.config.refresh_interval))
    }

    /// Deletes the replica-create backup jobs so a fresh backup is taken,
    /// then moves the cluster status to the new version.
    async fn complete_upgrade(&self, upgrade: &IvoryUpgrade, world: &World) -> Result<Action, ControllerError> {
        let Some(cluster) = world.cluster.as_ref() else {
            return Ok(Action::await_change());
        };
        let namespace = cluster
            .namespace()
            .ok_or(ControllerError::MissingObjectKey("namespace"))?;

        for job in world.jobs.values() {
            if job.labels().get(LABEL_PGBACKREST_BACKUP).map(String::as_str) == Some(BACKUP_REPLICA_CREATE) {
                // Jobs orphan their pods unless told otherwise.
                delete_exactly(self.store.as_ref(), job, Some(Propagation::Background)).await?;
            }
        }

        let patch = serde_json::json!({
            "status": {
                "ivoryVersion": upgrade.spec.to_ivory_version,
                "pgbackrest": { "repos": [] },
            }
        });
        self.store
            .patch_status(Kind::IvoryCluster, &namespace, &cluster.name_any(), &patch)
            .await?;
        info!(
            %namespace,
            cluster = %cluster.name_any(),
            version = upgrade.spec.to_ivory_version,
            "cluster upgraded"
        );
        Ok(Action::await_change())
    }
}
