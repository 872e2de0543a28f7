//! The upgrade's view of its cluster.
//!
//! [`observe_world`] reads everything one upgrade pass decides on and
//! returns it as an immutable [`World`]. It never writes.

use crate::error::ControllerError;
use crate::reconciler::cluster::observe::observe_instances;
use crds::naming::{LABEL_CLUSTER, LABEL_ROLE, ROLE_DCS};
use crds::{IvoryCluster, IvoryUpgrade};
use ivory_store::typed::{get_as, list_as};
use ivory_store::{LabelSelector, ObjectStore};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Endpoints;
use kube::ResourceExt;
use std::collections::BTreeMap;

/// Snapshot of the cluster an upgrade targets.
#[derive(Debug, Clone, Default)]
pub struct World {
    pub cluster: Option<IvoryCluster>,
    /// Set when the cluster does not exist
    pub cluster_not_found: Option<String>,
    /// Jobs labelled with the cluster, by name
    pub jobs: BTreeMap<String, Job>,
    /// No instance pods are running
    pub shutdown: bool,
    /// The instance whose data is upgraded
    pub primary: Option<String>,
    /// Every other instance; their data is removed after the upgrade
    pub replicas: Vec<String>,
    /// Endpoints the HA agent uses for consensus
    pub consensus_endpoints: Vec<Endpoints>,
    pub replicas_expected: usize,
}

fn job_condition(job: &Job, type_: &str) -> bool {
    job.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .is_some_and(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == type_ && c.status == "True")
        })
}

/// The job ran to completion.
pub fn job_completed(job: &Job) -> bool {
    job_condition(job, "Complete")
}

/// The job gave up.
pub fn job_failed(job: &Job) -> bool {
    job_condition(job, "Failed")
}

/// Reads the cluster named by `upgrade` and the objects around it.
pub async fn observe_world(
    store: &dyn ObjectStore,
    upgrade: &IvoryUpgrade,
) -> Result<World, ControllerError> {
    let namespace = upgrade
        .namespace()
        .ok_or(ControllerError::MissingObjectKey("namespace"))?;
    let name = &upgrade.spec.ivory_cluster_name;

    let Some(cluster) = get_as::<IvoryCluster>(store, &namespace, name).await? else {
        return Ok(World {
            cluster_not_found: Some(format!("IvoryCluster {namespace}/{name} not found")),
            ..Default::default()
        });
    };

    let jobs: Vec<Job> = list_as(store, &namespace, &LabelSelector::new().eq(LABEL_CLUSTER, name)).await?;
    let jobs = jobs.into_iter().map(|job| (job.name_any(), job)).collect();

    let instances = observe_instances(store, &namespace, name).await?;
    let shutdown = instances.pod_count() == 0;

    // While running, the writable pod names the primary. Once everything is
    // stopped, the instance recorded before shutdown is used instead.
    let primary = match instances.writable_pod() {
        Some((instance, _)) => Some(instance.name.clone()),
        None => cluster
            .status
            .as_ref()
            .and_then(|s| s.startup_instance.as_deref())
            .filter(|startup| instances.find(startup).is_some())
            .map(str::to_string),
    };
    let replicas: Vec<String> = instances
        .names()
        .into_iter()
        .filter(|i| Some(i) != primary.as_ref())
        .collect();

    let consensus_endpoints = list_as(
        store,
        &namespace,
        &LabelSelector::new().eq(LABEL_CLUSTER, name).eq(LABEL_ROLE, ROLE_DCS),
    )
    .await?;

    Ok(World {
        cluster: Some(cluster),
        cluster_not_found: None,
        jobs,
        shutdown,
        primary,
        replicas_expected: replicas.len(),
        replicas,
        consensus_endpoints,
    })
}
