//! Job intents of an upgrade.
//!
//! One job upgrades the primary's data directory in place. After it
//! completes, one job per replica removes that replica's old data so the
//! replica is re-created from a fresh backup.

use crds::naming::{
    self, CONTAINER_PG_UPGRADE, LABEL_CLUSTER, LABEL_ROLE, LABEL_UPGRADE,
    ROLE_PG_UPGRADE, ROLE_REMOVE_DATA,
};
use crds::{IvoryCluster, IvoryUpgrade};
use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{
    Container, EnvVar, PersistentVolumeClaimVolumeSource, PodSpec, PodTemplateSpec, Volume,
    VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::{Resource, ResourceExt};
use std::collections::BTreeMap;

const DATA_VOLUME: &str = "ivory-data";

const UPGRADE_SCRIPT: &str = r#"
declare -r data_volume="$1" old_version="$2" new_version="$3"
declare -r old_bin="/usr/ivory/${old_version}/bin" new_bin="/usr/ivory/${new_version}/bin"
declare -r old_data="${data_volume}/pg${old_version}" new_data="${data_volume}/pg${new_version}"
test -d "${old_data}"
rm -rf "${new_data}"
"${new_bin}/initdb" --pgdata="${new_data}" --allow-group-access --encoding=UTF8 --data-checksums
cd "${data_volume}"
"${new_bin}/pg_upgrade" --link \
    --old-bindir="${old_bin}" --new-bindir="${new_bin}" \
    --old-datadir="${old_data}" --new-datadir="${new_data}"
echo "Upgraded ${old_data} to ${new_data}"
"#;

const REMOVE_DATA_SCRIPT: &str = r#"
declare -r data_volume="$1" old_version="$2"
rm -rf "${data_volume}/pg${old_version}" "${data_volume}/pg${old_version}_wal"
echo "Removed ${data_volume}/pg${old_version}"
"#;

fn job_labels(upgrade: &IvoryUpgrade, cluster: &str, role: &str) -> BTreeMap<String, String> {
    let empty = BTreeMap::new();
    naming::merge(&[
        upgrade.spec.metadata.as_ref().map_or(&empty, |m| &m.labels),
        &BTreeMap::from([
            (LABEL_CLUSTER.to_string(), cluster.to_string()),
            (LABEL_ROLE.to_string(), role.to_string()),
            (LABEL_UPGRADE.to_string(), upgrade.name_any()),
        ]),
    ])
}

/// Image of the jobs: the upgrade's own, else the operator default.
pub fn job_image<'a>(upgrade: &'a IvoryUpgrade, default: &'a str) -> &'a str {
    upgrade.spec.image.as_deref().unwrap_or(default)
}

fn job(
    upgrade: &IvoryUpgrade,
    cluster: &IvoryCluster,
    name: String,
    role: &str,
    instance: &str,
    image: &str,
    command: Vec<String>,
) -> Job {
    let labels = job_labels(upgrade, &cluster.name_any(), role);
    let annotations = upgrade
        .spec
        .metadata
        .as_ref()
        .map(|m| m.annotations.clone())
        .filter(|a| !a.is_empty());

    let container = Container {
        name: CONTAINER_PG_UPGRADE.to_string(),
        image: Some(image.to_string()),
        image_pull_policy: upgrade.spec.image_pull_policy.clone(),
        command: Some(command),
        env: Some(vec![EnvVar {
            name: "PGDATA".to_string(),
            value: Some(ivory::data_directory(upgrade.spec.to_ivory_version)),
            ..Default::default()
        }]),
        volume_mounts: Some(vec![VolumeMount {
            name: DATA_VOLUME.to_string(),
            mount_path: ivory::DATA_MOUNT_PATH.to_string(),
            ..Default::default()
        }]),
        ..Default::default()
    };

    Job {
        metadata: ObjectMeta {
            name: Some(name),
            namespace: upgrade.namespace(),
            labels: Some(labels.clone()),
            annotations: annotations.clone(),
            owner_references: upgrade.controller_owner_ref(&()).map(|r| vec![r]),
            ..Default::default()
        },
        spec: Some(JobSpec {
            // Jobs run once; a failure fails the upgrade.
            backoff_limit: Some(0),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    annotations,
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    restart_policy: Some("Never".to_string()),
                    containers: vec![container],
                    volumes: Some(vec![Volume {
                        name: DATA_VOLUME.to_string(),
                        persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                            claim_name: naming::instance_pgdata_claim(instance),
                            read_only: None,
                        }),
                        ..Default::default()
                    }]),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        status: None,
    }
}

/// The job upgrading the primary's data directory, `<upgrade>-pgdata`.
pub fn upgrade_job(upgrade: &IvoryUpgrade, cluster: &IvoryCluster, primary: &str, image: &str) -> Job {
    let command = [
        "bash",
        "-ceu",
        "--",
        UPGRADE_SCRIPT,
        "upgrade",
        ivory::DATA_MOUNT_PATH,
        &upgrade.spec.from_ivory_version.to_string(),
        &upgrade.spec.to_ivory_version.to_string(),
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();

    job(
        upgrade,
        cluster,
        naming::upgrade_job_name(&upgrade.name_any()),
        ROLE_PG_UPGRADE,
        primary,
        image,
        command,
    )
}

/// The job removing a replica's old data, `<upgrade>-<replica>`.
pub fn remove_data_job(upgrade: &IvoryUpgrade, cluster: &IvoryCluster, replica: &str, image: &str) -> Job {
    let command = [
        "bash",
        "-ceu",
        "--",
        REMOVE_DATA_SCRIPT,
        "remove",
        ivory::DATA_MOUNT_PATH,
        &upgrade.spec.from_ivory_version.to_string(),
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();

    job(
        upgrade,
        cluster,
        naming::remove_data_job_name(&upgrade.name_any(), replica),
        ROLE_REMOVE_DATA,
        replica,
        image,
        command,
    )
}
