//! Test utilities for unit testing reconcilers
//!
//! This module provides helpers for creating test data and setting up test scenarios.

#[cfg(test)]
use crate::config::OperatorConfig;
#[cfg(test)]
use crate::reconciler::Reconciler;
#[cfg(test)]
use crds::naming::*;
#[cfg(test)]
use crds::*;
#[cfg(test)]
use ivory_store::{GeneratedSecret, MockStore, SecretGenerator};
#[cfg(test)]
use k8s_openapi::api::apps::v1::StatefulSet;
#[cfg(test)]
use k8s_openapi::api::batch::v1::{Job, JobCondition, JobStatus};
#[cfg(test)]
use k8s_openapi::api::core::v1::{
    ContainerState, ContainerStateRunning, ContainerStatus, Endpoints, Pod, PodStatus,
};
#[cfg(test)]
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
#[cfg(test)]
use std::collections::BTreeMap;
#[cfg(test)]
use std::sync::Arc;
#[cfg(test)]
use std::sync::atomic::{AtomicUsize, Ordering};

/// Deterministic passwords: `password-1`, `password-2`, ...
#[cfg(test)]
#[derive(Debug, Default)]
pub struct SequentialSecretGenerator {
    next: AtomicUsize,
}

#[cfg(test)]
impl SecretGenerator for SequentialSecretGenerator {
    fn generate(&self) -> GeneratedSecret {
        let n = self.next.fetch_add(1, Ordering::SeqCst) + 1;
        GeneratedSecret {
            password: format!("password-{n}"),
            verifier: format!("verifier-{n}"),
        }
    }
}

/// A reconciler backed by a fresh [`MockStore`]
#[cfg(test)]
pub fn test_reconciler() -> (Reconciler, MockStore) {
    let store = MockStore::new();
    (test_reconciler_with(&store), store)
}

/// A reconciler sharing the state of `store`
#[cfg(test)]
pub fn test_reconciler_with(store: &MockStore) -> Reconciler {
    Reconciler::new(
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        Arc::new(SequentialSecretGenerator::default()),
        OperatorConfig {
            upgrade_image: "example.com/ivory-upgrade:test".to_string(),
            ..Default::default()
        },
    )
}

#[cfg(test)]
fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[cfg(test)]
fn meta(name: &str, namespace: &str, pairs: &[(&str, &str)]) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        labels: Some(labels(pairs)),
        ..Default::default()
    }
}

/// Helper to create a test IvoryCluster with one instance set and a volume repo
#[cfg(test)]
pub fn test_cluster(name: &str, namespace: &str, version: i32) -> IvoryCluster {
    let spec: IvoryClusterSpec = serde_json::from_value(serde_json::json!({
        "ivoryVersion": version,
        "instances": [{"name": "00", "replicas": 2}],
        "backups": {"pgbackrest": {"repos": [{"name": "repo1", "volume": {}}]}},
    }))
    .unwrap();
    let mut cluster = IvoryCluster::new(name, spec);
    cluster.metadata.namespace = Some(namespace.to_string());
    cluster.metadata.uid = Some(format!("{name}-uid"));
    cluster.metadata.generation = Some(1);
    cluster
}

/// Helper to create a test IvoryUpgrade CRD
#[cfg(test)]
pub fn test_upgrade(name: &str, namespace: &str, cluster: &str, from: i32, to: i32) -> IvoryUpgrade {
    let mut upgrade = IvoryUpgrade::new(
        name,
        IvoryUpgradeSpec {
            ivory_cluster_name: cluster.to_string(),
            from_ivory_version: from,
            to_ivory_version: to,
            image: None,
            image_pull_policy: None,
            metadata: None,
        },
    );
    upgrade.metadata.namespace = Some(namespace.to_string());
    upgrade.metadata.uid = Some(format!("{name}-uid"));
    upgrade.metadata.generation = Some(1);
    upgrade
}

/// Helper to create the StatefulSet of an instance
#[cfg(test)]
pub fn test_instance_set(cluster: &str, namespace: &str, instance: &str) -> StatefulSet {
    StatefulSet {
        metadata: meta(
            instance,
            namespace,
            &[(LABEL_CLUSTER, cluster), (LABEL_INSTANCE_SET, "00"), (LABEL_INSTANCE, instance)],
        ),
        ..Default::default()
    }
}

#[cfg(test)]
fn running_container(name: &str, image_id: &str, ready: bool) -> ContainerStatus {
    ContainerStatus {
        name: name.to_string(),
        image_id: image_id.to_string(),
        ready,
        state: Some(ContainerState {
            running: Some(ContainerStateRunning::default()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Helper to create the pod of an instance with running database and exporter containers
#[cfg(test)]
pub fn test_instance_pod(cluster: &str, namespace: &str, instance: &str, role: &str, ready: bool) -> Pod {
    Pod {
        metadata: meta(
            &format!("{instance}-0"),
            namespace,
            &[(LABEL_CLUSTER, cluster), (LABEL_INSTANCE, instance), (LABEL_ROLE, role)],
        ),
        status: Some(PodStatus {
            container_statuses: Some(vec![
                running_container(CONTAINER_DATABASE, "db@sha256:1", ready),
                running_container(CONTAINER_EXPORTER, "exporter@sha256:1", true),
            ]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Replaces the image ID reported for `container`
#[cfg(test)]
pub fn with_image_id(mut pod: Pod, container: &str, image_id: &str) -> Pod {
    if let Some(statuses) = pod.status.as_mut().and_then(|s| s.container_statuses.as_mut()) {
        for status in statuses.iter_mut().filter(|s| s.name == container) {
            status.image_id = image_id.to_string();
        }
    }
    pod
}

/// Outcome of a test job
#[cfg(test)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Running,
    Complete,
    Failed,
}

/// Helper to create a job labelled with its cluster
#[cfg(test)]
pub fn test_job(name: &str, namespace: &str, cluster: &str, extra: &[(&str, &str)], state: JobState) -> Job {
    let mut pairs = vec![(LABEL_CLUSTER, cluster)];
    pairs.extend_from_slice(extra);
    let condition = |type_: &str| JobCondition {
        type_: type_.to_string(),
        status: "True".to_string(),
        ..Default::default()
    };
    Job {
        metadata: meta(name, namespace, &pairs),
        status: Some(JobStatus {
            conditions: match state {
                JobState::Running => None,
                JobState::Complete => Some(vec![condition("Complete")]),
                JobState::Failed => Some(vec![condition("Failed")]),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Helper to create the consensus Endpoints of a cluster
#[cfg(test)]
pub fn test_dcs_endpoints(cluster: &str, namespace: &str, name: &str) -> Endpoints {
    Endpoints {
        metadata: meta(name, namespace, &[(LABEL_CLUSTER, cluster), (LABEL_ROLE, ROLE_DCS)]),
        ..Default::default()
    }
}
