//! Observation of a cluster's instances.
//!
//! An instance is one StatefulSet and its pod, both labelled with the
//! instance name. Instances are reported in name order.

use crate::error::ControllerError;
use crds::naming::{CONTAINER_DATABASE, LABEL_CLUSTER, LABEL_INSTANCE, LABEL_ROLE, ROLE_PRIMARY};
use ivory_store::LabelSelector;
use ivory_store::ObjectStore;
use ivory_store::typed::list_as;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{ContainerStatus, Pod};
use kube::ResourceExt;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default)]
pub struct Instance {
    pub name: String,
    pub runner: Option<StatefulSet>,
    pub pods: Vec<Pod>,
}

impl Instance {
    /// The pod of this instance that accepts writes, if any.
    pub fn writable_pod(&self) -> Option<&Pod> {
        self.pods.iter().find(|pod| pod_is_writable(pod))
    }
}

#[derive(Debug, Clone, Default)]
pub struct ObservedInstances {
    pub instances: Vec<Instance>,
}

impl ObservedInstances {
    /// The first pod that accepts writes, with its instance.
    pub fn writable_pod(&self) -> Option<(&Instance, &Pod)> {
        self.instances
            .iter()
            .find_map(|i| i.writable_pod().map(|pod| (i, pod)))
    }

    pub fn find(&self, name: &str) -> Option<&Instance> {
        self.instances.iter().find(|i| i.name == name)
    }

    pub fn names(&self) -> Vec<String> {
        self.instances.iter().map(|i| i.name.clone()).collect()
    }

    pub fn pod_count(&self) -> usize {
        self.instances.iter().map(|i| i.pods.len()).sum()
    }
}

/// Objects of any instance of `cluster`.
pub fn instance_selector(cluster: &str) -> LabelSelector {
    LabelSelector::new()
        .eq(LABEL_CLUSTER, cluster)
        .exists(LABEL_INSTANCE)
}

fn status_of<'a>(pod: &'a Pod, container: &str) -> Option<&'a ContainerStatus> {
    pod.status
        .as_ref()?
        .container_statuses
        .as_ref()?
        .iter()
        .find(|s| s.name == container)
}

/// Readiness of `container`; `None` when the pod does not report it.
pub fn container_ready(pod: &Pod, container: &str) -> Option<bool> {
    status_of(pod, container).map(|s| s.ready)
}

/// Whether `container` is running; `None` when the pod does not report it.
pub fn container_running(pod: &Pod, container: &str) -> Option<bool> {
    status_of(pod, container).map(|s| s.state.as_ref().is_some_and(|st| st.running.is_some()))
}

/// Image ID the kubelet reports for `container`.
pub fn container_image_id<'a>(pod: &'a Pod, container: &str) -> Option<&'a str> {
    status_of(pod, container)
        .map(|s| s.image_id.as_str())
        .filter(|id| !id.is_empty())
}

/// A pod accepts writes when the HA agent labelled it primary and its
/// database container is ready.
pub fn pod_is_writable(pod: &Pod) -> bool {
    pod.metadata.deletion_timestamp.is_none()
        && pod.labels().get(LABEL_ROLE).map(String::as_str) == Some(ROLE_PRIMARY)
        && container_ready(pod, CONTAINER_DATABASE) == Some(true)
}

fn instance_entry(by_name: &mut BTreeMap<String, Instance>, name: String) -> &mut Instance {
    by_name.entry(name.clone()).or_insert_with(|| Instance {
        name,
        ..Default::default()
    })
}

/// Lists the StatefulSets and pods of every instance of `cluster`.
pub async fn observe_instances(
    store: &dyn ObjectStore,
    namespace: &str,
    cluster: &str,
) -> Result<ObservedInstances, ControllerError> {
    let selector = instance_selector(cluster);
    let runners: Vec<StatefulSet> = list_as(store, namespace, &selector).await?;
    let pods: Vec<Pod> = list_as(store, namespace, &selector).await?;

    let mut by_name: BTreeMap<String, Instance> = BTreeMap::new();
    for runner in runners {
        if let Some(name) = runner.labels().get(LABEL_INSTANCE).cloned() {
            instance_entry(&mut by_name, name).runner = Some(runner);
        }
    }
    for pod in pods {
        if let Some(name) = pod.labels().get(LABEL_INSTANCE).cloned() {
            instance_entry(&mut by_name, name).pods.push(pod);
        }
    }

    Ok(ObservedInstances {
        instances: by_name.into_values().collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::*;
    use ivory_store::MockStore;

    #[tokio::test]
    async fn test_observe_groups_by_instance() {
        let store = MockStore::new();
        store.insert(&test_instance_set("hippo", "ns", "hippo-00-bbbb"));
        store.insert(&test_instance_set("hippo", "ns", "hippo-00-aaaa"));
        store.insert(&test_instance_set("other", "ns", "other-00-cccc"));
        store.insert(&test_instance_pod("hippo", "ns", "hippo-00-aaaa", "master", true));

        let observed = observe_instances(&store, "ns", "hippo").await.unwrap();
        assert_eq!(observed.names(), vec!["hippo-00-aaaa", "hippo-00-bbbb"]);
        assert_eq!(observed.pod_count(), 1);
        assert!(observed.instances.iter().all(|i| i.runner.is_some()));

        let (instance, pod) = observed.writable_pod().unwrap();
        assert_eq!(instance.name, "hippo-00-aaaa");
        assert_eq!(pod.name_any(), "hippo-00-aaaa-0");
    }

    #[test]
    fn test_pod_is_writable() {
        assert!(pod_is_writable(&test_instance_pod("hippo", "ns", "i", "master", true)));
        assert!(!pod_is_writable(&test_instance_pod("hippo", "ns", "i", "master", false)));
        assert!(!pod_is_writable(&test_instance_pod("hippo", "ns", "i", "replica", true)));
    }

    #[test]
    fn test_container_image_id() {
        let pod = test_instance_pod("hippo", "ns", "i", "master", true);
        assert_eq!(container_image_id(&pod, CONTAINER_DATABASE), Some("db@sha256:1"));
        assert_eq!(container_image_id(&pod, "missing"), None);
        assert_eq!(container_running(&pod, CONTAINER_DATABASE), Some(true));
    }
}
