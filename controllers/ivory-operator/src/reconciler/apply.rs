//! Idempotent writes.
//!
//! [`apply`] makes an object match its intent with the fewest calls: a get,
//! then a create when absent, or a merge patch only when labels, annotations,
//! owners or content differ. Jobs are immutable once created, so
//! [`ensure_job`] only ever creates.

use crate::error::ControllerError;
use crate::reconciler::status::merge_diff;
use ivory_store::typed::{from_dynamic, to_dynamic};
use ivory_store::{DeleteOptions, Kind, ObjectStore, Preconditions, Propagation, StoreObject};
use k8s_openapi::api::batch::v1::Job;
use kube::ResourceExt;
use kube::api::DynamicObject;
use serde_json::{Map, Value};
use tracing::{debug, info};

fn object_key(obj: &impl ResourceExt) -> Result<(String, String), ControllerError> {
    let name = obj
        .meta()
        .name
        .clone()
        .ok_or(ControllerError::MissingObjectKey("name"))?;
    let namespace = obj
        .namespace()
        .ok_or(ControllerError::MissingObjectKey("namespace"))?;
    Ok((namespace, name))
}

/// True when every entry of `desired` is present in `current`.
fn contains_all(current: Option<&Value>, desired: Option<&Value>) -> bool {
    let Some(Value::Object(desired)) = desired else {
        return true;
    };
    let Some(Value::Object(current)) = current else {
        return desired.is_empty();
    };
    desired.iter().all(|(k, v)| current.get(k) == Some(v))
}

/// The merge patch bringing `current` in line with `desired`, if needed.
fn apply_patch(current: &DynamicObject, desired: &DynamicObject) -> Result<Option<Value>, ControllerError> {
    let current_meta = serde_json::to_value(&current.metadata)?;
    let desired_meta = serde_json::to_value(&desired.metadata)?;

    let mut metadata = Map::new();
    for key in ["labels", "annotations"] {
        if !contains_all(current_meta.get(key), desired_meta.get(key)) {
            metadata.insert(key.to_string(), desired_meta[key].clone());
        }
    }
    if let Some(owners) = desired_meta.get("ownerReferences") {
        if current_meta.get("ownerReferences") != Some(owners) {
            metadata.insert("ownerReferences".to_string(), owners.clone());
        }
    }

    let mut patch = Map::new();
    if !metadata.is_empty() {
        patch.insert("metadata".to_string(), Value::Object(metadata));
    }

    let Value::Object(fields) = &desired.data else {
        return Ok((!patch.is_empty()).then_some(Value::Object(patch)));
    };
    for (key, value) in fields {
        if key == "status" {
            continue;
        }
        let current_value = current.data.get(key).unwrap_or(&Value::Null);
        if let Some(diff) = merge_diff(current_value, value) {
            patch.insert(key.clone(), diff);
        }
    }

    Ok((!patch.is_empty()).then_some(Value::Object(patch)))
}

/// Creates or updates `intent`, returning the stored object.
pub async fn apply<K: StoreObject>(store: &dyn ObjectStore, intent: &K) -> Result<K, ControllerError> {
    let (namespace, name) = object_key(intent)?;
    let desired = to_dynamic(intent)?;

    let Some(current) = store.get(K::KIND, &namespace, &name).await? else {
        info!(kind = ?K::KIND, namespace, name, "creating");
        return Ok(from_dynamic(store.create(K::KIND, &namespace, &desired).await?)?);
    };

    match apply_patch(&current, &desired)? {
        Some(patch) => {
            info!(kind = ?K::KIND, namespace, name, "updating");
            Ok(from_dynamic(store.merge_patch(K::KIND, &namespace, &name, &patch).await?)?)
        }
        None => {
            debug!(kind = ?K::KIND, namespace, name, "unchanged");
            Ok(from_dynamic(current)?)
        }
    }
}

/// Creates `job` unless a job with its name exists.
pub async fn ensure_job(store: &dyn ObjectStore, job: &Job) -> Result<(), ControllerError> {
    let (namespace, name) = object_key(job)?;
    match store.create(Kind::Job, &namespace, &to_dynamic(job)?).await {
        Ok(_) => {
            info!(namespace, name, "created job");
            Ok(())
        }
        Err(e) if e.is_already_exists() => {
            debug!(namespace, name, "job exists");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// Deletes exactly the observed revision of `obj`.
///
/// NotFound and Conflict mean someone else already changed or removed it,
/// which is fine.
pub async fn delete_exactly<K: StoreObject>(
    store: &dyn ObjectStore,
    obj: &K,
    propagation: Option<Propagation>,
) -> Result<(), ControllerError> {
    let (namespace, name) = object_key(obj)?;
    let options = DeleteOptions {
        preconditions: Some(Preconditions {
            uid: obj.meta().uid.clone(),
            resource_version: obj.meta().resource_version.clone(),
        }),
        propagation,
    };
    match store.delete(K::KIND, &namespace, &name, &options).await {
        Ok(()) => {
            info!(kind = ?K::KIND, namespace, name, "deleted");
            Ok(())
        }
        Err(e) if e.is_not_found() || e.is_conflict() => {
            debug!(kind = ?K::KIND, namespace, name, error = %e, "delete skipped");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// Deletes the named object if it exists and is controlled by `owner_uid`.
pub async fn delete_controlled<K: StoreObject>(
    store: &dyn ObjectStore,
    namespace: &str,
    name: &str,
    owner_uid: Option<&str>,
) -> Result<(), ControllerError> {
    let Some(current) = ivory_store::typed::get_as::<K>(store, namespace, name).await? else {
        return Ok(());
    };
    let controlled = current
        .owner_references()
        .iter()
        .any(|r| r.controller == Some(true) && Some(r.uid.as_str()) == owner_uid);
    if !controlled {
        debug!(kind = ?K::KIND, namespace, name, "not controlled; leaving in place");
        return Ok(());
    }
    delete_exactly(store, &current, None).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use ivory_store::{MockStore, Verb};
    use k8s_openapi::ByteString;
    use k8s_openapi::api::core::v1::{ConfigMap, Secret};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
    use std::collections::BTreeMap;

    fn config_map(data: &[(&str, &str)], labels: &[(&str, &str)]) -> ConfigMap {
        ConfigMap {
            metadata: ObjectMeta {
                name: Some("hippo-config".to_string()),
                namespace: Some("ns".to_string()),
                labels: Some(
                    labels
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect(),
                ),
                ..Default::default()
            },
            data: Some(
                data.iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            ),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_apply_creates_then_skips() {
        let store = MockStore::new();
        let intent = config_map(&[("a", "1")], &[("app", "x")]);

        apply(&store, &intent).await.unwrap();
        assert_eq!(store.calls(Verb::Create, Kind::ConfigMap), 1);

        apply(&store, &intent).await.unwrap();
        assert_eq!(store.calls(Verb::Create, Kind::ConfigMap), 1);
        assert_eq!(store.calls(Verb::Patch, Kind::ConfigMap), 0);
    }

    #[tokio::test]
    async fn test_apply_patches_changed_data_and_removes_stale_keys() {
        let store = MockStore::new();
        store.insert(&config_map(&[("a", "1"), ("stale", "x")], &[("app", "x"), ("extra", "y")]));

        let applied = apply(&store, &config_map(&[("a", "2")], &[("app", "x")]))
            .await
            .unwrap();
        assert_eq!(store.calls(Verb::Patch, Kind::ConfigMap), 1);

        let data = applied.data.unwrap();
        assert_eq!(data, BTreeMap::from([("a".to_string(), "2".to_string())]));
        // Labels set by others are left alone
        assert!(applied.metadata.labels.unwrap().contains_key("extra"));
    }

    #[tokio::test]
    async fn test_apply_patches_missing_label() {
        let store = MockStore::new();
        store.insert(&config_map(&[("a", "1")], &[]));

        apply(&store, &config_map(&[("a", "1")], &[("app", "x")]))
            .await
            .unwrap();
        assert_eq!(store.calls(Verb::Patch, Kind::ConfigMap), 1);
        let stored = store.object::<ConfigMap>("ns", "hippo-config").unwrap();
        assert_eq!(stored.metadata.labels.unwrap()["app"], "x");
    }

    #[tokio::test]
    async fn test_apply_secret_bytes() {
        let store = MockStore::new();
        let secret = Secret {
            metadata: ObjectMeta {
                name: Some("s".to_string()),
                namespace: Some("ns".to_string()),
                ..Default::default()
            },
            data: Some(BTreeMap::from([(
                "password".to_string(),
                ByteString(b"hunter2".to_vec()),
            )])),
            ..Default::default()
        };
        apply(&store, &secret).await.unwrap();
        apply(&store, &secret).await.unwrap();
        assert_eq!(store.calls(Verb::Create, Kind::Secret), 1);
        assert_eq!(store.calls(Verb::Patch, Kind::Secret), 0);
    }

    #[tokio::test]
    async fn test_apply_requires_name() {
        let store = MockStore::new();
        let err = apply(&store, &ConfigMap::default()).await.unwrap_err();
        assert!(matches!(err, ControllerError::MissingObjectKey("name")));
    }

    #[tokio::test]
    async fn test_ensure_job_is_create_only() {
        let store = MockStore::new();
        let job = Job {
            metadata: ObjectMeta {
                name: Some("up-pgdata".to_string()),
                namespace: Some("ns".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };

        ensure_job(&store, &job).await.unwrap();
        ensure_job(&store, &job).await.unwrap();
        assert_eq!(store.calls(Verb::Create, Kind::Job), 2);
        assert_eq!(store.names(Kind::Job), vec!["up-pgdata".to_string()]);
        assert_eq!(store.calls(Verb::Patch, Kind::Job), 0);
    }

    #[tokio::test]
    async fn test_delete_exactly_swallows_races() {
        let store = MockStore::new();
        let stored: ConfigMap = from_dynamic(store.insert(&config_map(&[], &[]))).unwrap();

        // Someone else modified it: precondition conflict is swallowed
        let mut stale = stored.clone();
        stale.metadata.resource_version = Some("0".to_string());
        delete_exactly(&store, &stale, None).await.unwrap();
        assert_eq!(store.names(Kind::ConfigMap).len(), 1);

        delete_exactly(&store, &stored, Some(Propagation::Background)).await.unwrap();
        assert!(store.names(Kind::ConfigMap).is_empty());

        // Already gone: NotFound is swallowed
        delete_exactly(&store, &stored, None).await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_controlled_checks_owner() {
        let store = MockStore::new();
        let mut owned = config_map(&[], &[]);
        owned.metadata.owner_references = Some(vec![OwnerReference {
            api_version: "ivory.microscaler.io/v1beta1".to_string(),
            kind: "IvoryCluster".to_string(),
            name: "hippo".to_string(),
            uid: "cluster-uid".to_string(),
            controller: Some(true),
            ..Default::default()
        }]);
        store.insert(&owned);

        delete_controlled::<ConfigMap>(&store, "ns", "hippo-config", Some("other-uid"))
            .await
            .unwrap();
        assert_eq!(store.names(Kind::ConfigMap).len(), 1);

        delete_controlled::<ConfigMap>(&store, "ns", "hippo-config", Some("cluster-uid"))
            .await
            .unwrap();
        assert!(store.names(Kind::ConfigMap).is_empty());

        // Absent objects are fine
        delete_controlled::<ConfigMap>(&store, "ns", "hippo-config", Some("cluster-uid"))
            .await
            .unwrap();
    }
}
