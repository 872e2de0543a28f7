//! Mock store for unit testing
//!
//! An in-memory [`ObjectStore`] and [`PodExec`] that can be used in unit
//! tests without a running API server. Objects get uids and resource
//! versions like the real thing, merge patches follow RFC 7386, deletes
//! honor preconditions, and every call is counted per verb and kind.

use crate::error::StoreError;
use crate::store::{DeleteOptions, ExecOutput, Kind, LabelSelector, ObjectStore, PodExec};
use crate::typed::{StoreObject, from_dynamic, to_dynamic};
use kube::api::DynamicObject;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    Get,
    List,
    Create,
    Patch,
    PatchStatus,
    Delete,
}

/// One recorded [`PodExec::exec`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecCall {
    pub namespace: String,
    pub pod: String,
    pub container: String,
    pub stdin: Option<String>,
    pub command: Vec<String>,
}

type Key = (Kind, String, String);

#[derive(Default)]
struct State {
    objects: BTreeMap<Key, DynamicObject>,
    calls: HashMap<(Verb, Kind), usize>,
    failures: HashMap<(Verb, Kind), VecDeque<StoreError>>,
    next_uid: u64,
    next_resource_version: u64,
    exec_responses: HashMap<String, VecDeque<Result<ExecOutput, String>>>,
    exec_calls: Vec<ExecCall>,
}

impl State {
    fn record(&mut self, verb: Verb, kind: Kind) -> Result<(), StoreError> {
        *self.calls.entry((verb, kind)).or_default() += 1;
        match self.failures.get_mut(&(verb, kind)).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn bump_resource_version(&mut self, obj: &mut DynamicObject) {
        self.next_resource_version += 1;
        obj.metadata.resource_version = Some(self.next_resource_version.to_string());
    }
}

/// In-memory store for tests
#[derive(Clone, Default)]
pub struct MockStore {
    state: Arc<Mutex<State>>,
}

impl std::fmt::Debug for MockStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockStore")
            .field("objects", &self.state().objects.len())
            .finish()
    }
}

fn key(kind: Kind, namespace: &str, name: &str) -> Key {
    (kind, namespace.to_string(), name.to_string())
}

fn describe(kind: Kind, namespace: &str, name: &str) -> String {
    format!("{kind:?} {namespace}/{name}")
}

/// RFC 7386 JSON merge patch.
pub fn merge_json(target: &mut Value, patch: &Value) {
    let Value::Object(patch) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Value::Object(target) = target {
        for (k, v) in patch {
            if v.is_null() {
                target.remove(k);
            } else {
                merge_json(target.entry(k.clone()).or_insert(Value::Null), v);
            }
        }
    }
}

impl MockStore {
    /// Create a new, empty mock store
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a typed object to the mock store (for test setup)
    pub fn insert<K: StoreObject>(&self, obj: &K) -> DynamicObject {
        match to_dynamic(obj) {
            Ok(dynamic) => self.insert_dynamic(K::KIND, dynamic),
            Err(e) => panic!("cannot convert {:?}: {e}", K::KIND),
        }
    }

    /// Add an object, assigning a uid and resource version (for test setup)
    pub fn insert_dynamic(&self, kind: Kind, mut obj: DynamicObject) -> DynamicObject {
        let mut state = self.state();
        if obj.metadata.uid.is_none() {
            state.next_uid += 1;
            obj.metadata.uid = Some(format!("uid-{}", state.next_uid));
        }
        obj.metadata.generation.get_or_insert(1);
        state.bump_resource_version(&mut obj);
        let namespace = obj.metadata.namespace.clone().unwrap_or_default();
        let name = obj.metadata.name.clone().unwrap_or_default();
        state.objects.insert(key(kind, &namespace, &name), obj.clone());
        obj
    }

    /// Current typed object, if present
    pub fn object<K: StoreObject>(&self, namespace: &str, name: &str) -> Option<K> {
        let obj = self.state().objects.get(&key(K::KIND, namespace, name)).cloned()?;
        from_dynamic(obj).ok()
    }

    /// Names of all objects of `kind`, in order
    pub fn names(&self, kind: Kind) -> Vec<String> {
        self.state()
            .objects
            .keys()
            .filter(|(k, _, _)| *k == kind)
            .map(|(_, _, name)| name.clone())
            .collect()
    }

    /// Number of calls made for a verb and kind
    pub fn calls(&self, verb: Verb, kind: Kind) -> usize {
        self.state().calls.get(&(verb, kind)).copied().unwrap_or_default()
    }

    /// Number of calls made for a verb across all kinds
    pub fn total_calls(&self, verb: Verb) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|((v, _), _)| *v == verb)
            .map(|(_, n)| n)
            .sum()
    }

    pub fn reset_calls(&self) {
        let mut state = self.state();
        state.calls.clear();
        state.exec_calls.clear();
    }

    /// Make the next call for a verb and kind fail with `err`
    pub fn fail_next(&self, verb: Verb, kind: Kind, err: StoreError) {
        self.state()
            .failures
            .entry((verb, kind))
            .or_default()
            .push_back(err);
    }

    /// Queue the result of the next exec in `container`. Containers without
    /// queued results return empty output.
    pub fn script_exec(&self, container: &str, result: Result<ExecOutput, String>) {
        self.state()
            .exec_responses
            .entry(container.to_string())
            .or_default()
            .push_back(result);
    }

    pub fn exec_calls(&self) -> Vec<ExecCall> {
        self.state().exec_calls.clone()
    }
}

#[async_trait::async_trait]
impl ObjectStore for MockStore {
    async fn get(
        &self,
        kind: Kind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DynamicObject>, StoreError> {
        let mut state = self.state();
        state.record(Verb::Get, kind)?;
        Ok(state.objects.get(&key(kind, namespace, name)).cloned())
    }

    async fn list(
        &self,
        kind: Kind,
        namespace: &str,
        selector: &LabelSelector,
    ) -> Result<Vec<DynamicObject>, StoreError> {
        let mut state = self.state();
        state.record(Verb::List, kind)?;
        let empty = BTreeMap::new();
        Ok(state
            .objects
            .iter()
            .filter(|((k, ns, _), _)| *k == kind && ns == namespace)
            .filter(|(_, obj)| selector.matches(obj.metadata.labels.as_ref().unwrap_or(&empty)))
            .map(|(_, obj)| obj.clone())
            .collect())
    }

    async fn create(
        &self,
        kind: Kind,
        namespace: &str,
        obj: &DynamicObject,
    ) -> Result<DynamicObject, StoreError> {
        {
            let mut state = self.state();
            state.record(Verb::Create, kind)?;
            let name = obj.metadata.name.clone().unwrap_or_default();
            if state.objects.contains_key(&key(kind, namespace, &name)) {
                return Err(StoreError::AlreadyExists(describe(kind, namespace, &name)));
            }
        }
        let mut obj = obj.clone();
        obj.metadata.namespace = Some(namespace.to_string());
        obj.metadata.uid = None;
        Ok(self.insert_dynamic(kind, obj))
    }

    async fn merge_patch(
        &self,
        kind: Kind,
        namespace: &str,
        name: &str,
        patch: &Value,
    ) -> Result<DynamicObject, StoreError> {
        let mut state = self.state();
        state.record(Verb::Patch, kind)?;
        let k = key(kind, namespace, name);
        let Some(current) = state.objects.get(&k) else {
            return Err(StoreError::NotFound(describe(kind, namespace, name)));
        };

        let mut value = serde_json::to_value(current)?;
        let spec_before = value.get("spec").cloned();
        merge_json(&mut value, patch);
        let spec_changed = value.get("spec").cloned() != spec_before;

        let mut updated: DynamicObject = serde_json::from_value(value)?;
        if spec_changed {
            updated.metadata.generation = Some(updated.metadata.generation.unwrap_or_default() + 1);
        }
        state.bump_resource_version(&mut updated);
        state.objects.insert(k, updated.clone());
        Ok(updated)
    }

    async fn patch_status(
        &self,
        kind: Kind,
        namespace: &str,
        name: &str,
        patch: &Value,
    ) -> Result<DynamicObject, StoreError> {
        let mut state = self.state();
        state.record(Verb::PatchStatus, kind)?;
        let k = key(kind, namespace, name);
        let Some(current) = state.objects.get(&k) else {
            return Err(StoreError::NotFound(describe(kind, namespace, name)));
        };

        // The status subresource ignores everything but status.
        let mut value = serde_json::to_value(current)?;
        if let Some(status) = patch.get("status") {
            merge_json(&mut value, &serde_json::json!({ "status": status }));
        }

        let mut updated: DynamicObject = serde_json::from_value(value)?;
        state.bump_resource_version(&mut updated);
        state.objects.insert(k, updated.clone());
        Ok(updated)
    }

    async fn delete(
        &self,
        kind: Kind,
        namespace: &str,
        name: &str,
        options: &DeleteOptions,
    ) -> Result<(), StoreError> {
        let mut state = self.state();
        state.record(Verb::Delete, kind)?;
        let k = key(kind, namespace, name);
        let Some(current) = state.objects.get(&k) else {
            return Err(StoreError::NotFound(describe(kind, namespace, name)));
        };

        if let Some(pre) = &options.preconditions {
            let uid_mismatch = pre.uid.is_some() && pre.uid != current.metadata.uid;
            let rv_mismatch = pre.resource_version.is_some()
                && pre.resource_version != current.metadata.resource_version;
            if uid_mismatch || rv_mismatch {
                return Err(StoreError::Conflict(format!(
                    "precondition failed for {}",
                    describe(kind, namespace, name)
                )));
            }
        }

        state.objects.remove(&k);
        Ok(())
    }
}

#[async_trait::async_trait]
impl PodExec for MockStore {
    async fn exec(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
        stdin: Option<&str>,
        command: &[String],
    ) -> Result<ExecOutput, StoreError> {
        let mut state = self.state();
        state.exec_calls.push(ExecCall {
            namespace: namespace.to_string(),
            pod: pod.to_string(),
            container: container.to_string(),
            stdin: stdin.map(str::to_string),
            command: command.to_vec(),
        });
        match state
            .exec_responses
            .get_mut(container)
            .and_then(VecDeque::pop_front)
        {
            Some(Ok(output)) => Ok(output),
            Some(Err(message)) => Err(StoreError::Exec(message)),
            None => Ok(ExecOutput::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Preconditions, Propagation};
    use k8s_openapi::api::core::v1::ConfigMap;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn config_map(name: &str, labels: &[(&str, &str)]) -> ConfigMap {
        ConfigMap {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("ns".to_string()),
                labels: Some(
                    labels
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect(),
                ),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_merge_json() {
        let mut target = serde_json::json!({"a": {"b": 1, "c": 2}, "d": [1, 2]});
        merge_json(&mut target, &serde_json::json!({"a": {"b": null, "e": 3}, "d": [3]}));
        assert_eq!(target, serde_json::json!({"a": {"c": 2, "e": 3}, "d": [3]}));
    }

    #[tokio::test]
    async fn test_create_and_list_by_label() {
        let store = MockStore::new();
        store.insert(&config_map("a", &[("app", "x")]));
        store.insert(&config_map("b", &[("app", "y")]));

        let listed = store
            .list(Kind::ConfigMap, "ns", &LabelSelector::new().eq("app", "x"))
            .await
            .unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].metadata.name.as_deref(), Some("a"));

        let dup = to_dynamic(&config_map("a", &[])).unwrap();
        let err = store.create(Kind::ConfigMap, "ns", &dup).await.unwrap_err();
        assert!(err.is_already_exists());
        assert_eq!(store.calls(Verb::Create, Kind::ConfigMap), 1);
        assert_eq!(store.calls(Verb::List, Kind::ConfigMap), 1);
    }

    #[tokio::test]
    async fn test_patch_bumps_resource_version() {
        let store = MockStore::new();
        let created = store.insert(&config_map("a", &[]));
        let patched = store
            .merge_patch(Kind::ConfigMap, "ns", "a", &serde_json::json!({"data": {"k": "v"}}))
            .await
            .unwrap();
        assert_ne!(patched.metadata.resource_version, created.metadata.resource_version);
        assert_eq!(patched.metadata.uid, created.metadata.uid);

        let cm: ConfigMap = store.object("ns", "a").unwrap();
        assert_eq!(cm.data.unwrap()["k"], "v");
    }

    #[tokio::test]
    async fn test_delete_preconditions() {
        let store = MockStore::new();
        let created = store.insert(&config_map("a", &[]));
        store
            .merge_patch(Kind::ConfigMap, "ns", "a", &serde_json::json!({"data": {"k": "v"}}))
            .await
            .unwrap();

        let stale = DeleteOptions {
            preconditions: Some(Preconditions::of(&created)),
            propagation: Some(Propagation::Background),
        };
        let err = store.delete(Kind::ConfigMap, "ns", "a", &stale).await.unwrap_err();
        assert!(err.is_conflict());

        store
            .delete(Kind::ConfigMap, "ns", "a", &DeleteOptions::default())
            .await
            .unwrap();
        let err = store
            .delete(Kind::ConfigMap, "ns", "a", &DeleteOptions::default())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_fail_next_and_scripted_exec() {
        let store = MockStore::new();
        store.fail_next(Verb::Get, Kind::Secret, StoreError::Exec("boom".to_string()));
        assert!(store.get(Kind::Secret, "ns", "x").await.is_err());
        assert!(store.get(Kind::Secret, "ns", "x").await.unwrap().is_none());

        store.script_exec("database", Err("exit 1".to_string()));
        let command = vec!["true".to_string()];
        assert!(store.exec("ns", "pod", "database", None, &command).await.is_err());
        assert!(store.exec("ns", "pod", "database", Some("in"), &command).await.is_ok());

        let calls = store.exec_calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].stdin.as_deref(), Some("in"));
    }
}
