//! ObjectStore and PodExec traits
//!
//! These traits abstract the Kubernetes API so the reconcilers can be
//! exercised against an in-memory store. Objects cross the seam as
//! [`DynamicObject`]s addressed by [`Kind`]; see [`crate::typed`] for the
//! typed helpers built on top.

use crate::error::StoreError;
use kube::api::DynamicObject;
use std::collections::{BTreeMap, BTreeSet};

/// Object kinds the operator reads or writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Kind {
    IvoryCluster,
    IvoryUpgrade,
    Job,
    Pod,
    StatefulSet,
    Endpoints,
    ConfigMap,
    Secret,
}

impl Kind {
    pub const ALL: [Kind; 8] = [
        Kind::IvoryCluster,
        Kind::IvoryUpgrade,
        Kind::Job,
        Kind::Pod,
        Kind::StatefulSet,
        Kind::Endpoints,
        Kind::ConfigMap,
        Kind::Secret,
    ];
}

/// Equality and existence requirements on labels.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSelector {
    equal: BTreeMap<String, String>,
    exists: BTreeSet<String>,
}

impl LabelSelector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requires `key` to equal `value`.
    pub fn eq(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.equal.insert(key.into(), value.into());
        self
    }

    /// Requires `key` to be present with any value.
    pub fn exists(mut self, key: impl Into<String>) -> Self {
        self.exists.insert(key.into());
        self
    }

    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.equal.iter().all(|(k, v)| labels.get(k) == Some(v))
            && self.exists.iter().all(|k| labels.contains_key(k))
    }

    /// The selector in `labelSelector` query syntax.
    pub fn to_query(&self) -> String {
        self.equal
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .chain(self.exists.iter().cloned())
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Delete only if the object still has this identity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Preconditions {
    pub uid: Option<String>,
    pub resource_version: Option<String>,
}

impl Preconditions {
    /// Preconditions matching the current uid and resource version of `obj`.
    pub fn of(obj: &DynamicObject) -> Self {
        Self {
            uid: obj.metadata.uid.clone(),
            resource_version: obj.metadata.resource_version.clone(),
        }
    }
}

/// How dependents are removed with their owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Propagation {
    Background,
    Foreground,
    Orphan,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteOptions {
    pub preconditions: Option<Preconditions>,
    pub propagation: Option<Propagation>,
}

/// Trait for control-plane object operations
///
/// All async methods must be `Send` to work with Tokio's work-stealing
/// runtime. Namespaced kinds are addressed by `namespace`.
#[async_trait::async_trait]
pub trait ObjectStore: Send + Sync {
    /// The object, or `None` when it does not exist.
    async fn get(
        &self,
        kind: Kind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DynamicObject>, StoreError>;

    async fn list(
        &self,
        kind: Kind,
        namespace: &str,
        selector: &LabelSelector,
    ) -> Result<Vec<DynamicObject>, StoreError>;

    /// Fails with [`StoreError::AlreadyExists`] when the name is taken.
    async fn create(
        &self,
        kind: Kind,
        namespace: &str,
        obj: &DynamicObject,
    ) -> Result<DynamicObject, StoreError>;

    /// JSON merge patch (RFC 7386) of the main resource.
    async fn merge_patch(
        &self,
        kind: Kind,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<DynamicObject, StoreError>;

    /// JSON merge patch of the status subresource.
    async fn patch_status(
        &self,
        kind: Kind,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<DynamicObject, StoreError>;

    /// Precondition failures surface as [`StoreError::Conflict`].
    async fn delete(
        &self,
        kind: Kind,
        namespace: &str,
        name: &str,
        options: &DeleteOptions,
    ) -> Result<(), StoreError>;
}

/// Captured output of a command run in a container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Runs commands inside pod containers.
#[async_trait::async_trait]
pub trait PodExec: Send + Sync {
    async fn exec(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
        stdin: Option<&str>,
        command: &[String],
    ) -> Result<ExecOutput, StoreError>;
}
