//! Kind to API resource mapping, built once at startup.

use crate::error::StoreError;
use crate::store::Kind;
use crds::{IvoryCluster, IvoryUpgrade};
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{ConfigMap, Endpoints, Pod, Secret};
use kube::Resource;
use kube::discovery::ApiResource;
use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
pub struct Registry {
    resources: HashMap<Kind, ApiResource>,
}

impl Registry {
    /// A registry knowing every [`Kind`].
    pub fn new() -> Self {
        Self::default()
            .register::<IvoryCluster>(Kind::IvoryCluster)
            .register::<IvoryUpgrade>(Kind::IvoryUpgrade)
            .register::<Job>(Kind::Job)
            .register::<Pod>(Kind::Pod)
            .register::<StatefulSet>(Kind::StatefulSet)
            .register::<Endpoints>(Kind::Endpoints)
            .register::<ConfigMap>(Kind::ConfigMap)
            .register::<Secret>(Kind::Secret)
    }

    pub fn register<K>(mut self, kind: Kind) -> Self
    where
        K: Resource<DynamicType = ()>,
    {
        self.resources.insert(kind, ApiResource::erase::<K>(&()));
        self
    }

    pub fn resource(&self, kind: Kind) -> Result<&ApiResource, StoreError> {
        self.resources.get(&kind).ok_or(StoreError::UnknownKind(kind))
    }
}
