//! Typed access on top of [`ObjectStore`].

use crate::error::StoreError;
use crate::store::{Kind, LabelSelector, ObjectStore};
use crds::{IvoryCluster, IvoryUpgrade};
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{ConfigMap, Endpoints, Pod, Secret};
use kube::Resource;
use kube::api::{DynamicObject, TypeMeta};
use serde::Serialize;
use serde::de::DeserializeOwned;

/// A typed object with a fixed [`Kind`].
pub trait StoreObject:
    Resource<DynamicType = ()> + Serialize + DeserializeOwned + Clone + Send + Sync
{
    const KIND: Kind;
}

macro_rules! store_object {
    ($($ty:ty => $kind:expr),* $(,)?) => {
        $(impl StoreObject for $ty {
            const KIND: Kind = $kind;
        })*
    };
}

store_object! {
    IvoryCluster => Kind::IvoryCluster,
    IvoryUpgrade => Kind::IvoryUpgrade,
    Job => Kind::Job,
    Pod => Kind::Pod,
    StatefulSet => Kind::StatefulSet,
    Endpoints => Kind::Endpoints,
    ConfigMap => Kind::ConfigMap,
    Secret => Kind::Secret,
}

fn type_meta<K: StoreObject>() -> TypeMeta {
    TypeMeta {
        api_version: K::api_version(&()).into_owned(),
        kind: K::kind(&()).into_owned(),
    }
}

pub fn to_dynamic<K: StoreObject>(obj: &K) -> Result<DynamicObject, StoreError> {
    let mut dynamic: DynamicObject = serde_json::from_value(serde_json::to_value(obj)?)?;
    dynamic.types.get_or_insert_with(type_meta::<K>);
    Ok(dynamic)
}

pub fn from_dynamic<K: StoreObject>(mut obj: DynamicObject) -> Result<K, StoreError> {
    obj.types = Some(type_meta::<K>());
    Ok(serde_json::from_value(serde_json::to_value(obj)?)?)
}

pub async fn get_as<K: StoreObject>(
    store: &dyn ObjectStore,
    namespace: &str,
    name: &str,
) -> Result<Option<K>, StoreError> {
    store
        .get(K::KIND, namespace, name)
        .await?
        .map(from_dynamic)
        .transpose()
}

pub async fn list_as<K: StoreObject>(
    store: &dyn ObjectStore,
    namespace: &str,
    selector: &LabelSelector,
) -> Result<Vec<K>, StoreError> {
    store
        .list(K::KIND, namespace, selector)
        .await?
        .into_iter()
        .map(from_dynamic)
        .collect()
}

pub async fn create_as<K: StoreObject>(
    store: &dyn ObjectStore,
    namespace: &str,
    obj: &K,
) -> Result<K, StoreError> {
    from_dynamic(store.create(K::KIND, namespace, &to_dynamic(obj)?).await?)
}
