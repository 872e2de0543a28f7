//! Database users and the Secrets holding their credentials.

use super::intent::{KEY_VERIFIER, secret_value, user_secret_intent, user_secret_labels};
use crate::error::ControllerError;
use crate::reconciler::Reconciler;
use crate::reconciler::apply::{apply, delete_exactly};
use crate::reconciler::exec::PodExecutor;
use crds::naming::{self, CONTAINER_DATABASE, LABEL_USER};
use crds::{IvoryCluster, IvoryClusterStatus, UserSpec};
use ivory::users::write_users;
use ivory::HashingExecutor;
use ivory_store::LabelSelector;
use ivory_store::typed::{get_as, list_as};
use k8s_openapi::api::core::v1::{Pod, Secret};
use kube::ResourceExt;
use std::collections::BTreeMap;
use tracing::info;

/// Users to create. Without any declared, one user named after the
/// cluster owns a database of the same name.
pub fn desired_users(cluster: &IvoryCluster) -> Vec<UserSpec> {
    if !cluster.spec.users.is_empty() {
        return cluster.spec.users.clone();
    }
    let name = cluster.name_any();
    vec![UserSpec {
        name: name.clone(),
        databases: vec![name],
        options: String::new(),
    }]
}

impl Reconciler {
    /// Applies a Secret per desired user and deletes the Secrets of users
    /// no longer declared. Returns the verifiers by user name.
    pub(super) async fn reconcile_user_secrets(
        &self,
        cluster: &IvoryCluster,
        users: &[UserSpec],
    ) -> Result<BTreeMap<String, String>, ControllerError> {
        let namespace = cluster
            .namespace()
            .ok_or(ControllerError::MissingObjectKey("namespace"))?;
        let cluster_name = cluster.name_any();
        let store = self.store.as_ref();

        let mut verifiers = BTreeMap::new();
        for user in users {
            let name = naming::user_secret_name(&cluster_name, &user.name);
            let existing = get_as::<Secret>(store, &namespace, &name).await?;
            let intent = user_secret_intent(cluster, user, existing.as_ref(), self.secrets.as_ref());
            let secret = apply(store, &intent).await?;
            if let Some(verifier) = secret_value(&secret, KEY_VERIFIER) {
                verifiers.insert(user.name.clone(), verifier);
            }
        }

        let mut selector = LabelSelector::new();
        for (key, value) in user_secret_labels(&cluster_name) {
            selector = selector.eq(key, value);
        }
        let cluster_uid = cluster.uid();
        let stale = list_as::<Secret>(store, &namespace, &selector).await?;
        for secret in stale {
            let declared = secret
                .labels()
                .get(LABEL_USER)
                .is_some_and(|user| users.iter().any(|u| &u.name == user));
            let controlled = secret
                .owner_references()
                .iter()
                .any(|r| r.controller == Some(true) && Some(&r.uid) == cluster_uid.as_ref());
            if !declared && controlled {
                info!(%namespace, secret = %secret.name_any(), "removing user secret");
                delete_exactly(store, &secret, None).await?;
            }
        }

        Ok(verifiers)
    }

    /// Creates or alters the desired users on the writable pod, skipping the
    /// work when nothing changed since the last success. Waits for the
    /// database container to report its image.
    pub(super) async fn reconcile_users_sql(
        &self,
        cluster: &IvoryCluster,
        users: &[UserSpec],
        verifiers: &BTreeMap<String, String>,
        pod: &Pod,
        status: &mut IvoryClusterStatus,
    ) -> Result<(), ControllerError> {
        let Some(image) = super::observe::container_image_id(pod, CONTAINER_DATABASE) else {
            return Ok(());
        };
        let hashing = HashingExecutor::new([image]);
        write_users(&hashing, users, verifiers).await?;
        let revision = hashing.finish();

        if status.users_revision.as_deref() == Some(revision.as_str()) {
            return Ok(());
        }

        let namespace = cluster
            .namespace()
            .ok_or(ControllerError::MissingObjectKey("namespace"))?;
        let pod_name = pod.name_any();
        let database = PodExecutor::new(self.exec.as_ref(), &namespace, &pod_name, CONTAINER_DATABASE);
        write_users(&database, users, verifiers).await?;

        info!(%namespace, cluster = %cluster.name_any(), users = users.len(), "users written");
        status.users_revision = Some(revision);
        Ok(())
    }
}
