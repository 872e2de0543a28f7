//! pgBackRest repository status and stanza creation.

use crate::error::ControllerError;
use crate::reconciler::Reconciler;
use crate::reconciler::exec::PodExecutor;
use crds::naming::CONTAINER_DATABASE;
use crds::{IvoryCluster, IvoryClusterStatus, PgBackRestStatus, RepoStatus};
use ivory::Executor;
use k8s_openapi::api::core::v1::{ConfigMap, Pod};
use kube::ResourceExt;
use pgbackrest::config::CONFIG_HASH_KEY;
use pgbackrest::{CONFIG_HASH_MISMATCH, repo_options_hash, stanza_create_command};
use tracing::{debug, info};

/// Outcome of one stanza pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StanzaOutcome {
    /// Every repository already has its stanza.
    Ready,
    Created,
    /// The pod has not seen the current configuration yet; try again soon.
    ConfigPending,
}

/// Lines up repository status with the declared repositories, in declared
/// order. A repository whose options changed needs its stanza again.
pub fn align_repo_status(cluster: &IvoryCluster, status: &mut IvoryClusterStatus) {
    let previous = status.pgbackrest.take().unwrap_or_default().repos;
    let repos = cluster
        .spec
        .backups
        .pgbackrest
        .repos
        .iter()
        .map(|repo| {
            let hash = repo_options_hash(repo);
            let stanza_created = previous
                .iter()
                .find(|r| r.name == repo.name)
                .is_some_and(|r| r.stanza_created && r.repo_options_hash.as_deref() == Some(hash.as_str()));
            RepoStatus {
                name: repo.name.clone(),
                repo_options_hash: Some(hash),
                stanza_created,
            }
        })
        .collect();
    status.pgbackrest = Some(PgBackRestStatus { repos });
}

impl Reconciler {
    /// Creates the stanza from the writable pod unless every repository
    /// already has one.
    pub(super) async fn reconcile_stanza(
        &self,
        cluster: &IvoryCluster,
        config: &ConfigMap,
        pod: &Pod,
        status: &mut IvoryClusterStatus,
    ) -> Result<StanzaOutcome, ControllerError> {
        let Some(backrest) = status.pgbackrest.as_mut() else {
            return Ok(StanzaOutcome::Ready);
        };
        if backrest.repos.iter().all(|r| r.stanza_created) {
            return Ok(StanzaOutcome::Ready);
        }

        let hash = config
            .data
            .as_ref()
            .and_then(|d| d.get(CONFIG_HASH_KEY))
            .map(String::as_str)
            .unwrap_or_default();
        let namespace = cluster
            .namespace()
            .ok_or(ControllerError::MissingObjectKey("namespace"))?;
        let pod_name = pod.name_any();
        let database = PodExecutor::new(self.exec.as_ref(), &namespace, &pod_name, CONTAINER_DATABASE);

        match database.exec(None, &stanza_create_command(hash)).await {
            Ok(_) => {}
            Err(e) if e.to_string().contains(CONFIG_HASH_MISMATCH) => {
                debug!(%namespace, pod = %pod_name, "pgBackRest configuration not mounted yet");
                return Ok(StanzaOutcome::ConfigPending);
            }
            Err(e) => return Err(e.into()),
        }

        info!(%namespace, cluster = %cluster.name_any(), "stanza created");
        for repo in &mut backrest.repos {
            repo.stanza_created = true;
        }
        Ok(StanzaOutcome::Created)
    }
}
