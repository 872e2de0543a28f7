//! Kubernetes resource watchers.
//!
//! Both reconcilers run under `kube_runtime::Controller`, which supplies the
//! deduplicating work queue, reconnection and requeues. The shared
//! [`run_controller`] helper adds per-object Fibonacci backoff on errors.

use crate::config::OperatorConfig;
use crate::error::ControllerError;
use crate::reconciler::Reconciler;
use crds::naming::{LABEL_CLUSTER, LABEL_INSTANCE, LABEL_UPGRADE};
use crds::{IvoryCluster, IvoryUpgrade};
use futures::StreamExt;
use k8s_openapi::NamespaceResourceScope;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{ConfigMap, Pod, Secret};
use kube::{Api, Client, Resource, ResourceExt};
use kube_runtime::controller::{Action, Config as ControllerConfig};
use kube_runtime::reflector::ObjectRef;
use kube_runtime::{Controller, watcher};
use std::fmt::Debug;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Boxed reconcile future, as returned by the closures given to [`run_controller`].
type ReconcileFuture = Pin<Box<dyn Future<Output = Result<Action, ControllerError>> + Send>>;

/// Events closer together than this are handled by one reconcile.
const DEBOUNCE: Duration = Duration::from_secs(1);

/// Backoff and log key of an object, `<Kind>/<namespace>/<name>`.
fn resource_key<K: Resource>(kind: &str, obj: &K) -> String {
    format!(
        "{kind}/{}/{}",
        obj.namespace().unwrap_or_default(),
        obj.name_any()
    )
}

/// Runs `controller` until its watches end.
///
/// Errors requeue the object after its next Fibonacci backoff; a success
/// resets it. An object that disappeared mid-reconcile is dropped quietly.
async fn run_controller<K, F>(
    controller: Controller<K>,
    reconciler: Arc<Reconciler>,
    reconcile_fn: F,
    kind: &'static str,
    concurrency: u16,
) where
    K: Resource + Clone + Debug + serde::de::DeserializeOwned + Send + Sync + 'static,
    K::DynamicType: Default + Eq + std::hash::Hash + Clone + Debug + Unpin,
    F: Fn(Arc<Reconciler>, Arc<K>) -> ReconcileFuture + Send + Sync + Clone + 'static,
{
    info!(kind, "Starting controller");

    let error_policy = move |obj: Arc<K>, error: &ControllerError, ctx: Arc<Reconciler>| {
        let key = resource_key(kind, obj.as_ref());
        ctx.increment_error(&key);
        let (seconds, errors) = ctx.get_backoff_for_resource(&key);
        warn!(resource = %key, %error, errors, retry_in = seconds, "Reconciliation failed");
        Action::requeue(Duration::from_secs(seconds))
    };

    let reconcile = move |obj: Arc<K>, ctx: Arc<Reconciler>| {
        let reconcile_fn = reconcile_fn.clone();
        async move {
            let key = resource_key(kind, obj.as_ref());
            match reconcile_fn(ctx.clone(), obj).await {
                Ok(action) => {
                    ctx.reset_error(&key);
                    Ok(action)
                }
                Err(e) if e.is_not_found() => {
                    debug!(resource = %key, error = %e, "object went away during reconcile");
                    ctx.reset_error(&key);
                    Ok(Action::await_change())
                }
                Err(e) => Err(e),
            }
        }
    };

    let config = ControllerConfig::default()
        .debounce(DEBOUNCE)
        .concurrency(concurrency);

    controller
        .with_config(config)
        .run(reconcile, error_policy, reconciler)
        .for_each(|res| async move {
            match res {
                Ok((obj, action)) => debug!(kind, name = %obj.name, ?action, "reconciled"),
                Err(e) => error!(kind, error = %e, "Controller error"),
            }
        })
        .await;

    info!(kind, "Controller stopped");
}

/// Builds and runs the IvoryCluster and IvoryUpgrade controllers.
#[derive(Clone)]
pub struct Watcher {
    reconciler: Arc<Reconciler>,
    client: Client,
    config: OperatorConfig,
}

impl Debug for Watcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watcher")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Watcher {
    pub fn new(reconciler: Arc<Reconciler>, client: Client, config: OperatorConfig) -> Self {
        Self {
            reconciler,
            client,
            config,
        }
    }

    /// Api over the watched namespace, or all namespaces.
    fn api<K>(&self) -> Api<K>
    where
        K: Resource<Scope = NamespaceResourceScope>,
        K::DynamicType: Default,
    {
        match &self.config.namespace {
            Some(namespace) => Api::namespaced(self.client.clone(), namespace),
            None => Api::all(self.client.clone()),
        }
    }

    /// Watches IvoryClusters, the objects generated for them and their
    /// instance pods.
    pub async fn watch_clusters(&self) -> Result<(), ControllerError> {
        let generated = watcher::Config::default().labels(LABEL_CLUSTER);
        let instance_pods = watcher::Config::default().labels(&format!("{LABEL_CLUSTER},{LABEL_INSTANCE}"));

        let controller = Controller::new(self.api::<IvoryCluster>(), watcher::Config::default())
            .owns(self.api::<ConfigMap>(), generated.clone())
            .owns(self.api::<Secret>(), generated)
            .watches(self.api::<Pod>(), instance_pods, |pod: Pod| {
                let namespace = pod.namespace()?;
                let cluster = pod.labels().get(LABEL_CLUSTER)?;
                Some(ObjectRef::<IvoryCluster>::new(cluster).within(&namespace))
            });

        run_controller(
            controller,
            self.reconciler.clone(),
            |reconciler, cluster: Arc<IvoryCluster>| {
                Box::pin(async move { reconciler.reconcile_cluster(&cluster).await })
            },
            "IvoryCluster",
            self.config.concurrency,
        )
        .await;
        Ok(())
    }

    /// Watches IvoryUpgrades, their jobs, and the clusters they name.
    pub async fn watch_upgrades(&self) -> Result<(), ControllerError> {
        let controller = Controller::new(self.api::<IvoryUpgrade>(), watcher::Config::default());
        let upgrades = controller.store();

        let controller = controller
            .owns(self.api::<Job>(), watcher::Config::default().labels(LABEL_UPGRADE))
            .watches(
                self.api::<IvoryCluster>(),
                watcher::Config::default(),
                move |cluster: IvoryCluster| {
                    let name = cluster.name_any();
                    let namespace = cluster.namespace();
                    upgrades
                        .state()
                        .into_iter()
                        .filter(|u| u.spec.ivory_cluster_name == name && u.namespace() == namespace)
                        .map(|u| ObjectRef::from_obj(u.as_ref()))
                        .collect::<Vec<_>>()
                },
            );

        run_controller(
            controller,
            self.reconciler.clone(),
            |reconciler, upgrade: Arc<IvoryUpgrade>| {
                Box::pin(async move { reconciler.reconcile_upgrade(&upgrade).await })
            },
            "IvoryUpgrade",
            self.config.concurrency,
        )
        .await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::*;

    #[test]
    fn test_resource_key() {
        let cluster = test_cluster("hippo", "ns", 14);
        assert_eq!(resource_key("IvoryCluster", &cluster), "IvoryCluster/ns/hippo");
    }
}
