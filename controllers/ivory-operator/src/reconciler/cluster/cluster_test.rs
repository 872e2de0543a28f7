//! Unit tests for the IvoryCluster reconciler

#[cfg(test)]
mod tests {
    use super::super::{REASON_NO_WRITABLE_INSTANCE, STANZA_RETRY_INTERVAL};
    use crate::config::DEFAULT_REFRESH_INTERVAL;
    use crate::test_utils::*;
    use crds::naming::{CONTAINER_DATABASE, CONTAINER_EXPORTER};
    use crds::{
        CONDITION_CONFIGURATION_READY, CONDITION_WRITABLE_INSTANCE, ConditionStatus, ExporterSpec,
        IvoryCluster, MonitoringSpec, UserSpec, find_condition, is_condition_true,
    };
    use ivory_store::{ExecOutput, Kind, MockStore, Verb};
    use k8s_openapi::api::core::v1::{ConfigMap, Secret};
    use kube_runtime::controller::Action;
    use pgbackrest::CONFIG_HASH_MISMATCH;

    const INSTANCE: &str = "hippo-00-aaaa";

    fn running_cluster(store: &MockStore, cluster: &IvoryCluster) {
        store.insert(cluster);
        store.insert(&test_instance_set("hippo", "ns", INSTANCE));
        store.insert(&test_instance_pod("hippo", "ns", INSTANCE, "master", true));
    }

    fn with_exporter(mut cluster: IvoryCluster, tls: Option<&str>) -> IvoryCluster {
        cluster.spec.monitoring = Some(MonitoringSpec {
            exporter: Some(ExporterSpec {
                image: None,
                custom_tls_secret: tls.map(str::to_string),
            }),
        });
        cluster
    }

    /// Reconciles the stored cluster, as the controller would after a watch event.
    async fn reconcile(store: &MockStore) -> Result<Action, crate::error::ControllerError> {
        let reconciler = test_reconciler_with(store);
        let cluster: IvoryCluster = store.object("ns", "hippo").unwrap();
        reconciler.reconcile_cluster(&cluster).await
    }

    fn stored(store: &MockStore) -> IvoryCluster {
        store.object("ns", "hippo").unwrap()
    }

    /// Replaces the spec of the stored cluster, keeping its status.
    fn update_spec(store: &MockStore, change: impl FnOnce(&mut IvoryCluster)) {
        let mut cluster = stored(store);
        change(&mut cluster);
        store.insert(&cluster);
    }

    #[tokio::test]
    async fn test_happy_path() {
        let store = MockStore::new();
        running_cluster(&store, &test_cluster("hippo", "ns", 14));

        let action = reconcile(&store).await.unwrap();
        assert_eq!(action, Action::requeue(DEFAULT_REFRESH_INTERVAL));

        let config: ConfigMap = store.object("ns", "hippo-pgbackrest-config").unwrap();
        let hash = config.data.unwrap()[pgbackrest::config::CONFIG_HASH_KEY].clone();
        assert!(store.object::<Secret>("ns", "hippo-ivoryuser-hippo").is_some());
        assert!(store.object::<Secret>("ns", "hippo-monitoring").is_none());

        // stanza-create, exporter disable, users
        let calls = store.exec_calls();
        assert_eq!(calls.len(), 3);
        assert!(calls.iter().all(|c| c.pod == "hippo-00-aaaa-0" && c.container == CONTAINER_DATABASE));
        assert!(calls[0].command.contains(&hash));
        assert!(calls[1].stdin.as_deref().unwrap().contains("NOLOGIN"));
        assert!(calls[2].stdin.as_deref().unwrap().contains(r#""username":"hippo""#));

        let status = stored(&store).status.unwrap();
        assert_eq!(status.ivory_version, Some(14));
        assert_eq!(status.startup_instance.as_deref(), Some(INSTANCE));
        assert_eq!(status.observed_generation, Some(1));
        assert!(status.pgbackrest.unwrap().repos.iter().all(|r| r.stanza_created));
        assert!(status.monitoring.unwrap().exporter_configuration.is_some());
        assert!(status.users_revision.is_some());
        assert!(is_condition_true(&status.conditions, CONDITION_CONFIGURATION_READY));
        assert!(is_condition_true(&status.conditions, CONDITION_WRITABLE_INSTANCE));
    }

    #[tokio::test]
    async fn test_steady_state_makes_no_changes() {
        let store = MockStore::new();
        running_cluster(&store, &test_cluster("hippo", "ns", 14));
        reconcile(&store).await.unwrap();

        store.reset_calls();
        reconcile(&store).await.unwrap();

        assert!(store.exec_calls().is_empty());
        assert_eq!(store.total_calls(Verb::Create), 0);
        assert_eq!(store.total_calls(Verb::Patch), 0);
        assert_eq!(store.total_calls(Verb::PatchStatus), 0);
        assert_eq!(store.total_calls(Verb::Delete), 0);
    }

    #[tokio::test]
    async fn test_image_change_reruns_sql() {
        let store = MockStore::new();
        running_cluster(&store, &test_cluster("hippo", "ns", 14));
        reconcile(&store).await.unwrap();
        let first = stored(&store).status.unwrap();

        let pod = test_instance_pod("hippo", "ns", INSTANCE, "master", true);
        store.insert(&with_image_id(pod, CONTAINER_DATABASE, "db@sha256:2"));
        store.reset_calls();
        reconcile(&store).await.unwrap();

        // Exporter and users run again; the stanza exists already.
        assert_eq!(store.exec_calls().len(), 2);
        let second = stored(&store).status.unwrap();
        assert_ne!(second.users_revision, first.users_revision);
        assert_ne!(second.monitoring, first.monitoring);
    }

    #[tokio::test]
    async fn test_no_writable_instance() {
        let store = MockStore::new();
        store.insert(&test_cluster("hippo", "ns", 14));
        store.insert(&test_instance_set("hippo", "ns", INSTANCE));
        store.insert(&test_instance_pod("hippo", "ns", INSTANCE, "replica", true));

        let action = reconcile(&store).await.unwrap();

        assert_eq!(action, Action::requeue(DEFAULT_REFRESH_INTERVAL));
        assert!(store.exec_calls().is_empty());
        assert!(store.object::<ConfigMap>("ns", "hippo-pgbackrest-config").is_some());

        let status = stored(&store).status.unwrap();
        assert_eq!(status.startup_instance, None);
        let writable = find_condition(&status.conditions, CONDITION_WRITABLE_INSTANCE).unwrap();
        assert_eq!(writable.status, ConditionStatus::False);
        assert_eq!(writable.reason, REASON_NO_WRITABLE_INSTANCE);
        assert!(!status.pgbackrest.unwrap().repos[0].stanza_created);
    }

    #[tokio::test]
    async fn test_stanza_waits_for_configuration() {
        let store = MockStore::new();
        running_cluster(&store, &test_cluster("hippo", "ns", 14));
        store.script_exec(
            CONTAINER_DATABASE,
            Err(format!("command terminated with non-zero exit code: {CONFIG_HASH_MISMATCH}")),
        );

        let action = reconcile(&store).await.unwrap();

        assert_eq!(action, Action::requeue(STANZA_RETRY_INTERVAL));
        let status = stored(&store).status.unwrap();
        assert!(!status.pgbackrest.unwrap().repos[0].stanza_created);
        assert!(status.users_revision.is_some());

        reconcile(&store).await.unwrap();
        let status = stored(&store).status.unwrap();
        assert!(status.pgbackrest.unwrap().repos[0].stanza_created);
    }

    #[tokio::test]
    async fn test_stanza_failure_is_returned_with_status() {
        let store = MockStore::new();
        running_cluster(&store, &test_cluster("hippo", "ns", 14));
        store.script_exec(CONTAINER_DATABASE, Err("repo unreachable".to_string()));

        let result = reconcile(&store).await;

        assert!(result.is_err());
        let status = stored(&store).status.unwrap();
        assert!(is_condition_true(&status.conditions, CONDITION_WRITABLE_INSTANCE));
        assert!(!status.pgbackrest.unwrap().repos[0].stanza_created);
        assert_eq!(status.users_revision, None);
    }

    #[tokio::test]
    async fn test_exporter_enabled_then_disabled() {
        let store = MockStore::new();
        running_cluster(&store, &with_exporter(test_cluster("hippo", "ns", 14), None));
        store.script_exec(
            CONTAINER_EXPORTER,
            Ok(ExecOutput {
                stdout: "CREATE SCHEMA IF NOT EXISTS monitor;".to_string(),
                stderr: String::new(),
            }),
        );

        reconcile(&store).await.unwrap();

        let secret: Secret = store.object("ns", "hippo-monitoring").unwrap();
        assert_eq!(
            super::super::intent::secret_value(&secret, "verifier").as_deref(),
            Some("verifier-1")
        );
        let calls = store.exec_calls();
        let exporter: Vec<_> = calls.iter().filter(|c| c.container == CONTAINER_EXPORTER).collect();
        assert_eq!(exporter.len(), 1);
        assert_eq!(exporter[0].command[1], "/opt/cpm/conf/pg14/setup.sql");
        let stdins: Vec<&str> = calls.iter().filter_map(|c| c.stdin.as_deref()).collect();
        assert!(stdins.iter().any(|s| s.contains("verifier-1") && s.contains("ccp_monitoring")));
        assert!(stdins.iter().any(|s| s.contains("CREATE SCHEMA IF NOT EXISTS monitor;")));

        update_spec(&store, |c| c.spec.monitoring = None);
        store.reset_calls();
        reconcile(&store).await.unwrap();

        assert!(store.object::<Secret>("ns", "hippo-monitoring").is_none());
        let calls = store.exec_calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].stdin.as_deref().unwrap().contains("NOLOGIN"));
    }

    #[tokio::test]
    async fn test_exporter_waits_for_container() {
        let store = MockStore::new();
        running_cluster(&store, &with_exporter(test_cluster("hippo", "ns", 14), None));
        let pod = test_instance_pod("hippo", "ns", INSTANCE, "master", true);
        store.insert(&with_image_id(pod, CONTAINER_EXPORTER, ""));

        reconcile(&store).await.unwrap();

        let status = stored(&store).status.unwrap();
        assert_eq!(status.monitoring, None);
        assert!(store.exec_calls().iter().all(|c| c.container == CONTAINER_DATABASE));
    }

    #[tokio::test]
    async fn test_users_wait_for_database_image() {
        let store = MockStore::new();
        running_cluster(&store, &test_cluster("hippo", "ns", 14));
        let pod = test_instance_pod("hippo", "ns", INSTANCE, "master", true);
        store.insert(&with_image_id(pod, CONTAINER_DATABASE, ""));

        reconcile(&store).await.unwrap();

        let status = stored(&store).status.unwrap();
        assert_eq!(status.users_revision, None);
        assert_eq!(status.monitoring, None);
        // Only the stanza runs without an image to salt the revisions with.
        assert_eq!(store.exec_calls().len(), 1);
        assert!(store.exec_calls()[0].stdin.is_none());

        store.insert(&test_instance_pod("hippo", "ns", INSTANCE, "master", true));
        reconcile(&store).await.unwrap();
        assert!(stored(&store).status.unwrap().users_revision.is_some());
    }

    #[tokio::test]
    async fn test_exporter_web_config_follows_tls_secret() {
        let store = MockStore::new();
        store.insert(&with_exporter(test_cluster("hippo", "ns", 14), Some("exporter-certs")));

        reconcile(&store).await.unwrap();
        assert!(store.object::<ConfigMap>("ns", "hippo-exporter-web-config").is_some());

        update_spec(&store, |c| {
            c.spec.monitoring.as_mut().unwrap().exporter.as_mut().unwrap().custom_tls_secret = None
        });
        reconcile(&store).await.unwrap();
        assert!(store.object::<ConfigMap>("ns", "hippo-exporter-web-config").is_none());
    }

    #[tokio::test]
    async fn test_removed_users_lose_their_secret() {
        let store = MockStore::new();
        running_cluster(&store, &test_cluster("hippo", "ns", 14));
        reconcile(&store).await.unwrap();
        assert!(store.object::<Secret>("ns", "hippo-ivoryuser-hippo").is_some());

        update_spec(&store, |c| {
            c.spec.users = vec![UserSpec {
                name: "app".to_string(),
                databases: vec!["app".to_string()],
                options: "CREATEDB".to_string(),
            }]
        });
        store.reset_calls();
        reconcile(&store).await.unwrap();

        assert!(store.object::<Secret>("ns", "hippo-ivoryuser-hippo").is_none());
        assert!(store.object::<Secret>("ns", "hippo-ivoryuser-app").is_some());
        let calls = store.exec_calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].stdin.as_deref().unwrap().contains(r#""username":"app""#));
    }

    #[tokio::test]
    async fn test_upgraded_version_is_kept() {
        let store = MockStore::new();
        let mut cluster = test_cluster("hippo", "ns", 14);
        cluster.status = Some(crds::IvoryClusterStatus {
            ivory_version: Some(15),
            ..Default::default()
        });
        store.insert(&cluster);

        reconcile(&store).await.unwrap();

        assert_eq!(stored(&store).status.unwrap().ivory_version, Some(15));
        assert_eq!(store.calls(Verb::PatchStatus, Kind::IvoryCluster), 1);
    }
}
