//! Names, labels and annotations shared between the operator and the objects
//! it generates. External tooling relies on these, so they are stable.

use std::collections::BTreeMap;

pub const LABEL_PREFIX: &str = "ivory.microscaler.io/";

pub const LABEL_CLUSTER: &str = "ivory.microscaler.io/cluster";
pub const LABEL_INSTANCE_SET: &str = "ivory.microscaler.io/instance-set";
pub const LABEL_INSTANCE: &str = "ivory.microscaler.io/instance";
pub const LABEL_ROLE: &str = "ivory.microscaler.io/role";
pub const LABEL_UPGRADE: &str = "ivory.microscaler.io/upgrade";
pub const LABEL_PGBACKREST: &str = "ivory.microscaler.io/pgbackrest";
pub const LABEL_PGBACKREST_CONFIG: &str = "ivory.microscaler.io/pgbackrest-config";
pub const LABEL_PGBACKREST_BACKUP: &str = "ivory.microscaler.io/pgbackrest-backup";
/// Database role whose credentials a user Secret holds.
pub const LABEL_USER: &str = "ivory.microscaler.io/ivory-user";

/// Role of the writable instance pod, set by the HA agent.
pub const ROLE_PRIMARY: &str = "master";
pub const ROLE_REPLICA: &str = "replica";
/// Consensus (DCS) Endpoints of the HA agent.
pub const ROLE_DCS: &str = "dcs";
pub const ROLE_PG_UPGRADE: &str = "pgupgrade";
pub const ROLE_REMOVE_DATA: &str = "removedata";
pub const ROLE_MONITORING: &str = "monitoring";
pub const ROLE_USER: &str = "ivoryuser";

/// Value of [`LABEL_PGBACKREST_BACKUP`] on jobs that seed new replicas.
pub const BACKUP_REPLICA_CREATE: &str = "replica-create";

/// Must equal the upgrade name for an upgrade to proceed.
pub const ANNOTATION_ALLOW_UPGRADE: &str = "ivory.microscaler.io/allow-upgrade";
/// `ipv6` makes the pgBackRest TLS server listen on `::`.
pub const ANNOTATION_PGBACKREST_IP_VERSION: &str = "ivory.microscaler.io/pgbackrest-ip-version";

pub const CONTAINER_DATABASE: &str = "database";
pub const CONTAINER_EXPORTER: &str = "exporter";
pub const CONTAINER_PGBACKREST: &str = "pgbackrest";
pub const CONTAINER_PG_UPGRADE: &str = "pgupgrade";

/// The single upgrade job for an upgrade.
pub fn upgrade_job_name(upgrade: &str) -> String {
    format!("{upgrade}-pgdata")
}

/// The data cleanup job for one replica instance.
pub fn remove_data_job_name(upgrade: &str, instance: &str) -> String {
    format!("{upgrade}-{instance}")
}

pub fn pgbackrest_config_map_name(cluster: &str) -> String {
    format!("{cluster}-pgbackrest-config")
}

pub fn monitoring_secret_name(cluster: &str) -> String {
    format!("{cluster}-monitoring")
}

pub fn exporter_web_config_name(cluster: &str) -> String {
    format!("{cluster}-exporter-web-config")
}

pub fn user_secret_name(cluster: &str, user: &str) -> String {
    format!("{cluster}-ivoryuser-{user}")
}

pub fn repo_host_name(cluster: &str) -> String {
    format!("{cluster}-repo-host")
}

/// Headless service in front of every cluster pod.
pub fn cluster_pod_service(cluster: &str) -> String {
    format!("{cluster}-pods")
}

/// Service routing to the writable instance.
pub fn cluster_primary_service(cluster: &str) -> String {
    format!("{cluster}-primary")
}

/// Data volume claim of an instance.
pub fn instance_pgdata_claim(instance: &str) -> String {
    format!("{instance}-pgdata")
}

pub fn cluster_labels(cluster: &str) -> BTreeMap<String, String> {
    BTreeMap::from([(LABEL_CLUSTER.to_string(), cluster.to_string())])
}

pub fn pgbackrest_config_labels(cluster: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (LABEL_CLUSTER.to_string(), cluster.to_string()),
        (LABEL_PGBACKREST.to_string(), String::new()),
        (LABEL_PGBACKREST_CONFIG.to_string(), String::new()),
    ])
}

/// Merges label or annotation maps; later maps win. Keys under the operator's
/// own prefix are only accepted from the last map.
pub fn merge(maps: &[&BTreeMap<String, String>]) -> BTreeMap<String, String> {
    let mut merged = BTreeMap::new();
    let last = maps.len().saturating_sub(1);
    for (i, map) in maps.iter().enumerate() {
        for (k, v) in map.iter() {
            if i != last && k.starts_with(LABEL_PREFIX) {
                continue;
            }
            merged.insert(k.clone(), v.clone());
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_names() {
        assert_eq!(upgrade_job_name("up"), "up-pgdata");
        assert_eq!(remove_data_job_name("up", "hippo-00-abcd"), "up-hippo-00-abcd");
    }

    #[test]
    fn test_merge_protects_operator_labels() {
        let user = BTreeMap::from([
            ("team".to_string(), "db".to_string()),
            (LABEL_CLUSTER.to_string(), "spoofed".to_string()),
        ]);
        let ours = cluster_labels("hippo");
        let merged = merge(&[&user, &ours]);
        assert_eq!(merged.get("team").map(String::as_str), Some("db"));
        assert_eq!(merged.get(LABEL_CLUSTER).map(String::as_str), Some("hippo"));

        let only_user = merge(&[&user, &BTreeMap::new()]);
        assert!(!only_user.contains_key(LABEL_CLUSTER));
    }
}
