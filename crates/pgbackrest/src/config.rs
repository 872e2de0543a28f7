//! pgBackRest configuration files
//!
//! Builds the configuration for the three places pgBackRest runs: each
//! database instance, the optional dedicated repository host, and the TLS
//! server on that host. Everything here is a pure function of the cluster
//! spec, so identical input always yields byte-identical files.

use crate::ini::{IniMultiSet, IniSectionSet};
use crds::naming;
use crds::{IvoryCluster, RepoBackend, RepositoryDescriptor};
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::{Resource, ResourceExt};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Name of the single stanza managed by the operator.
pub const DEFAULT_STANZA: &str = "db";

pub const CM_INSTANCE_KEY: &str = "pgbackrest_instance.conf";
pub const CM_REPO_KEY: &str = "pgbackrest_repo.conf";
pub const CM_SERVER_KEY: &str = "pgbackrest-server.conf";
pub const CONFIG_HASH_KEY: &str = "config-hash";

pub const CONFIG_DIRECTORY: &str = "/etc/pgbackrest/conf.d";
pub const REPO_MOUNT_PATH: &str = "/pgbackrest";
/// Log directory for commands run on a database instance.
pub const PGDATA_LOG_PATH: &str = "/pgdata/pgbackrest/log";
/// Certificates and keys of the TLS server live outside [`CONFIG_DIRECTORY`]
/// so that a primary change does not alter the configuration hash.
pub const SERVER_MOUNT_PATH: &str = "/etc/pgbackrest/server";

pub const CERT_AUTHORITY_PATH: &str = "/etc/pgbackrest/conf.d/~ivory-operator/tls-ca.crt";
pub const CERT_CLIENT_PATH: &str = "/etc/pgbackrest/conf.d/~ivory-operator/client-tls.crt";
pub const CERT_CLIENT_KEY_PATH: &str = "/etc/pgbackrest/conf.d/~ivory-operator/client-tls.key";
pub const CERT_SERVER_PATH: &str = "/etc/pgbackrest/server/server-tls.crt";
pub const CERT_SERVER_KEY_PATH: &str = "/etc/pgbackrest/server/server-tls.key";

/// Prefixed to every generated file.
pub const GENERATED_BANNER: &str =
    "# Generated by ivory-operator. DO NOT EDIT.\n# Your changes will not be saved.\n";

/// What a database instance needs to know to reach its repositories.
#[derive(Debug, Clone)]
pub struct InstanceTopology<'a> {
    pub repos: &'a [RepositoryDescriptor],
    pub global: &'a BTreeMap<String, String>,
    /// FQDN of the dedicated repository host, when there is one
    pub repo_host: Option<String>,
    pub pgdata: String,
    pub port: i32,
}

/// What the dedicated repository host needs to know to reach every instance.
#[derive(Debug, Clone)]
pub struct RepoHostTopology<'a> {
    pub repos: &'a [RepositoryDescriptor],
    pub global: &'a BTreeMap<String, String>,
    /// Instance FQDNs; their order fixes the `pgN` numbering
    pub pg_hosts: Vec<String>,
    pub pgdata: String,
    pub port: i32,
}

/// Where a repository's files live on its volume or in its bucket.
pub fn repo_path(repo: &str) -> String {
    format!("{REPO_MOUNT_PATH}/{repo}")
}

/// Log directory used on the repository host for the given volume repo.
pub fn repo_log_path(repo: &str) -> String {
    format!("{REPO_MOUNT_PATH}/{repo}/log")
}

/// A dedicated repository host runs only when requested and at least one
/// repository is a volume; cloud repositories are reached directly.
pub fn dedicated_repo_host_enabled(cluster: &IvoryCluster) -> bool {
    let pgbackrest = &cluster.spec.backups.pgbackrest;
    pgbackrest.repo_host.is_some() && pgbackrest.repos.iter().any(RepositoryDescriptor::is_volume)
}

/// Stable DNS name of the first pod of a StatefulSet behind `service`.
pub fn pod_fqdn(host: &str, service: &str, namespace: &str, domain: &str) -> String {
    format!("{host}-0.{service}.{namespace}.svc.{domain}")
}

/// Common name of the client certificate the instances present.
pub fn client_common_name(cluster: &IvoryCluster) -> String {
    format!("pgbackrest@{}", cluster.uid().unwrap_or_default())
}

/// Options for a cloud repository, `type` first. Volume repositories and
/// repositories without a backend have none.
fn backend_options(repo: &RepositoryDescriptor) -> Vec<(String, String)> {
    let name = &repo.name;
    match &repo.backend {
        Some(RepoBackend::S3(s3)) => vec![
            (format!("{name}-type"), "s3".to_string()),
            (format!("{name}-s3-bucket"), s3.bucket.clone()),
            (format!("{name}-s3-endpoint"), s3.endpoint.clone()),
            (format!("{name}-s3-region"), s3.region.clone()),
        ],
        Some(RepoBackend::Gcs(gcs)) => vec![
            (format!("{name}-type"), "gcs".to_string()),
            (format!("{name}-gcs-bucket"), gcs.bucket.clone()),
        ],
        Some(RepoBackend::Azure(azure)) => vec![
            (format!("{name}-type"), "azure".to_string()),
            (format!("{name}-azure-container"), azure.container.clone()),
        ],
        Some(RepoBackend::Volume(_)) | None => Vec::new(),
    }
}

fn set_repo_options(global: &mut IniMultiSet, repo: &RepositoryDescriptor) {
    global.set(format!("{}-path", repo.name), repo_path(&repo.name));
    for (key, value) in backend_options(repo) {
        global.set(key, value);
    }
}

fn set_overrides(global: &mut IniMultiSet, overrides: &BTreeMap<String, String>) {
    for (key, value) in overrides {
        global.set(key.as_str(), value.as_str());
    }
}

/// Configuration used on every database instance.
pub fn instance_config(topology: &InstanceTopology<'_>) -> IniSectionSet {
    let mut sections = IniSectionSet::new();

    let global = sections.section_mut("global");
    global.set("log-path", PGDATA_LOG_PATH);

    for repo in topology.repos {
        set_repo_options(global, repo);

        // Only volume repositories are served by the repository host.
        if let (Some(host), true) = (&topology.repo_host, repo.is_volume()) {
            let name = &repo.name;
            global.set(format!("{name}-host"), host.as_str());
            global.set(format!("{name}-host-type"), "tls");
            global.set(format!("{name}-host-ca-file"), CERT_AUTHORITY_PATH);
            global.set(format!("{name}-host-cert-file"), CERT_CLIENT_PATH);
            global.set(format!("{name}-host-key-file"), CERT_CLIENT_KEY_PATH);
            global.set(format!("{name}-host-user"), ivory::users::SUPERUSER);
        }
    }
    set_overrides(global, topology.global);

    // The local instance is always pg1.
    let stanza = sections.section_mut(DEFAULT_STANZA);
    stanza.set("pg1-path", topology.pgdata.as_str());
    stanza.set("pg1-port", topology.port.to_string());
    stanza.set("pg1-socket-path", ivory::SOCKET_DIRECTORY);

    sections
}

/// Configuration used on the dedicated repository host.
pub fn repo_host_config(topology: &RepoHostTopology<'_>) -> IniSectionSet {
    let mut sections = IniSectionSet::new();

    let global = sections.section_mut("global");
    let mut log_path_set = false;
    for repo in topology.repos {
        set_repo_options(global, repo);

        if !log_path_set && repo.is_volume() {
            global.set("log-path", repo_log_path(&repo.name));
            log_path_set = true;
        }
    }
    set_overrides(global, topology.global);

    let stanza = sections.section_mut(DEFAULT_STANZA);
    for (i, host) in topology.pg_hosts.iter().enumerate() {
        let n = i + 1;
        stanza.set(format!("pg{n}-host"), host.as_str());
        stanza.set(format!("pg{n}-host-type"), "tls");
        stanza.set(format!("pg{n}-host-ca-file"), CERT_AUTHORITY_PATH);
        stanza.set(format!("pg{n}-host-cert-file"), CERT_CLIENT_PATH);
        stanza.set(format!("pg{n}-host-key-file"), CERT_CLIENT_KEY_PATH);
        stanza.set(format!("pg{n}-path"), topology.pgdata.as_str());
        stanza.set(format!("pg{n}-port"), topology.port.to_string());
        stanza.set(format!("pg{n}-socket-path"), ivory::SOCKET_DIRECTORY);
    }

    sections
}

/// Options for the TLS server on the repository host.
pub fn server_config(cluster: &IvoryCluster) -> IniSectionSet {
    let mut sections = IniSectionSet::new();

    let global = sections.section_mut("global");
    global.set("tls-server-address", "0.0.0.0");
    let ipv6 = cluster
        .annotations()
        .get(naming::ANNOTATION_PGBACKREST_IP_VERSION)
        .is_some_and(|v| v.eq_ignore_ascii_case("ipv6"));
    if ipv6 {
        global.set("tls-server-address", "::");
    }

    // The wildcard lets `info` and `repo-ls` run without `--stanza`.
    global.add("tls-server-auth", format!("{}=*", client_common_name(cluster)));
    global.set("tls-server-ca-file", CERT_AUTHORITY_PATH);
    global.set("tls-server-cert-file", CERT_SERVER_PATH);
    global.set("tls-server-key-file", CERT_SERVER_KEY_PATH);

    let server = sections.section_mut("global:server");
    server.set("log-level-console", "detail");
    server.set("log-level-stderr", "error");
    server.set("log-level-file", "off");
    server.set("log-timestamp", "n");

    sections
}

/// Renders a file body with the generated banner.
pub fn render(sections: &IniSectionSet) -> String {
    format!("{GENERATED_BANNER}{sections}")
}

/// Hex SHA-256 over the given file bodies, in order. The ConfigMap hashes
/// its bodies in key order.
///
/// Each body is prefixed with its length, so moving bytes from one body to
/// the next changes the hash.
pub fn calculate_config_hash(bodies: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for body in bodies {
        hasher.update((body.len() as u64).to_be_bytes());
        hasher.update(body.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

/// Hex SHA-256 of the options that identify a repository. A change means
/// the stanza has to be created again.
pub fn repo_options_hash(repo: &RepositoryDescriptor) -> String {
    let mut options = IniMultiSet::new();
    options.set(format!("{}-path", repo.name), repo_path(&repo.name));
    for (key, value) in backend_options(repo) {
        options.set(key, value);
    }
    calculate_config_hash(&[&options.to_string()])
}

/// The `<cluster>-pgbackrest-config` ConfigMap.
///
/// `instance_names` are the instance StatefulSets the repository host
/// connects to; `cluster_domain` completes their DNS names.
pub fn config_map_intent(
    cluster: &IvoryCluster,
    instance_names: &[String],
    cluster_domain: &str,
) -> ConfigMap {
    let name = cluster.name_any();
    let namespace = cluster.namespace().unwrap_or_default();
    let service = naming::cluster_pod_service(&name);
    let pgbackrest = &cluster.spec.backups.pgbackrest;
    let pgdata = ivory::data_directory(cluster.spec.ivory_version);

    let dedicated = dedicated_repo_host_enabled(cluster);
    let repo_host = dedicated.then(|| {
        pod_fqdn(&naming::repo_host_name(&name), &service, &namespace, cluster_domain)
    });

    let instance = render(&instance_config(&InstanceTopology {
        repos: &pgbackrest.repos,
        global: &pgbackrest.global,
        repo_host,
        pgdata: pgdata.clone(),
        port: cluster.spec.port,
    }));

    // Instances that have not rolled out yet may still mount the server
    // file, so it is always present.
    let mut data = BTreeMap::from([
        (CM_INSTANCE_KEY.to_string(), instance),
        (CM_SERVER_KEY.to_string(), String::new()),
    ]);

    if dedicated {
        let pg_hosts = instance_names
            .iter()
            .map(|i| pod_fqdn(i, &service, &namespace, cluster_domain))
            .collect();
        data.insert(CM_SERVER_KEY.to_string(), render(&server_config(cluster)));
        data.insert(
            CM_REPO_KEY.to_string(),
            render(&repo_host_config(&RepoHostTopology {
                repos: &pgbackrest.repos,
                global: &pgbackrest.global,
                pg_hosts,
                pgdata,
                port: cluster.spec.port,
            })),
        );
    }

    let bodies: Vec<&str> = data.values().map(String::as_str).collect();
    let hash = calculate_config_hash(&bodies);
    data.insert(CONFIG_HASH_KEY.to_string(), hash);

    let empty = BTreeMap::new();
    let cluster_meta = cluster.spec.metadata.as_ref();
    let backrest_meta = pgbackrest.metadata.as_ref();
    let labels = naming::merge(&[
        cluster_meta.map_or(&empty, |m| &m.labels),
        backrest_meta.map_or(&empty, |m| &m.labels),
        &naming::pgbackrest_config_labels(&name),
    ]);
    let annotations = naming::merge(&[
        cluster_meta.map_or(&empty, |m| &m.annotations),
        backrest_meta.map_or(&empty, |m| &m.annotations),
    ]);

    ConfigMap {
        metadata: ObjectMeta {
            name: Some(naming::pgbackrest_config_map_name(&name)),
            namespace: Some(namespace),
            labels: Some(labels),
            annotations: (!annotations.is_empty()).then_some(annotations),
            owner_references: cluster.controller_owner_ref(&()).map(|r| vec![r]),
            ..Default::default()
        },
        data: Some(data),
        ..Default::default()
    }
}
