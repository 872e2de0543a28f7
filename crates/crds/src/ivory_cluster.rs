//! IvoryCluster CRD
//!
//! Declares a managed database cluster: instance sets, backup repositories,
//! monitoring and users. Status is written only by the operator.

use crate::conditions::Condition;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "ivory.microscaler.io",
    version = "v1beta1",
    kind = "IvoryCluster",
    namespaced,
    status = "IvoryClusterStatus",
    shortname = "ivc"
)]
#[serde(rename_all = "camelCase")]
pub struct IvoryClusterSpec {
    /// Major version of the database the cluster should run
    pub ivory_version: i32,

    /// Port the database listens on
    #[serde(default = "default_port")]
    pub port: i32,

    /// Database container image (operator default when unset)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    /// Instance sets making up the cluster
    #[serde(default)]
    pub instances: Vec<InstanceSetSpec>,

    /// Backup configuration
    #[serde(default)]
    pub backups: BackupsSpec,

    /// Monitoring sidecars
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monitoring: Option<MonitoringSpec>,

    /// Database users managed by the operator
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub users: Vec<UserSpec>,

    /// Labels and annotations merged onto every generated object
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
}

fn default_port() -> i32 {
    5432
}

/// Labels and annotations to propagate onto generated objects.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct InstanceSetSpec {
    /// Instance set name, unique within the cluster
    #[serde(default = "default_instance_set_name")]
    pub name: String,

    /// Number of instances in this set
    #[serde(default = "default_replicas")]
    pub replicas: i32,

    /// Compute resources of the database container
    #[serde(default)]
    pub resources: ResourceSpec,
}

fn default_instance_set_name() -> String {
    "00".to_string()
}

fn default_replicas() -> i32 {
    1
}

/// Resource quantities keyed by resource name (`cpu`, `memory`, `hugepages-2Mi`, ...).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSpec {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub limits: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub requests: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct BackupsSpec {
    #[serde(default)]
    pub pgbackrest: PgBackRestSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct PgBackRestSpec {
    /// Backup repositories, in the order they are numbered
    #[serde(default)]
    pub repos: Vec<RepositoryDescriptor>,

    /// Global pgBackRest options; applied after generated options
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub global: BTreeMap<String, String>,

    /// Dedicated repository host. Only takes effect with at least one volume repo.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo_host: Option<RepoHostSpec>,

    /// Labels and annotations for pgBackRest objects
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct RepoHostSpec {
    #[serde(default)]
    pub resources: ResourceSpec,
}

/// A named backup repository. The storage backend is a one-of object keyed by
/// `volume`, `s3`, `gcs` or `azure`; more than one backend key is rejected.
#[derive(Debug, Clone, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
#[schemars(extend("maxProperties" = 2))]
pub struct RepositoryDescriptor {
    /// Repository name, `repo1` through `repo4`
    pub name: String,

    #[serde(flatten, skip_serializing_if = "Option::is_none")]
    pub backend: Option<RepoBackend>,
}

/// Wire form of [`RepositoryDescriptor`], one optional field per backend.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RepositoryFields {
    name: String,
    #[serde(default)]
    volume: Option<VolumeRepo>,
    #[serde(default)]
    s3: Option<S3Repo>,
    #[serde(default)]
    gcs: Option<GcsRepo>,
    #[serde(default)]
    azure: Option<AzureRepo>,
}

impl<'de> Deserialize<'de> for RepositoryDescriptor {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let fields = RepositoryFields::deserialize(deserializer)?;
        let mut backends = [
            fields.volume.map(RepoBackend::Volume),
            fields.s3.map(RepoBackend::S3),
            fields.gcs.map(RepoBackend::Gcs),
            fields.azure.map(RepoBackend::Azure),
        ]
        .into_iter()
        .flatten();

        let backend = backends.next();
        if backends.next().is_some() {
            return Err(serde::de::Error::custom(format!(
                "repository {} declares more than one backend",
                fields.name
            )));
        }
        Ok(Self {
            name: fields.name,
            backend,
        })
    }
}

impl RepositoryDescriptor {
    /// True when the repository is backed by a persistent volume.
    pub fn is_volume(&self) -> bool {
        matches!(self.backend, Some(RepoBackend::Volume(_)))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum RepoBackend {
    Volume(VolumeRepo),
    S3(S3Repo),
    Gcs(GcsRepo),
    Azure(AzureRepo),
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct VolumeRepo {
    /// Existing claim to use instead of a generated one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claim: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct S3Repo {
    pub bucket: String,
    pub endpoint: String,
    pub region: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GcsRepo {
    pub bucket: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AzureRepo {
    pub container: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct MonitoringSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exporter: Option<ExporterSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct ExporterSpec {
    /// Exporter container image
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    /// Secret holding `tls.crt` and `tls.key` for the exporter endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_tls_secret: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserSpec {
    /// Role name
    pub name: String,

    /// Databases the role is granted all privileges on
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub databases: Vec<String>,

    /// Role attributes, e.g. `LOGIN CREATEDB`
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub options: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IvoryClusterStatus {
    /// Major version the cluster data directory is running
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ivory_version: Option<i32>,

    /// Instance that should be started first after a shutdown
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub startup_instance: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pgbackrest: Option<PgBackRestStatus>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monitoring: Option<MonitoringStatus>,

    /// Revision of the user SQL last applied
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub users_revision: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PgBackRestStatus {
    #[serde(default)]
    pub repos: Vec<RepoStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RepoStatus {
    pub name: String,

    /// Hash of the options that identify the repository
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo_options_hash: Option<String>,

    /// Whether `stanza-create` has succeeded against this repository
    #[serde(default)]
    pub stanza_created: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MonitoringStatus {
    /// Revision of the exporter SQL last applied
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exporter_configuration: Option<String>,
}

impl IvoryCluster {
    /// Whether the metrics exporter sidecar is requested.
    pub fn exporter_enabled(&self) -> bool {
        self.spec
            .monitoring
            .as_ref()
            .and_then(|m| m.exporter.as_ref())
            .is_some()
    }

    /// The exporter's custom TLS secret, when the exporter is enabled.
    pub fn exporter_tls_secret(&self) -> Option<&str> {
        self.spec
            .monitoring
            .as_ref()
            .and_then(|m| m.exporter.as_ref())
            .and_then(|e| e.custom_tls_secret.as_deref())
    }

    /// Version recorded in status, falling back to the declared version.
    pub fn running_version(&self) -> i32 {
        self.status
            .as_ref()
            .and_then(|s| s.ivory_version)
            .unwrap_or(self.spec.ivory_version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repository_backend_one_of() {
        let repos: Vec<RepositoryDescriptor> = serde_json::from_value(serde_json::json!([
            {"name": "repo1", "volume": {}},
            {"name": "repo2", "s3": {"bucket": "b", "endpoint": "e", "region": "r"}},
            {"name": "repo3", "gcs": {"bucket": "g"}},
            {"name": "repo4", "azure": {"container": "c"}},
            {"name": "repo5"},
        ]))
        .unwrap();

        assert_eq!(repos[0].backend, Some(RepoBackend::Volume(VolumeRepo::default())));
        assert!(repos[0].is_volume());
        assert_eq!(
            repos[1].backend,
            Some(RepoBackend::S3(S3Repo {
                bucket: "b".to_string(),
                endpoint: "e".to_string(),
                region: "r".to_string(),
            }))
        );
        assert_eq!(repos[2].backend, Some(RepoBackend::Gcs(GcsRepo { bucket: "g".to_string() })));
        assert_eq!(
            repos[3].backend,
            Some(RepoBackend::Azure(AzureRepo { container: "c".to_string() }))
        );
        assert_eq!(repos[4].backend, None);
    }

    #[test]
    fn test_repository_rejects_two_backends() {
        let err = serde_json::from_value::<RepositoryDescriptor>(serde_json::json!({
            "name": "repo1",
            "volume": {},
            "s3": {"bucket": "b", "endpoint": "e", "region": "r"},
        }))
        .unwrap_err();
        assert!(err.to_string().contains("repo1 declares more than one backend"), "{err}");

        let schema = schemars::schema_for!(RepositoryDescriptor);
        assert_eq!(schema.get("maxProperties"), Some(&serde_json::json!(2)));
    }

    #[test]
    fn test_repository_serializes_backend_key() {
        let repo = RepositoryDescriptor {
            name: "repo1".to_string(),
            backend: Some(RepoBackend::Gcs(GcsRepo { bucket: "g".to_string() })),
        };
        assert_eq!(
            serde_json::to_value(&repo).unwrap(),
            serde_json::json!({"name": "repo1", "gcs": {"bucket": "g"}})
        );
    }

    #[test]
    fn test_spec_defaults() {
        let spec: IvoryClusterSpec = serde_json::from_value(serde_json::json!({
            "ivoryVersion": 15,
            "instances": [{}],
        }))
        .unwrap();
        assert_eq!(spec.port, 5432);
        assert_eq!(spec.instances[0].name, "00");
        assert_eq!(spec.instances[0].replicas, 1);
        assert!(spec.backups.pgbackrest.repos.is_empty());
    }
}
