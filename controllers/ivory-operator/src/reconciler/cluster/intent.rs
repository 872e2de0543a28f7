//! Object intents of an IvoryCluster besides the pgBackRest configuration.
//!
//! Builders here never talk to the store. Secrets take the current object so
//! that passwords are generated once and then kept.

use crds::naming::{self, LABEL_CLUSTER, LABEL_ROLE, LABEL_USER, ROLE_MONITORING, ROLE_USER};
use crds::{IvoryCluster, UserSpec};
use ivory_store::{GeneratedSecret, SecretGenerator};
use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::{Resource, ResourceExt};
use std::collections::BTreeMap;

pub const KEY_PASSWORD: &str = "password";
pub const KEY_VERIFIER: &str = "verifier";
pub const KEY_USER: &str = "user";
pub const KEY_HOST: &str = "host";
pub const KEY_PORT: &str = "port";
pub const KEY_DBNAME: &str = "dbname";

/// Metadata of an object generated for `cluster`: its user-supplied labels
/// and annotations, `labels` on top, and the cluster as controller.
fn generated_metadata(cluster: &IvoryCluster, name: String, labels: &BTreeMap<String, String>) -> ObjectMeta {
    let empty = BTreeMap::new();
    let user = cluster.spec.metadata.as_ref();
    let annotations = user.map_or(&empty, |m| &m.annotations).clone();
    ObjectMeta {
        name: Some(name),
        namespace: cluster.namespace(),
        labels: Some(naming::merge(&[user.map_or(&empty, |m| &m.labels), labels])),
        annotations: (!annotations.is_empty()).then_some(annotations),
        owner_references: cluster.controller_owner_ref(&()).map(|r| vec![r]),
        ..Default::default()
    }
}

/// UTF-8 value of `key` in `secret`, if present and non-empty.
pub fn secret_value(secret: &Secret, key: &str) -> Option<String> {
    secret
        .data
        .as_ref()?
        .get(key)
        .and_then(|v| String::from_utf8(v.0.clone()).ok())
        .filter(|v| !v.is_empty())
}

/// The stored credentials, or fresh ones when either half is missing.
fn credentials(existing: Option<&Secret>, secrets: &dyn SecretGenerator) -> GeneratedSecret {
    let stored = existing.and_then(|s| Some((secret_value(s, KEY_PASSWORD)?, secret_value(s, KEY_VERIFIER)?)));
    match stored {
        Some((password, verifier)) => GeneratedSecret { password, verifier },
        None => secrets.generate(),
    }
}

fn bytes(value: impl Into<String>) -> ByteString {
    ByteString(value.into().into_bytes())
}

/// The `<cluster>-monitoring` Secret with the exporter's credentials.
pub fn monitoring_secret_intent(
    cluster: &IvoryCluster,
    existing: Option<&Secret>,
    secrets: &dyn SecretGenerator,
) -> Secret {
    let name = cluster.name_any();
    let labels = BTreeMap::from([
        (LABEL_CLUSTER.to_string(), name.clone()),
        (LABEL_ROLE.to_string(), ROLE_MONITORING.to_string()),
    ]);
    let GeneratedSecret { password, verifier } = credentials(existing, secrets);

    Secret {
        metadata: generated_metadata(cluster, naming::monitoring_secret_name(&name), &labels),
        data: Some(BTreeMap::from([
            (KEY_PASSWORD.to_string(), bytes(password)),
            (KEY_VERIFIER.to_string(), bytes(verifier)),
        ])),
        type_: Some("Opaque".to_string()),
        ..Default::default()
    }
}

/// The `<cluster>-exporter-web-config` ConfigMap enabling TLS on the
/// exporter endpoint.
pub fn web_config_intent(cluster: &IvoryCluster) -> ConfigMap {
    let name = cluster.name_any();
    let labels = BTreeMap::from([
        (LABEL_CLUSTER.to_string(), name.clone()),
        (LABEL_ROLE.to_string(), ROLE_MONITORING.to_string()),
    ]);
    ConfigMap {
        metadata: generated_metadata(cluster, naming::exporter_web_config_name(&name), &labels),
        data: Some(BTreeMap::from([(
            ivory::pgmonitor::WEB_CONFIG_KEY.to_string(),
            ivory::pgmonitor::WEB_CONFIG.to_string(),
        )])),
        ..Default::default()
    }
}

/// Labels selecting every user Secret of `cluster`.
pub fn user_secret_labels(cluster: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (LABEL_CLUSTER.to_string(), cluster.to_string()),
        (LABEL_ROLE.to_string(), ROLE_USER.to_string()),
    ])
}

/// The `<cluster>-ivoryuser-<user>` Secret applications connect with.
pub fn user_secret_intent(
    cluster: &IvoryCluster,
    user: &UserSpec,
    existing: Option<&Secret>,
    secrets: &dyn SecretGenerator,
) -> Secret {
    let name = cluster.name_any();
    let mut labels = user_secret_labels(&name);
    labels.insert(LABEL_USER.to_string(), user.name.clone());

    let GeneratedSecret { password, verifier } = credentials(existing, secrets);
    let host = format!(
        "{}.{}.svc",
        naming::cluster_primary_service(&name),
        cluster.namespace().unwrap_or_default()
    );

    let mut data = BTreeMap::from([
        (KEY_USER.to_string(), bytes(user.name.as_str())),
        (KEY_PASSWORD.to_string(), bytes(password)),
        (KEY_VERIFIER.to_string(), bytes(verifier)),
        (KEY_HOST.to_string(), bytes(host)),
        (KEY_PORT.to_string(), bytes(cluster.spec.port.to_string())),
    ]);
    if let Some(database) = user.databases.first() {
        data.insert(KEY_DBNAME.to_string(), bytes(database.as_str()));
    }

    Secret {
        metadata: generated_metadata(cluster, naming::user_secret_name(&name, &user.name), &labels),
        data: Some(data),
        type_: Some("Opaque".to_string()),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::*;
    use crds::Metadata;

    #[test]
    fn test_monitoring_secret_generates_once() {
        let cluster = test_cluster("hippo", "ns", 14);
        let generator = SequentialSecretGenerator::default();

        let first = monitoring_secret_intent(&cluster, None, &generator);
        assert_eq!(first.name_any(), "hippo-monitoring");
        assert_eq!(first.labels()[LABEL_ROLE], ROLE_MONITORING);
        assert_eq!(secret_value(&first, KEY_PASSWORD).as_deref(), Some("password-1"));
        assert_eq!(secret_value(&first, KEY_VERIFIER).as_deref(), Some("verifier-1"));
        assert_eq!(first.owner_references()[0].uid, "hippo-uid");

        let again = monitoring_secret_intent(&cluster, Some(&first), &generator);
        assert_eq!(again.data, first.data);
    }

    #[test]
    fn test_partial_secret_is_regenerated() {
        let cluster = test_cluster("hippo", "ns", 14);
        let generator = SequentialSecretGenerator::default();
        let mut existing = monitoring_secret_intent(&cluster, None, &generator);
        existing.data.as_mut().unwrap().remove(KEY_VERIFIER);

        let secret = monitoring_secret_intent(&cluster, Some(&existing), &generator);
        assert_eq!(secret_value(&secret, KEY_PASSWORD).as_deref(), Some("password-2"));
    }

    #[test]
    fn test_user_secret() {
        let mut cluster = test_cluster("hippo", "ns", 14);
        cluster.spec.metadata = Some(Metadata {
            labels: BTreeMap::from([
                ("team".to_string(), "db".to_string()),
                (LABEL_ROLE.to_string(), "spoofed".to_string()),
            ]),
            annotations: BTreeMap::new(),
        });
        let user = UserSpec {
            name: "app".to_string(),
            databases: vec!["appdb".to_string(), "other".to_string()],
            options: String::new(),
        };

        let secret = user_secret_intent(&cluster, &user, None, &SequentialSecretGenerator::default());
        assert_eq!(secret.name_any(), "hippo-ivoryuser-app");
        assert_eq!(secret.labels()["team"], "db");
        assert_eq!(secret.labels()[LABEL_ROLE], ROLE_USER);
        assert_eq!(secret.labels()[LABEL_USER], "app");
        assert_eq!(secret.annotations().len(), 0);
        assert_eq!(secret_value(&secret, KEY_USER).as_deref(), Some("app"));
        assert_eq!(secret_value(&secret, KEY_HOST).as_deref(), Some("hippo-primary.ns.svc"));
        assert_eq!(secret_value(&secret, KEY_PORT).as_deref(), Some("5432"));
        assert_eq!(secret_value(&secret, KEY_DBNAME).as_deref(), Some("appdb"));
    }

    #[test]
    fn test_web_config() {
        let cluster = test_cluster("hippo", "ns", 14);
        let config = web_config_intent(&cluster);
        assert_eq!(config.name_any(), "hippo-exporter-web-config");
        let data = config.data.unwrap();
        assert!(data[ivory::pgmonitor::WEB_CONFIG_KEY].contains("tls_server_config"));
    }
}
