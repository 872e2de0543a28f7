//! Database objects needed by the metrics exporter sidecar.

use crate::executor::{ExecError, Executor, exec_in_all_databases, exec_in_databases_from_query, exec_sql};
use crate::users::write_users;
use crds::UserSpec;
use std::collections::BTreeMap;
use tracing::debug;

/// Role the exporter connects as.
pub const MONITORING_USER: &str = "ccp_monitoring";

/// Database the exporter connects to.
pub const EXPORTER_DATABASE: &str = "ivory";

pub const EXPORTER_PORT: i32 = 9187;

/// ConfigMap key of the exporter web configuration.
pub const WEB_CONFIG_KEY: &str = "web-config.yml";

pub const WEB_CONFIG: &str = "\
# Generated by ivory-operator. DO NOT EDIT.
# Your changes will not be saved.


# A certificate and a key file are needed to enable TLS.
tls_server_config:
  cert_file: /certs/tls.crt
  key_file: /certs/tls.key";

/// Reads the version-specific setup script shipped in the exporter image.
pub async fn exporter_setup_sql(exec: &dyn Executor, version: i32) -> Result<String, ExecError> {
    let command = vec![
        "cat".to_string(),
        format!("/opt/cpm/conf/pg{version}/setup.sql"),
    ];
    let output = exec.exec(None, &command).await?;
    debug!(stderr = %output.stderr, "received exporter setup sql");

    // The queries reference a pgBackRest info script at the path of the
    // exporter image; point them at the database image instead.
    Ok(output.stdout.replace(
        "/usr/bin/pgbackrest-info.sh",
        "/opt/ivory/bin/pgbackrest_info.sh",
    ))
}

/// Creates the monitoring role, required extensions and the setup objects.
pub async fn enable_exporter(
    exec: &dyn Executor,
    verifier: &str,
    setup: &str,
) -> Result<(), ExecError> {
    write_users(
        exec,
        &[UserSpec {
            name: MONITORING_USER.to_string(),
            databases: Vec::new(),
            options: "LOGIN".to_string(),
        }],
        &BTreeMap::from([(MONITORING_USER.to_string(), verifier.to_string())]),
    )
    .await?;

    let quiet = BTreeMap::from([("ON_ERROR_STOP", "on"), ("QUIET", "on")]);
    exec_in_all_databases(
        exec,
        "SET client_min_messages = WARNING;\nCREATE EXTENSION IF NOT EXISTS pg_stat_statements;",
        &quiet,
    )
    .await?;

    let sql = format!(
        "SET client_min_messages = WARNING;\n\
         SET search_path TO monitor;\n\
         {setup}\n\
         ALTER ROLE :\"username\" SET search_path TO monitor;"
    );
    let variables = BTreeMap::from([
        ("ON_ERROR_STOP", "on"),
        ("QUIET", "on"),
        ("database", EXPORTER_DATABASE),
        ("username", MONITORING_USER),
    ]);
    exec_in_databases_from_query(exec, "SELECT :'database'", &sql, &variables).await?;
    Ok(())
}

/// Prevents the monitoring role from logging in, if it exists.
pub async fn disable_exporter(exec: &dyn Executor) -> Result<(), ExecError> {
    let sql = "SELECT pg_catalog.format('ALTER ROLE %I NOLOGIN', :'username')\n \
               WHERE EXISTS (SELECT 1 FROM pg_catalog.pg_roles WHERE rolname = :'username')\n\
               \\gexec";
    exec_sql(
        exec,
        sql,
        &BTreeMap::from([("ON_ERROR_STOP", "on"), ("username", MONITORING_USER)]),
    )
    .await?;
    Ok(())
}
