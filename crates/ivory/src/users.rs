//! Idempotent creation of database roles.

use crate::executor::{ExecError, Executor, exec_sql};
use crds::UserSpec;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::debug;

/// The bootstrap superuser. It always logs in to its own database.
pub const SUPERUSER: &str = "ivory";

const USERS_SQL_TAIL: &str = r"BEGIN;
SELECT pg_catalog.format('CREATE USER %I',
       pg_catalog.json_extract_path_text(input.data, 'username'))
  FROM input
 WHERE NOT EXISTS (
       SELECT 1 FROM pg_catalog.pg_roles
       WHERE rolname = pg_catalog.json_extract_path_text(input.data, 'username'))
 ORDER BY input.id
\gexec

SELECT pg_catalog.format('ALTER ROLE %I WITH %s PASSWORD %L',
       pg_catalog.json_extract_path_text(input.data, 'username'),
       pg_catalog.json_extract_path_text(input.data, 'options'),
       pg_catalog.json_extract_path_text(input.data, 'verifier'))
  FROM input ORDER BY input.id
\gexec

SELECT pg_catalog.format('GRANT ALL PRIVILEGES ON DATABASE %I TO %I',
       pg_catalog.json_array_elements_text(
       pg_catalog.json_extract_path(
       pg_catalog.json_strip_nulls(input.data), 'databases')),
       pg_catalog.json_extract_path_text(input.data, 'username'))
  FROM input ORDER BY input.id
\gexec
COMMIT;";

// Field order is the wire order of each JSON line.
#[derive(Serialize)]
struct UserRow<'a> {
    databases: Option<Vec<&'a str>>,
    options: &'a str,
    username: &'a str,
    verifier: &'a str,
}

/// Renders the `psql` script that creates or alters `users`.
///
/// User specs are streamed as JSON lines into a temporary table so that no
/// identifier or password is ever spliced into SQL text. Verifiers are looked
/// up by user name; users without one get an empty verifier.
pub fn users_sql(
    users: &[UserSpec],
    verifiers: &BTreeMap<String, String>,
) -> Result<String, ExecError> {
    let mut sql = String::from(
        "SET search_path TO '';\n\
         CREATE TEMPORARY TABLE input (id serial, data json);\n\
         \\copy input (data) from stdin with (format text)\n",
    );

    for user in users {
        let (databases, options) = if user.name == SUPERUSER {
            (Some(vec![SUPERUSER]), "LOGIN SUPERUSER")
        } else if user.databases.is_empty() {
            (None, user.options.as_str())
        } else {
            (
                Some(user.databases.iter().map(String::as_str).collect()),
                user.options.as_str(),
            )
        };

        let row = UserRow {
            databases,
            options,
            username: &user.name,
            verifier: verifiers.get(&user.name).map_or("", String::as_str),
        };
        sql.push_str(&serde_json::to_string(&row)?);
        sql.push('\n');
    }

    sql.push_str("\\.\n");
    sql.push_str(USERS_SQL_TAIL);
    Ok(sql)
}

/// Creates or updates `users` through `exec`.
pub async fn write_users(
    exec: &dyn Executor,
    users: &[UserSpec],
    verifiers: &BTreeMap<String, String>,
) -> Result<(), ExecError> {
    let sql = users_sql(users, verifiers)?;
    let output = exec_sql(
        exec,
        &sql,
        &BTreeMap::from([("ON_ERROR_STOP", "on"), ("QUIET", "on")]),
    )
    .await?;
    debug!(stdout = %output.stdout, stderr = %output.stderr, "wrote users");
    Ok(())
}
