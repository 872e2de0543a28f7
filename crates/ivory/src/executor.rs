//! Command execution inside a database pod.
//!
//! [`Executor`] abstracts "run this command with this stdin" so SQL helpers
//! can be driven by a real pod exec, by a test double, or by
//! [`HashingExecutor`], which only records what would be sent.

use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};
use thiserror::Error;

/// Captured output of one command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Output {
    pub stdout: String,
    pub stderr: String,
}

/// Errors from executing commands or preparing their input.
#[derive(Debug, Error)]
pub enum ExecError {
    /// The command could not be run or exited unsuccessfully
    #[error("command failed: {0}")]
    Command(String),

    /// JSON serialization error while building input
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Runs a command in a fixed pod and container.
#[async_trait::async_trait]
pub trait Executor: Send + Sync {
    async fn exec(&self, stdin: Option<&str>, command: &[String]) -> Result<Output, ExecError>;
}

/// Hashes every command and stdin it is given instead of running them.
///
/// Running an idempotent action against this executor produces a revision of
/// what the action would do. The salt (image IDs, typically) is folded in at
/// every call so that a changed image yields a new revision.
pub struct HashingExecutor {
    hasher: Mutex<Sha256>,
    salt: Vec<String>,
}

impl std::fmt::Debug for HashingExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HashingExecutor").field("salt", &self.salt).finish()
    }
}

impl HashingExecutor {
    pub fn new<I, S>(salt: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            hasher: Mutex::new(Sha256::new()),
            salt: salt.into_iter().map(Into::into).collect(),
        }
    }

    /// Hex-encoded SHA-256 of everything recorded so far.
    pub fn finish(self) -> String {
        let hasher = self.hasher.into_inner().unwrap_or_else(PoisonError::into_inner);
        format!("{:x}", hasher.finalize())
    }
}

#[async_trait::async_trait]
impl Executor for HashingExecutor {
    async fn exec(&self, stdin: Option<&str>, command: &[String]) -> Result<Output, ExecError> {
        let mut hasher = self.hasher.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(stdin) = stdin {
            hasher.update(stdin.as_bytes());
        }
        hasher.update(command.join(" ").as_bytes());
        for salt in &self.salt {
            hasher.update(salt.as_bytes());
        }
        Ok(Output::default())
    }
}

/// `psql` reading its script from stdin, with `--set` variables.
pub fn psql_command(variables: &BTreeMap<&str, &str>) -> Vec<String> {
    let mut command = vec!["psql".to_string(), "-Xw".to_string(), "--file=-".to_string()];
    for (name, value) in variables {
        command.push(format!("--set={name}={value}"));
    }
    command
}

/// Runs `sql` through `psql` in the default database.
pub async fn exec_sql(
    exec: &dyn Executor,
    sql: &str,
    variables: &BTreeMap<&str, &str>,
) -> Result<Output, ExecError> {
    exec.exec(Some(sql), &psql_command(variables)).await
}

const DATABASES_SCRIPT: &str = r#"
sql_target=$(< /dev/stdin)
sql_databases="$1"
shift 1

databases=$(psql "$@" -Xw -Aqt --file=- <<< "${sql_databases}")

while IFS= read -r database; do
	PGDATABASE="${database}" psql "$@" -Xw --file=- <<< "${sql_target}"
done <<< "${databases}"
"#;

/// Runs `sql` in every database named by the rows of `databases_query`.
pub async fn exec_in_databases_from_query(
    exec: &dyn Executor,
    databases_query: &str,
    sql: &str,
    variables: &BTreeMap<&str, &str>,
) -> Result<Output, ExecError> {
    let mut command = vec![
        "bash".to_string(),
        "-ceu".to_string(),
        "--".to_string(),
        DATABASES_SCRIPT.to_string(),
        "-".to_string(),
        databases_query.to_string(),
    ];
    for (name, value) in variables {
        command.push(format!("--set={name}={value}"));
    }
    exec.exec(Some(sql), &command).await
}

/// Runs `sql` in every database that accepts connections.
pub async fn exec_in_all_databases(
    exec: &dyn Executor,
    sql: &str,
    variables: &BTreeMap<&str, &str>,
) -> Result<Output, ExecError> {
    exec_in_databases_from_query(
        exec,
        "SELECT datname FROM pg_catalog.pg_database WHERE datallowconn AND datname NOT IN ('template0')",
        sql,
        variables,
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_hashing_executor_is_deterministic() {
        let a = HashingExecutor::new(["img-a"]);
        a.exec(Some("SELECT 1"), &command(&["psql"])).await.unwrap();
        let b = HashingExecutor::new(["img-a"]);
        b.exec(Some("SELECT 1"), &command(&["psql"])).await.unwrap();
        assert_eq!(a.finish(), b.finish());
    }

    #[tokio::test]
    async fn test_hashing_executor_salt_changes_revision() {
        let a = HashingExecutor::new(["img-a"]);
        a.exec(Some("SELECT 1"), &command(&["psql"])).await.unwrap();
        let b = HashingExecutor::new(["img-b"]);
        b.exec(Some("SELECT 1"), &command(&["psql"])).await.unwrap();
        assert_ne!(a.finish(), b.finish());
    }

    #[tokio::test]
    async fn test_hashing_executor_hex_digest() {
        let revision = HashingExecutor::new(Vec::<String>::new()).finish();
        assert_eq!(revision.len(), 64);
        assert!(revision.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_psql_command_variables_sorted() {
        let vars = BTreeMap::from([("QUIET", "on"), ("ON_ERROR_STOP", "on")]);
        assert_eq!(
            psql_command(&vars),
            command(&["psql", "-Xw", "--file=-", "--set=ON_ERROR_STOP=on", "--set=QUIET=on"])
        );
    }
}
