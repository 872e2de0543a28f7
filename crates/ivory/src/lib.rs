//! Ivory database helpers
//!
//! Everything the operator needs to know about the inside of a database
//! instance: where data lives, and the idempotent administrative SQL it runs
//! through an [`Executor`].

pub mod executor;
pub mod pgmonitor;
pub mod users;

pub use executor::{ExecError, Executor, HashingExecutor, Output};

/// Mount point of the data volume.
pub const DATA_MOUNT_PATH: &str = "/pgdata";

/// Directory of the server's Unix domain socket.
pub const SOCKET_DIRECTORY: &str = "/tmp/ivory";

/// Data directory for a major version.
pub fn data_directory(version: i32) -> String {
    format!("{DATA_MOUNT_PATH}/pg{version}")
}
