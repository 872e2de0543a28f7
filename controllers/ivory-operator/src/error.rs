//! Controller-specific error types.
//!
//! Store, exec and serialization failures from the lower crates are wrapped
//! here so a reconcile has a single error type for `error_policy`.

use ivory::ExecError;
use ivory_store::StoreError;
use kube::Error as KubeError;
use thiserror::Error;

/// Errors that can occur in the Ivory operator.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Reading or writing control-plane objects failed
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Kubernetes client setup error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// An object lacks the name or namespace needed to address it
    #[error("Object is missing its {0}")]
    MissingObjectKey(&'static str),

    /// JSON conversion failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A command in a database pod failed
    #[error("Exec error: {0}")]
    Exec(#[from] ExecError),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),
}

impl ControllerError {
    /// True when the error is a store NotFound.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ControllerError::Store(e) if e.is_not_found())
    }
}
