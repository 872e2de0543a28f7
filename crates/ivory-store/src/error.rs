//! Store errors

use crate::store::Kind;
use thiserror::Error;

/// Errors from reading or writing control-plane objects
#[derive(Debug, Error)]
pub enum StoreError {
    /// The object does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Create of an object that already exists
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Optimistic concurrency or precondition failure
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Any other API or transport error
    #[error("Kubernetes error: {0}")]
    Kube(#[source] kube::Error),

    /// JSON conversion between typed and dynamic objects failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Command execution in a pod failed
    #[error("Exec error: {0}")]
    Exec(String),

    /// The registry has no API resource for the kind
    #[error("Unknown kind: {0:?}")]
    UnknownKind(Kind),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, StoreError::AlreadyExists(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }
}

impl From<kube::Error> for StoreError {
    fn from(e: kube::Error) -> Self {
        match e {
            kube::Error::Api(ae) if ae.code == 404 => StoreError::NotFound(ae.message.clone()),
            kube::Error::Api(ae) if ae.code == 409 && ae.reason == "AlreadyExists" => {
                StoreError::AlreadyExists(ae.message.clone())
            }
            kube::Error::Api(ae) if ae.code == 409 => StoreError::Conflict(ae.message.clone()),
            e => StoreError::Kube(e),
        }
    }
}
