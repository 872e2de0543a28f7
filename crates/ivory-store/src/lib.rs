//! Ivory control-plane store
//!
//! The seams between the reconcilers and the outside world: reading and
//! writing Kubernetes objects, running commands in pods, and generating
//! passwords. [`KubeStore`] talks to a real API server; [`MockStore`]
//! (feature `test-util`) keeps everything in memory.
//!
//! # Example
//!
//! ```no_run
//! use ivory_store::{KubeStore, Registry, typed};
//! use crds::IvoryCluster;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = kube::Client::try_default().await?;
//! let registry = Registry::new();
//! let store = KubeStore::new(client, &registry, "ivory-operator");
//!
//! let cluster: Option<IvoryCluster> = typed::get_as(&store, "default", "hippo").await?;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod kube_store;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;
pub mod registry;
pub mod secret;
pub mod store;
pub mod typed;

pub use error::StoreError;
pub use kube_store::KubeStore;
#[cfg(any(test, feature = "test-util"))]
pub use mock::{ExecCall, MockStore, Verb};
pub use registry::Registry;
pub use secret::{GeneratedSecret, RandomSecretGenerator, SecretGenerator};
pub use store::{
    DeleteOptions, ExecOutput, Kind, LabelSelector, ObjectStore, PodExec, Preconditions,
    Propagation,
};
pub use typed::StoreObject;
