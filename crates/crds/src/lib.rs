//! Ivory CRD Definitions
//!
//! Kubernetes Custom Resource Definitions for the Ivory operator, the status
//! condition helpers shared by its controllers, and the naming contract of
//! generated objects.

pub mod conditions;
pub mod ivory_cluster;
pub mod ivory_upgrade;
pub mod naming;

pub use conditions::*;
pub use ivory_cluster::*;
pub use ivory_upgrade::*;
