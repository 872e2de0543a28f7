//! IvoryUpgrade CRD
//!
//! An administrator-created request to move an IvoryCluster from one major
//! version to the next. Progress is reported through `Progressing` and
//! `Succeeded` conditions; the object is never deleted by the operator.

use crate::conditions::{CONDITION_SUCCEEDED, Condition, find_condition};
use crate::ivory_cluster::Metadata;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "ivory.microscaler.io",
    version = "v1beta1",
    kind = "IvoryUpgrade",
    namespaced,
    status = "IvoryUpgradeStatus",
    shortname = "ivu"
)]
#[serde(rename_all = "camelCase")]
pub struct IvoryUpgradeSpec {
    /// Name of the IvoryCluster in the same namespace
    pub ivory_cluster_name: String,

    /// Major version the cluster currently runs
    pub from_ivory_version: i32,

    /// Major version to upgrade to
    pub to_ivory_version: i32,

    /// Upgrade job image (operator default when unset)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_pull_policy: Option<String>,

    /// Labels and annotations for the upgrade jobs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IvoryUpgradeStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

/// Reasons written to the upgrade's conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpgradeReason {
    Progressing,
    Invalid,
    ClusterErrorWhenObservingWorld,
    ClusterNotFound,
    Resolved,
    Completed,
    Succeeded,
    ClusterNotShutdown,
    InvalidForCluster,
    ClusterMissingRequiredAnnotation,
    Failed,
}

impl UpgradeReason {
    pub fn as_str(self) -> &'static str {
        match self {
            UpgradeReason::Progressing => "UpgradeProgressing",
            UpgradeReason::Invalid => "UpgradeInvalid",
            UpgradeReason::ClusterErrorWhenObservingWorld => "ClusterErrorWhenObservingWorld",
            UpgradeReason::ClusterNotFound => "ClusterNotFound",
            UpgradeReason::Resolved => "UpgradeResolved",
            UpgradeReason::Completed => "UpgradeCompleted",
            UpgradeReason::Succeeded => "UpgradeSucceeded",
            UpgradeReason::ClusterNotShutdown => "ClusterNotShutdown",
            UpgradeReason::InvalidForCluster => "UpgradeInvalidForCluster",
            UpgradeReason::ClusterMissingRequiredAnnotation => "ClusterMissingRequiredAnnotation",
            UpgradeReason::Failed => "UpgradeFailed",
        }
    }
}

impl fmt::Display for UpgradeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl IvoryUpgrade {
    /// The upgrade has terminally succeeded and must not be driven again.
    pub fn has_succeeded(&self) -> bool {
        self.status
            .as_ref()
            .and_then(|s| find_condition(&s.conditions, CONDITION_SUCCEEDED))
            .is_some_and(|c| c.is_true() && c.reason == UpgradeReason::Succeeded.as_str())
    }
}
