//! Status conditions shared by the Ivory CRDs.
//!
//! Conditions follow the Kubernetes `metav1.Condition` shape. Writing a
//! condition whose status, reason and observed generation are unchanged keeps
//! the stored entry as-is, so repeated reconciles do not churn status.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// `IvoryUpgrade`: the upgrade is being driven forward.
pub const CONDITION_PROGRESSING: &str = "Progressing";
/// `IvoryUpgrade`: the upgrade reached a terminal outcome.
pub const CONDITION_SUCCEEDED: &str = "Succeeded";
/// `IvoryCluster`: generated configuration has been applied.
pub const CONDITION_CONFIGURATION_READY: &str = "ConfigurationReady";
/// `IvoryCluster`: an instance accepting writes was observed.
pub const CONDITION_WRITABLE_INSTANCE: &str = "WritableInstance";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Condition type, e.g. `Progressing`
    #[serde(rename = "type")]
    pub type_: String,

    pub status: ConditionStatus,

    /// Machine-readable CamelCase reason
    pub reason: String,

    /// Human-readable detail
    #[serde(default)]
    pub message: String,

    /// Generation of the object this condition was computed from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Last time `status` changed
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    pub fn new(
        type_: &str,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
        observed_generation: Option<i64>,
    ) -> Self {
        Self {
            type_: type_.to_string(),
            status,
            reason: reason.into(),
            message: message.into(),
            observed_generation,
            last_transition_time: Utc::now(),
        }
    }

    pub fn is_true(&self) -> bool {
        self.status == ConditionStatus::True
    }
}

/// Finds the condition of the given type.
pub fn find_condition<'a>(conditions: &'a [Condition], type_: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.type_ == type_)
}

/// True when the condition of the given type exists with status `True`.
pub fn is_condition_true(conditions: &[Condition], type_: &str) -> bool {
    find_condition(conditions, type_).is_some_and(Condition::is_true)
}

/// Writes `new` into `conditions`, returning whether anything changed.
///
/// An existing entry with the same status, reason and observed generation is
/// left untouched. `lastTransitionTime` only moves when the status changes.
pub fn set_condition(conditions: &mut Vec<Condition>, new: Condition) -> bool {
    let Some(existing) = conditions.iter_mut().find(|c| c.type_ == new.type_) else {
        conditions.push(new);
        return true;
    };

    if existing.status == new.status
        && existing.reason == new.reason
        && existing.observed_generation == new.observed_generation
    {
        return false;
    }

    if existing.status != new.status {
        existing.status = new.status;
        existing.last_transition_time = new.last_transition_time;
    }
    existing.reason = new.reason;
    existing.message = new.message;
    existing.observed_generation = new.observed_generation;
    true
}
