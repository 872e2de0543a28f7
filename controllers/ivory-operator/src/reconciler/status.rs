//! Status bookkeeping.
//!
//! Reconcilers mutate a working copy of status and hand the before/after
//! pair to [`commit_status`], which sends a merge patch of the difference to
//! the status subresource on every exit path.

use crate::error::ControllerError;
use crds::{Condition, ConditionStatus, set_condition};
use ivory_store::{Kind, ObjectStore};
use kube_runtime::controller::Action;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, error};

/// Writes a condition unless status, reason and generation are unchanged.
pub fn set_status_condition(
    conditions: &mut Vec<Condition>,
    type_: &str,
    status: ConditionStatus,
    reason: &str,
    message: impl Into<String>,
    generation: Option<i64>,
) -> bool {
    set_condition(
        conditions,
        Condition::new(type_, status, reason, message, generation),
    )
}

/// RFC 7386 merge patch turning `before` into `after`, or `None` when they
/// are equal. Removed keys are sent as `null`; arrays are replaced whole.
pub fn merge_diff(before: &Value, after: &Value) -> Option<Value> {
    if before == after {
        return None;
    }
    let (Value::Object(before), Value::Object(after)) = (before, after) else {
        return Some(after.clone());
    };

    let mut patch = Map::new();
    for key in before.keys() {
        if !after.contains_key(key) {
            patch.insert(key.clone(), Value::Null);
        }
    }
    for (key, value) in after {
        let diff = match before.get(key) {
            Some(old) => merge_diff(old, value),
            None => Some(value.clone()),
        };
        if let Some(diff) = diff {
            patch.insert(key.clone(), diff);
        }
    }
    Some(Value::Object(patch))
}

/// The `{"status": ...}` merge patch between two statuses, if any.
pub fn status_patch<S: Serialize>(before: &S, after: &S) -> Result<Option<Value>, ControllerError> {
    let before = serde_json::to_value(before)?;
    let after = serde_json::to_value(after)?;
    Ok(merge_diff(&before, &after).map(|diff| serde_json::json!({ "status": diff })))
}

/// Patches the status subresource when `after` differs from `before`, then
/// folds the patch outcome into the reconcile `result`.
///
/// A failed patch replaces a successful result. When both fail, the
/// reconcile error is returned and the patch error is logged.
pub async fn commit_status<S: Serialize>(
    store: &dyn ObjectStore,
    kind: Kind,
    namespace: &str,
    name: &str,
    before: &S,
    after: &S,
    result: Result<Action, ControllerError>,
) -> Result<Action, ControllerError> {
    let patched = async {
        let Some(patch) = status_patch(before, after)? else {
            return Ok(());
        };
        debug!(?kind, namespace, name, "patching status");
        store.patch_status(kind, namespace, name, &patch).await?;
        Ok::<(), ControllerError>(())
    }
    .await;

    match (result, patched) {
        (Ok(action), Ok(())) => Ok(action),
        (Ok(_), Err(e)) | (Err(e), Ok(())) => Err(e),
        (Err(e), Err(patch_err)) => {
            error!(?kind, namespace, name, error = %patch_err, "Patching status");
            Err(e)
        }
    }
}
