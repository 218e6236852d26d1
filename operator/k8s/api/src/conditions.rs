//! Status condition helpers.
//!
//! Missing conditions are treated as `Unknown` rather than as errors, so
//! callers can always reason about a condition's state.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, Time};
use serde_json::Value;

pub const STATUS_TRUE: &str = "True";
pub const STATUS_FALSE: &str = "False";
pub const STATUS_UNKNOWN: &str = "Unknown";

/// Reason reported for conditions that have not been observed yet.
pub const REASON_PENDING: &str = "Pending";

pub fn find<'c>(conditions: &'c [Condition], type_: &str) -> Option<&'c Condition> {
    conditions.iter().find(|c| c.type_ == type_)
}

pub fn is_true(conditions: &[Condition], type_: &str) -> bool {
    find(conditions, type_).map_or(false, |c| c.status == STATUS_TRUE)
}

pub fn is_false(conditions: &[Condition], type_: &str) -> bool {
    find(conditions, type_).map_or(false, |c| c.status == STATUS_FALSE)
}

/// Returns the condition of the given type, or an `Unknown` placeholder.
pub fn get_or_unknown(
    conditions: &[Condition],
    type_: &str,
    observed_generation: Option<i64>,
    now: Time,
) -> Condition {
    find(conditions, type_).cloned().unwrap_or_else(|| Condition {
        type_: type_.to_string(),
        status: STATUS_UNKNOWN.to_string(),
        reason: REASON_PENDING.to_string(),
        message: String::new(),
        observed_generation,
        last_transition_time: now,
    })
}

/// Sets a condition, replacing any existing condition of the same type.
///
/// The existing `lastTransitionTime` is kept unless the status changes.
/// Returns true if the list was modified.
pub fn set(conditions: &mut Vec<Condition>, mut condition: Condition) -> bool {
    let Some(existing) = conditions.iter_mut().find(|c| c.type_ == condition.type_) else {
        conditions.push(condition);
        return true;
    };

    if existing.status == condition.status {
        condition.last_transition_time = existing.last_transition_time.clone();
    }
    if *existing == condition {
        return false;
    }
    *existing = condition;
    true
}

/// Removes the condition of the given type. Returns true if one was removed.
pub fn remove(conditions: &mut Vec<Condition>, type_: &str) -> bool {
    let len = conditions.len();
    conditions.retain(|c| c.type_ != type_);
    conditions.len() != len
}

/// Reads the `conditions` list from an untyped status document. A missing or
/// null list reads as empty.
pub fn from_status(status: &Value) -> serde_json::Result<Vec<Condition>> {
    match status.get("conditions") {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(conditions) => serde_json::from_value(conditions.clone()),
    }
}

/// Writes the `conditions` list into an untyped status document.
pub fn into_status(status: &mut Value, conditions: &[Condition]) -> serde_json::Result<()> {
    let conditions = serde_json::to_value(conditions)?;
    match status {
        Value::Object(fields) => {
            fields.insert("conditions".to_string(), conditions);
        }
        _ => *status = serde_json::json!({ "conditions": conditions }),
    }
    Ok(())
}
