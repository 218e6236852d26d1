//! Helpers for working with untyped objects.

use kube::{
    api::{DynamicObject, ResourceExt},
    core::GroupVersionKind,
};
use serde_json::Value;

/// Fields of an object's body that are not part of its replicated content.
const NON_CONTENT_FIELDS: &[&str] = &["apiVersion", "kind", "metadata", "status"];

/// Splits an `apiVersion` into its group and version. The core group is empty.
pub fn parse_api_version(api_version: &str) -> (&str, &str) {
    match api_version.split_once('/') {
        Some((group, version)) => (group, version),
        None => ("", api_version),
    }
}

/// Returns the GVK recorded in an object's type metadata, if any.
pub fn gvk(obj: &DynamicObject) -> Option<GroupVersionKind> {
    let types = obj.types.as_ref()?;
    let (group, version) = parse_api_version(&types.api_version);
    Some(GroupVersionKind::gvk(group, version, &types.kind))
}

/// Formats a GVK as `<group>/<version>, Kind=<kind>`.
pub fn gvk_key(gvk: &GroupVersionKind) -> String {
    format!("{}/{}, Kind={}", gvk.group, gvk.version, gvk.kind)
}

pub fn is_terminating(obj: &DynamicObject) -> bool {
    obj.metadata.deletion_timestamp.is_some()
}

pub fn has_finalizer(obj: &DynamicObject, finalizer: &str) -> bool {
    obj.finalizers().iter().any(|f| f == finalizer)
}

/// Adds a finalizer, returning false if it was already present.
pub fn add_finalizer(obj: &mut DynamicObject, finalizer: &str) -> bool {
    if has_finalizer(obj, finalizer) {
        return false;
    }
    obj.finalizers_mut().push(finalizer.to_string());
    true
}

/// Removes a finalizer, returning false if it was not present.
pub fn remove_finalizer(obj: &mut DynamicObject, finalizer: &str) -> bool {
    let finalizers = obj.finalizers_mut();
    let len = finalizers.len();
    finalizers.retain(|f| f != finalizer);
    finalizers.len() != len
}

/// Returns the object's status, treating `null` as absent.
pub fn status(obj: &DynamicObject) -> Option<&Value> {
    obj.data.get("status").filter(|s| !s.is_null())
}

pub fn set_status(obj: &mut DynamicObject, status: Value) {
    body_mut(obj).insert("status".to_string(), status);
}

/// Replaces `to`'s content (everything except type metadata, object metadata
/// and status) with `from`'s.
pub fn copy_content(from: &DynamicObject, to: &mut DynamicObject) {
    let content = from
        .data
        .as_object()
        .into_iter()
        .flatten()
        .filter(|(k, _)| !NON_CONTENT_FIELDS.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect::<Vec<_>>();

    let body = body_mut(to);
    body.retain(|k, _| NON_CONTENT_FIELDS.contains(&k.as_str()));
    body.extend(content);
}

/// Returns the object's content fields as a JSON object.
pub fn content(obj: &DynamicObject) -> serde_json::Map<String, Value> {
    obj.data
        .as_object()
        .into_iter()
        .flatten()
        .filter(|(k, _)| !NON_CONTENT_FIELDS.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Compares two objects by their serialized form.
pub fn same(a: &DynamicObject, b: &DynamicObject) -> bool {
    match (serde_json::to_value(a), serde_json::to_value(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

fn body_mut(obj: &mut DynamicObject) -> &mut serde_json::Map<String, Value> {
    if !obj.data.is_object() {
        obj.data = Value::Object(Default::default());
    }
    match &mut obj.data {
        Value::Object(body) => body,
        _ => unreachable!("object body must be a map"),
    }
}
