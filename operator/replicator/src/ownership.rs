//! Ownership labels.
//!
//! Downstream objects cannot carry native owner references to upstream
//! objects that live in another cluster. Instead, every downstream object is
//! labeled with the identity of its upstream owner; these labels are the only
//! way to route a downstream change back to the upstream object that caused
//! it.

use crate::{Error, Result};
use netsvc_operator_k8s_api::{object, DynamicObject, ResourceExt};
use std::collections::BTreeMap;

pub const LABEL_PREFIX: &str = "meta.netsvc.dev/";

pub const UPSTREAM_CLUSTER_NAME: &str = "meta.netsvc.dev/upstream-cluster-name";
pub const UPSTREAM_GROUP: &str = "meta.netsvc.dev/upstream-group";
pub const UPSTREAM_KIND: &str = "meta.netsvc.dev/upstream-kind";
pub const UPSTREAM_NAME: &str = "meta.netsvc.dev/upstream-name";
pub const UPSTREAM_NAMESPACE: &str = "meta.netsvc.dev/upstream-namespace";

const CLUSTER_PREFIX: &str = "cluster-";

/// Identifies an upstream object across clusters.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UpstreamOwner {
    pub cluster_name: String,
    pub group: String,
    pub kind: String,
    pub name: String,
    /// Empty for cluster-scoped owners.
    pub namespace: String,
}

/// Encodes a cluster name as a label value.
///
/// Label values may not contain slashes, which are common in cluster names,
/// so slashes are replaced with underscores.
pub fn encode_cluster_name(name: &str) -> String {
    format!("{CLUSTER_PREFIX}{}", name.replace('/', "_"))
}

/// Reverses [`encode_cluster_name`].
pub fn decode_cluster_name(value: &str) -> Option<String> {
    value
        .strip_prefix(CLUSTER_PREFIX)
        .map(|name| name.replace('_', "/"))
}

// === impl UpstreamOwner ===

impl UpstreamOwner {
    pub fn of(cluster_name: &str, owner: &DynamicObject) -> Result<Self> {
        let gvk = object::gvk(owner).ok_or_else(|| {
            Error::InvalidObject(format!(
                "{} has no type metadata",
                owner.name_any()
            ))
        })?;
        Ok(Self {
            cluster_name: cluster_name.to_string(),
            group: gvk.group,
            kind: gvk.kind,
            name: owner.name_any(),
            namespace: owner.namespace().unwrap_or_default(),
        })
    }

    pub fn labels(&self) -> BTreeMap<String, String> {
        [
            (UPSTREAM_CLUSTER_NAME, encode_cluster_name(&self.cluster_name)),
            (UPSTREAM_GROUP, self.group.clone()),
            (UPSTREAM_KIND, self.kind.clone()),
            (UPSTREAM_NAME, self.name.clone()),
            (UPSTREAM_NAMESPACE, self.namespace.clone()),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
    }

    /// Decodes an owner from an object's labels. Returns `None` unless all
    /// five labels are present and the cluster name is well-formed.
    pub fn from_labels(labels: &BTreeMap<String, String>) -> Option<Self> {
        Some(Self {
            cluster_name: decode_cluster_name(labels.get(UPSTREAM_CLUSTER_NAME)?)?,
            group: labels.get(UPSTREAM_GROUP)?.clone(),
            kind: labels.get(UPSTREAM_KIND)?.clone(),
            name: labels.get(UPSTREAM_NAME)?.clone(),
            namespace: labels.get(UPSTREAM_NAMESPACE)?.clone(),
        })
    }
}

/// Returns true for keys in the label namespace reserved for ownership
/// metadata.
pub(crate) fn is_reserved(key: &str) -> bool {
    key.starts_with(LABEL_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use netsvc_operator_k8s_api::{ApiResource, GroupVersionKind};
    use pretty_assertions::assert_eq;

    #[test]
    fn cluster_names_roundtrip() {
        for name in ["", "local", "org/project", "a/b/c"] {
            let encoded = encode_cluster_name(name);
            assert!(encoded.starts_with("cluster-"));
            assert!(!encoded.contains('/'), "{encoded}");
            assert_eq!(decode_cluster_name(&encoded).as_deref(), Some(name));
        }
        assert_eq!(
            encode_cluster_name("org/project"),
            "cluster-org_project"
        );
        assert_eq!(decode_cluster_name("org_project"), None);
    }

    #[test]
    fn owner_labels_roundtrip() {
        let gvk = GroupVersionKind::gvk("gateway.networking.k8s.io", "v1", "Gateway");
        let gateway = DynamicObject::new("edge", &ApiResource::from_gvk(&gvk)).within("team-a");
        let owner = UpstreamOwner::of("org/project", &gateway).unwrap();
        assert_eq!(
            owner,
            UpstreamOwner {
                cluster_name: "org/project".to_string(),
                group: "gateway.networking.k8s.io".to_string(),
                kind: "Gateway".to_string(),
                name: "edge".to_string(),
                namespace: "team-a".to_string(),
            }
        );

        let labels = owner.labels();
        assert_eq!(labels[UPSTREAM_CLUSTER_NAME], "cluster-org_project");
        assert_eq!(UpstreamOwner::from_labels(&labels), Some(owner));
    }

    #[test]
    fn incomplete_labels_decode_to_none() {
        let mut labels = UpstreamOwner {
            cluster_name: "c".to_string(),
            group: "g".to_string(),
            kind: "K".to_string(),
            name: "n".to_string(),
            namespace: "ns".to_string(),
        }
        .labels();
        labels.remove(UPSTREAM_NAME);
        assert_eq!(UpstreamOwner::from_labels(&labels), None);

        labels.insert(UPSTREAM_NAME.to_string(), "n".to_string());
        labels.insert(UPSTREAM_CLUSTER_NAME.to_string(), "c".to_string());
        assert_eq!(UpstreamOwner::from_labels(&labels), None);
    }
}
