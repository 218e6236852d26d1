use super::{
    describe, owner_reference, upsert_owner_reference, DownstreamObjectMeta, OwnerRefOptions,
    ResourceStrategy,
};
use crate::{ownership::UpstreamOwner, DownstreamClient, Error, Result};
use netsvc_operator_k8s_api::{DynamicObject, ResourceExt};
use sha2::{Digest, Sha256};

/// Number of leading upstream-name characters kept in a downstream name.
const NAME_PREFIX_LEN: usize = 30;

/// Places downstream objects in the upstream object's namespace of the same
/// cluster, relying on native owner references for cleanup.
pub struct SameNamespaceStrategy {
    client: DownstreamClient,
}

/// Derives a downstream name from an upstream name.
///
/// The name keeps a readable prefix of the upstream name followed by the
/// first 128 bits of the name's SHA-256 digest, so it is always at most 63
/// characters and distinct from the upstream object it mirrors.
pub fn downstream_name(upstream_name: &str) -> String {
    let prefix = upstream_name
        .chars()
        .take(NAME_PREFIX_LEN)
        .collect::<String>();
    let digest = Sha256::digest(upstream_name.as_bytes());
    format!("{prefix}-{}", hex::encode(&digest[..16]))
}

// === impl SameNamespaceStrategy ===

impl SameNamespaceStrategy {
    pub fn new(client: DownstreamClient) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl ResourceStrategy for SameNamespaceStrategy {
    fn client(&self) -> &DownstreamClient {
        &self.client
    }

    async fn object_meta_from_upstream_object(
        &self,
        upstream: &DynamicObject,
    ) -> Result<DownstreamObjectMeta> {
        let namespace = upstream
            .namespace()
            .ok_or_else(|| Error::ClusterScoped(describe(upstream)))?;
        Ok(DownstreamObjectMeta {
            namespace,
            name: downstream_name(&upstream.name_any()),
        })
    }

    async fn set_controller_reference(
        &self,
        owner: &DynamicObject,
        controlled: &mut DynamicObject,
        opts: OwnerRefOptions,
    ) -> Result<()> {
        match (owner.namespace(), controlled.namespace()) {
            (Some(_), None) => {
                return Err(Error::ScopeMismatch(format!(
                    "cluster-scoped {} must not have a namespace-scoped owner",
                    describe(controlled)
                )))
            }
            (Some(owner_ns), Some(controlled_ns)) if owner_ns != controlled_ns => {
                return Err(Error::ScopeMismatch(format!(
                    "cross-namespace owner references are disallowed: {} is in {owner_ns}",
                    describe(controlled)
                )))
            }
            _ => {}
        }

        let reference = owner_reference(owner, true, opts)?;
        if let Some(current) = controlled
            .owner_references()
            .iter()
            .find(|r| r.controller == Some(true) && r.uid != reference.uid)
        {
            return Err(Error::AlreadyOwned {
                object: describe(controlled),
                owner: format!("{} {}", current.kind, current.name),
            });
        }
        upsert_owner_reference(controlled.owner_references_mut(), reference);

        let labels = UpstreamOwner::of(self.client.cluster_name(), owner)?.labels();
        controlled.labels_mut().extend(labels);
        Ok(())
    }

    async fn delete_anchor_for_object(&self, _owner: &DynamicObject) -> Result<()> {
        // Native owner references cascade without a placeholder.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netsvc_operator_k8s_api::{ApiResource, GroupVersionKind, MemoryClient};
    use std::sync::Arc;

    fn strategy() -> SameNamespaceStrategy {
        SameNamespaceStrategy::new(DownstreamClient::new(
            "local",
            Arc::new(MemoryClient::new()),
        ))
    }

    fn gateway(ns: Option<&str>, name: &str, uid: &str) -> DynamicObject {
        let gvk = GroupVersionKind::gvk("gateway.networking.k8s.io", "v1", "Gateway");
        let mut obj = DynamicObject::new(name, &ApiResource::from_gvk(&gvk));
        obj.metadata.namespace = ns.map(Into::into);
        obj.metadata.uid = Some(uid.to_string());
        obj
    }

    #[test]
    fn names_are_deterministic_and_bounded() {
        let short = downstream_name("web");
        assert_eq!(short, downstream_name("web"));
        assert!(short.starts_with("web-"));
        assert_eq!(short.len(), "web-".len() + 32);

        let long_name = "a".repeat(253);
        let long = downstream_name(&long_name);
        assert_eq!(long.len(), NAME_PREFIX_LEN + 1 + 32);
        assert!(long.len() <= 63);

        // Names sharing a prefix still diverge.
        let a = downstream_name(&format!("{}-first", "x".repeat(40)));
        let b = downstream_name(&format!("{}-second", "x".repeat(40)));
        assert_ne!(a, b);
        assert!(a
            .trim_start_matches('x')
            .chars()
            .skip(1)
            .all(|c| c.is_ascii_hexdigit()));
    }

    #[tokio::test]
    async fn keeps_the_upstream_namespace() {
        let meta = strategy()
            .object_meta_from_upstream_object(&gateway(Some("team-a"), "edge", "uid-1"))
            .await
            .unwrap();
        assert_eq!(meta.namespace, "team-a");
        assert_eq!(meta.name, downstream_name("edge"));

        let error = strategy()
            .object_meta_from_upstream_object(&gateway(None, "edge", "uid-1"))
            .await
            .unwrap_err();
        assert!(matches!(error, Error::ClusterScoped(_)), "{error}");
    }

    #[tokio::test]
    async fn sets_a_native_controller_reference() {
        let owner = gateway(Some("team-a"), "edge", "uid-1");
        let mut controlled = gateway(Some("team-a"), &downstream_name("edge"), "uid-2");
        let strategy = strategy();
        strategy
            .set_controller_reference(&owner, &mut controlled, OwnerRefOptions::default())
            .await
            .unwrap();
        strategy
            .set_controller_reference(&owner, &mut controlled, OwnerRefOptions::default())
            .await
            .unwrap();

        let refs = controlled.owner_references();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].uid, "uid-1");
        assert_eq!(refs[0].controller, Some(true));
        assert_eq!(
            UpstreamOwner::from_labels(controlled.labels()).map(|o| o.name),
            Some("edge".to_string())
        );

        let other = gateway(Some("team-a"), "other", "uid-3");
        let error = strategy
            .set_controller_reference(&other, &mut controlled, OwnerRefOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(error, Error::AlreadyOwned { .. }), "{error}");
    }

    #[tokio::test]
    async fn rejects_scope_mismatches() {
        let owner = gateway(Some("team-a"), "edge", "uid-1");
        for mut controlled in [
            gateway(None, "cluster-wide", "uid-2"),
            gateway(Some("team-b"), "elsewhere", "uid-3"),
        ] {
            let error = strategy()
                .set_controller_reference(&owner, &mut controlled, OwnerRefOptions::default())
                .await
                .unwrap_err();
            assert!(matches!(error, Error::ScopeMismatch(_)), "{error}");
        }
    }
}
