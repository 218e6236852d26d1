use super::{
    describe, owner_reference, upsert_owner_reference, DownstreamObjectMeta, OwnerRefOptions,
    ResourceStrategy,
};
use crate::{error::Context, ownership::UpstreamOwner, DownstreamClient, Error, Result};
use netsvc_operator_k8s_api::{
    config_map_resource, namespace_resource, Client, DynamicObject, ResourceExt, ResultExt,
};
use std::sync::Arc;
use tracing::debug;

/// Places downstream objects in a namespace derived from the UID of the
/// upstream object's namespace, keeping names unchanged.
///
/// Upstream owners cannot be referenced natively from the downstream cluster,
/// so each owner is represented downstream by an anchor `ConfigMap`. Every
/// object generated for the owner is owned by the anchor; deleting the anchor
/// cascades to all of them.
pub struct MappedNamespaceStrategy {
    upstream: Arc<dyn Client>,
    client: DownstreamClient,
}

/// Returns the downstream namespace for an upstream namespace UID.
pub fn downstream_namespace(upstream_namespace_uid: &str) -> String {
    format!("ns-{upstream_namespace_uid}")
}

/// Returns the name of the anchor representing the owner with the given UID.
pub fn anchor_name(owner_uid: &str) -> String {
    format!("anchor-{owner_uid}")
}

// === impl MappedNamespaceStrategy ===

impl MappedNamespaceStrategy {
    pub fn new(upstream: Arc<dyn Client>, client: DownstreamClient) -> Self {
        Self { upstream, client }
    }

    async fn mapped_namespace(&self, obj: &DynamicObject) -> Result<String> {
        let namespace = obj
            .namespace()
            .ok_or_else(|| Error::ClusterScoped(describe(obj)))?;
        let upstream_ns = self
            .upstream
            .get(&namespace_resource(), None, &namespace)
            .await
            .with_context(|| format!("get upstream namespace {namespace}"))?
            .ok_or_else(|| Error::Store {
                action: format!("get upstream namespace {namespace}"),
                source: netsvc_operator_k8s_api::Error::NotFound {
                    kind: "Namespace".to_string(),
                    name: namespace.clone(),
                },
            })?;
        let uid = upstream_ns.uid().ok_or_else(|| {
            Error::InvalidObject(format!("upstream namespace {namespace} has no uid"))
        })?;
        Ok(downstream_namespace(&uid))
    }

    fn owner_uid(owner: &DynamicObject) -> Result<String> {
        owner
            .uid()
            .ok_or_else(|| Error::InvalidObject(format!("{} has no uid", describe(owner))))
    }

    /// Returns the anchor for `owner`, creating it if needed. An existing
    /// anchor is never overwritten.
    async fn ensure_anchor(
        &self,
        owner: &DynamicObject,
        namespace: &str,
        labels: &std::collections::BTreeMap<String, String>,
    ) -> Result<DynamicObject> {
        let config_maps = config_map_resource();
        let name = anchor_name(&Self::owner_uid(owner)?);
        if let Some(anchor) = self
            .client
            .get(&config_maps, Some(namespace), &name)
            .await
            .with_context(|| format!("get anchor {namespace}/{name}"))?
        {
            return Ok(anchor);
        }

        let mut anchor = DynamicObject::new(&name, &config_maps).within(namespace);
        anchor.metadata.labels = Some(labels.clone());
        match self.client.create(&config_maps, &anchor).await {
            Ok(created) => {
                debug!(%namespace, %name, "Created anchor");
                Ok(created)
            }
            Err(error) if error.is_already_exists() => self
                .client
                .get(&config_maps, Some(namespace), &name)
                .await
                .with_context(|| format!("get anchor {namespace}/{name}"))?
                .ok_or_else(|| Error::Store {
                    action: format!("get anchor {namespace}/{name}"),
                    source: error,
                }),
            Err(error) => Err(error).with_context(|| format!("create anchor {namespace}/{name}")),
        }
    }
}

#[async_trait::async_trait]
impl ResourceStrategy for MappedNamespaceStrategy {
    fn client(&self) -> &DownstreamClient {
        &self.client
    }

    async fn object_meta_from_upstream_object(
        &self,
        upstream: &DynamicObject,
    ) -> Result<DownstreamObjectMeta> {
        Ok(DownstreamObjectMeta {
            namespace: self.mapped_namespace(upstream).await?,
            name: upstream.name_any(),
        })
    }

    async fn set_controller_reference(
        &self,
        owner: &DynamicObject,
        controlled: &mut DynamicObject,
        opts: OwnerRefOptions,
    ) -> Result<()> {
        if owner.namespace().is_none() {
            return Err(Error::ClusterScoped(describe(owner)));
        }
        // The anchor must share the controlled object's namespace for the
        // owner reference to resolve.
        let namespace = controlled
            .namespace()
            .ok_or_else(|| Error::ClusterScoped(describe(controlled)))?;
        let labels = UpstreamOwner::of(self.client.cluster_name(), owner)?.labels();

        let anchor = self.ensure_anchor(owner, &namespace, &labels).await?;
        let reference = owner_reference(&anchor, false, opts)?;
        upsert_owner_reference(controlled.owner_references_mut(), reference);
        controlled.labels_mut().extend(labels);
        Ok(())
    }

    async fn delete_anchor_for_object(&self, owner: &DynamicObject) -> Result<()> {
        let namespace = match self.mapped_namespace(owner).await {
            Ok(namespace) => namespace,
            // Without the upstream namespace there is no way to locate the
            // anchor; the namespace's own deletion removes it.
            Err(error) if error.is_not_found() => return Ok(()),
            Err(error) => return Err(error),
        };
        let name = anchor_name(&Self::owner_uid(owner)?);
        let deleted = self
            .client
            .delete(&config_map_resource(), Some(&namespace), &name)
            .await
            .ignore_not_found()
            .with_context(|| format!("delete anchor {namespace}/{name}"))?;
        if deleted.is_some() {
            debug!(%namespace, %name, "Deleted anchor");
        }
        Ok(())
    }
}
