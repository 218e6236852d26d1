//! Downstream identity and ownership.
//!
//! A [`ResourceStrategy`] decides where the downstream mirror of an upstream
//! object lives and how the two are linked, so that deleting the upstream
//! owner eventually removes everything generated for it.

use crate::{DownstreamClient, Error, Result};
use netsvc_operator_k8s_api::{Client, DynamicObject, OwnerReference, ResourceExt};
use std::sync::Arc;

mod mapped_namespace;
mod same_namespace;

pub use self::{
    mapped_namespace::{anchor_name, downstream_namespace, MappedNamespaceStrategy},
    same_namespace::{downstream_name, SameNamespaceStrategy},
};

/// The downstream identity derived from an upstream object.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DownstreamObjectMeta {
    pub namespace: String,
    pub name: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OwnerRefOptions {
    pub block_owner_deletion: bool,
}

#[async_trait::async_trait]
pub trait ResourceStrategy: Send + Sync {
    /// Returns the client bound to the downstream store.
    fn client(&self) -> &DownstreamClient;

    async fn object_meta_from_upstream_object(
        &self,
        upstream: &DynamicObject,
    ) -> Result<DownstreamObjectMeta>;

    /// Makes `owner` responsible for `controlled`'s lifecycle and labels
    /// `controlled` with its owner's identity.
    async fn set_controller_reference(
        &self,
        owner: &DynamicObject,
        controlled: &mut DynamicObject,
        opts: OwnerRefOptions,
    ) -> Result<()>;

    /// Removes any ownership placeholder created for `owner`. Absent
    /// placeholders are not an error.
    async fn delete_anchor_for_object(&self, owner: &DynamicObject) -> Result<()>;
}

/// Selects the [`ResourceStrategy`] used to place downstream objects.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Placement {
    /// Downstream objects share the upstream namespace and have hashed names.
    SameNamespace,
    /// Downstream objects live in a namespace derived from the upstream
    /// namespace's UID.
    #[default]
    MappedNamespace,
}

#[derive(Debug, thiserror::Error)]
#[error("invalid placement {0:?}; expected same-namespace or mapped-namespace")]
pub struct InvalidPlacement(String);

// === impl OwnerRefOptions ===

impl Default for OwnerRefOptions {
    fn default() -> Self {
        Self {
            block_owner_deletion: true,
        }
    }
}

// === impl Placement ===

impl Placement {
    /// Builds the strategy for objects from the named upstream cluster.
    pub fn strategy(
        self,
        cluster_name: &str,
        upstream: Arc<dyn Client>,
        downstream: Arc<dyn Client>,
    ) -> Box<dyn ResourceStrategy> {
        let client = DownstreamClient::new(cluster_name, downstream);
        match self {
            Self::SameNamespace => Box::new(SameNamespaceStrategy::new(client)),
            Self::MappedNamespace => Box::new(MappedNamespaceStrategy::new(upstream, client)),
        }
    }
}

impl std::str::FromStr for Placement {
    type Err = InvalidPlacement;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "same-namespace" => Ok(Self::SameNamespace),
            "mapped-namespace" => Ok(Self::MappedNamespace),
            s => Err(InvalidPlacement(s.to_string())),
        }
    }
}

impl std::fmt::Display for Placement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SameNamespace => f.write_str("same-namespace"),
            Self::MappedNamespace => f.write_str("mapped-namespace"),
        }
    }
}

/// Builds an owner reference pointing at `owner`.
pub(crate) fn owner_reference(
    owner: &DynamicObject,
    controller: bool,
    opts: OwnerRefOptions,
) -> Result<OwnerReference> {
    let types = owner.types.as_ref().ok_or_else(|| {
        Error::InvalidObject(format!("{} has no type metadata", owner.name_any()))
    })?;
    let uid = owner
        .uid()
        .ok_or_else(|| Error::InvalidObject(format!("{} has no uid", owner.name_any())))?;
    Ok(OwnerReference {
        api_version: types.api_version.clone(),
        kind: types.kind.clone(),
        name: owner.name_any(),
        uid,
        controller: controller.then_some(true),
        block_owner_deletion: Some(opts.block_owner_deletion),
    })
}

/// Adds or replaces the reference to the same owner.
pub(crate) fn upsert_owner_reference(refs: &mut Vec<OwnerReference>, reference: OwnerReference) {
    match refs
        .iter_mut()
        .find(|r| r.uid == reference.uid || (r.kind == reference.kind && r.name == reference.name))
    {
        Some(existing) => *existing = reference,
        None => refs.push(reference),
    }
}

pub(crate) fn describe(obj: &DynamicObject) -> String {
    let kind = obj.types.as_ref().map_or("object", |t| t.kind.as_str());
    match obj.namespace() {
        Some(ns) => format!("{kind} {ns}/{}", obj.name_any()),
        None => format!("{kind} {}", obj.name_any()),
    }
}
