//! Kubernetes store primitives shared by the replication engine.
//!
//! Every component above this crate talks to a cluster through the [`Client`]
//! trait, which operates on untyped [`DynamicObject`]s so that a single engine
//! can replicate arbitrary resource kinds. Two implementations are provided:
//! [`KubeClient`], backed by a real API server, and [`MemoryClient`], an
//! in-process store that mirrors the API-server behaviors the engine relies on
//! (finalizers, owner-reference cascades, status subresources).

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod client;
mod cluster;
pub mod conditions;
mod kube_client;
pub mod labels;
pub mod memory;
pub mod object;

pub use self::{
    client::{Client, Error, ResultExt, Result},
    cluster::{Clusters, StaticClusters},
    kube_client::KubeClient,
    labels::{Labels, Selector},
    memory::MemoryClient,
};
pub use k8s_openapi::{
    api::core::v1::{ConfigMap, Namespace},
    apimachinery::pkg::apis::meta::v1::{Condition, OwnerReference, Time},
};
pub use kube::{
    api::{ApiResource, DynamicObject, ObjectMeta, ResourceExt, TypeMeta},
    core::GroupVersionKind,
    Resource,
};

/// Returns the [`ApiResource`] describing core/v1 `Namespace`s.
pub fn namespace_resource() -> ApiResource {
    ApiResource::erase::<Namespace>(&())
}

/// Returns the [`ApiResource`] describing core/v1 `ConfigMap`s.
pub fn config_map_resource() -> ApiResource {
    ApiResource::erase::<ConfigMap>(&())
}
