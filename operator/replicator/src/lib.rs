//! Upstream-to-downstream replication.
//!
//! Upstream objects in any number of named clusters are mirrored into a
//! single downstream store. A [`ResourceStrategy`] decides where each mirror
//! lives and how ownership is expressed across the cluster boundary; the
//! [`Replicator`] drives each upstream object through its lifecycle; and
//! [`EnqueueRequestForUpstreamOwner`] routes downstream changes back to the
//! upstream objects that own them.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod config;
mod downstream;
mod error;
mod handler;
mod metrics;
pub mod ownership;
mod replicator;
pub mod status;
pub mod strategy;

#[cfg(test)]
mod tests;

pub use self::{
    config::{ReplicationConfig, ReplicationConfigBuilder, ResourceConfig, DEFAULT_FINALIZER},
    downstream::DownstreamClient,
    error::{Error, Result},
    handler::{EnqueueRequestForUpstreamOwner, Queue, Request},
    metrics::ReplicatorMetrics,
    ownership::UpstreamOwner,
    replicator::Replicator,
    strategy::{Placement, ResourceStrategy},
};
pub use netsvc_operator_k8s_api as k8s;
