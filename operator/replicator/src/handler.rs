//! Routes downstream events back to the upstream objects that own them.

use crate::ownership::UpstreamOwner;
use netsvc_operator_k8s_api::{GroupVersionKind, Resource, Selector};
use std::{collections::BTreeSet, fmt};

/// Identifies an upstream object to reconcile.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Request {
    /// The upstream cluster. Empty for the local cluster.
    pub cluster: String,
    pub namespace: String,
    pub name: String,
}

/// Accepts reconcile requests. A request that is already queued is not
/// queued again.
pub trait Queue {
    fn add(&mut self, request: Request);
}

/// Maps events on downstream objects to reconcile requests for their upstream
/// owners.
///
/// Only objects labeled as owned by the configured upstream group and kind,
/// and matching the configured selector, produce requests. Objects without
/// (or with malformed) ownership labels are ignored.
#[derive(Clone, Debug)]
pub struct EnqueueRequestForUpstreamOwner {
    group: String,
    kind: String,
    selector: Selector,
}

// === impl Request ===

impl Request {
    pub fn new(
        cluster: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            cluster: cluster.into(),
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.cluster.is_empty() {
            write!(f, "{}/{}", self.namespace, self.name)
        } else {
            write!(f, "{}/{} (cluster {})", self.namespace, self.name, self.cluster)
        }
    }
}

impl From<UpstreamOwner> for Request {
    fn from(owner: UpstreamOwner) -> Self {
        Self {
            cluster: owner.cluster_name,
            namespace: owner.namespace,
            name: owner.name,
        }
    }
}

// === impl Queue ===

impl Queue for Vec<Request> {
    fn add(&mut self, request: Request) {
        if !self.contains(&request) {
            self.push(request);
        }
    }
}

impl Queue for BTreeSet<Request> {
    fn add(&mut self, request: Request) {
        self.insert(request);
    }
}

// === impl EnqueueRequestForUpstreamOwner ===

impl EnqueueRequestForUpstreamOwner {
    pub fn new(owner: &GroupVersionKind, selector: Selector) -> Self {
        Self {
            group: owner.group.clone(),
            kind: owner.kind.clone(),
            selector,
        }
    }

    /// Returns the request for the object's upstream owner, if it has one.
    pub fn request_for<K: Resource>(&self, obj: &K) -> Option<Request> {
        let labels = obj.meta().labels.as_ref()?;
        if !self.selector.matches_map(labels) {
            return None;
        }
        let owner = UpstreamOwner::from_labels(labels)?;
        if owner.group != self.group || owner.kind != self.kind {
            return None;
        }
        Some(owner.into())
    }

    pub fn create<K: Resource>(&self, obj: &K, queue: &mut impl Queue) {
        self.enqueue([obj], queue);
    }

    /// Enqueues the owners of both versions of an updated object, so that a
    /// relabeled object notifies its former owner too.
    pub fn update<K: Resource>(&self, old: &K, new: &K, queue: &mut impl Queue) {
        self.enqueue([old, new], queue);
    }

    pub fn delete<K: Resource>(&self, obj: &K, queue: &mut impl Queue) {
        self.enqueue([obj], queue);
    }

    pub fn generic<K: Resource>(&self, obj: &K, queue: &mut impl Queue) {
        self.enqueue([obj], queue);
    }

    fn enqueue<'k, K: Resource + 'k>(
        &self,
        objs: impl IntoIterator<Item = &'k K>,
        queue: &mut impl Queue,
    ) {
        let requests = objs
            .into_iter()
            .filter_map(|obj| self.request_for(obj))
            .collect::<BTreeSet<_>>();
        for request in requests {
            queue.add(request);
        }
    }
}
