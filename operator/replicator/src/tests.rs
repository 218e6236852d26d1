use crate::{
    status::{PolicyAncestorStatus, RewriteMessage, RewriteNamespace},
    Placement, ReplicationConfig, Replicator, Request, ResourceConfig,
};
use netsvc_operator_k8s_api::{
    self as k8s, namespace_resource, ApiResource, Client, DynamicObject, GroupVersionKind,
    MemoryClient, Selector, StaticClusters,
};
use serde_json::json;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};


const CLUSTER: &str = "org/project";
const CONTROLLER_NAME: &str = "netsvc.dev/operator";

struct Fixture {
    upstream: Arc<MemoryClient>,
    downstream: Arc<MemoryClient>,
    replicator: Replicator,
}

fn policy_gvk() -> GroupVersionKind {
    GroupVersionKind::gvk("gateway.networking.k8s.io", "v1alpha3", "BackendTLSPolicy")
}

fn policies() -> ApiResource {
    ApiResource::from_gvk(&policy_gvk())
}

fn config() -> ReplicationConfig {
    ReplicationConfig::builder()
        .resource(
            ResourceConfig::new(policy_gvk(), CONTROLLER_NAME)
                .with_transform(PolicyAncestorStatus)
                .with_condition_handler(RewriteMessage {
                    condition_type: None,
                    reason: None,
                    contains: "downstream attachment target missing".to_string(),
                    message: "referenced resource not found in upstream namespace".to_string(),
                })
                .with_condition_handler(RewriteNamespace),
        )
        .build()
}

/// An upstream cluster holding the `test-suite` namespace, replicating into a
/// separate downstream store.
fn mapped() -> Fixture {
    let upstream = Arc::new(MemoryClient::new());
    let mut ns = DynamicObject::new("test-suite", &namespace_resource());
    ns.metadata.uid = Some("ns-uid".to_string());
    upstream.seed(&namespace_resource(), ns);

    let downstream = Arc::new(MemoryClient::new());
    let clusters = StaticClusters::default().with(CLUSTER, upstream.clone());
    let replicator = Replicator::new(
        Arc::new(config()),
        Arc::new(clusters),
        downstream.clone(),
        Placement::MappedNamespace,
    );
    Fixture {
        upstream,
        downstream,
        replicator,
    }
}

/// A single cluster acting as both upstream and downstream.
fn same_namespace() -> Fixture {
    let store = Arc::new(MemoryClient::new());
    store.seed(
        &namespace_resource(),
        DynamicObject::new("test-suite", &namespace_resource()),
    );
    let clusters = StaticClusters::default().with(CLUSTER, store.clone());
    let replicator = Replicator::new(
        Arc::new(config()),
        Arc::new(clusters),
        store.clone(),
        Placement::SameNamespace,
    );
    Fixture {
        upstream: store.clone(),
        downstream: store,
        replicator,
    }
}

fn example() -> DynamicObject {
    let mut obj = DynamicObject::new("example", &policies())
        .within("test-suite")
        .data(json!({
            "spec": {
                "targetRefs": [{"group": "", "kind": "Service", "name": "backend"}],
                "validation": {
                    "hostname": "backend.example.com",
                    "wellKnownCACertificates": "System",
                },
            },
        }));
    obj.metadata.uid = Some("upstream-uid".to_string());
    obj.metadata.labels = Some(maplit::btreemap! {
        "replicate".to_string() => "true".to_string(),
    });
    obj
}

fn request() -> Request {
    Request::new(CLUSTER, "test-suite", "example")
}

impl Fixture {
    async fn reconcile(&self) {
        self.replicator
            .reconcile(&policy_gvk(), &request())
            .await
            .expect("reconcile must succeed");
    }

    async fn upstream_example(&self) -> Option<DynamicObject> {
        self.upstream
            .get(&policies(), Some("test-suite"), "example")
            .await
            .unwrap()
    }

    async fn downstream_object(&self, namespace: &str, name: &str) -> Option<DynamicObject> {
        self.downstream
            .get(&policies(), Some(namespace), name)
            .await
            .unwrap()
    }
}

/// Wraps a store so that the first lookup of one kind misses, as though the
/// object were created concurrently right after the lookup.
pub(crate) struct MissedGet {
    inner: Arc<MemoryClient>,
    kind: &'static str,
    missed: AtomicBool,
}

// === impl MissedGet ===

impl MissedGet {
    pub(crate) fn new(inner: Arc<MemoryClient>, kind: &'static str) -> Self {
        Self {
            inner,
            kind,
            missed: AtomicBool::new(false),
        }
    }
}

#[async_trait::async_trait]
impl Client for MissedGet {
    async fn get(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> k8s::Result<Option<DynamicObject>> {
        if resource.kind == self.kind && !self.missed.swap(true, Ordering::SeqCst) {
            return Ok(None);
        }
        self.inner.get(resource, namespace, name).await
    }

    async fn list(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        selector: &Selector,
    ) -> k8s::Result<Vec<DynamicObject>> {
        self.inner.list(resource, namespace, selector).await
    }

    async fn create(
        &self,
        resource: &ApiResource,
        object: &DynamicObject,
    ) -> k8s::Result<DynamicObject> {
        self.inner.create(resource, object).await
    }

    async fn update(
        &self,
        resource: &ApiResource,
        object: &DynamicObject,
    ) -> k8s::Result<DynamicObject> {
        self.inner.update(resource, object).await
    }

    async fn update_status(
        &self,
        resource: &ApiResource,
        object: &DynamicObject,
    ) -> k8s::Result<DynamicObject> {
        self.inner.update_status(resource, object).await
    }

    async fn patch(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
        patch: &serde_json::Value,
    ) -> k8s::Result<DynamicObject> {
        self.inner.patch(resource, namespace, name, patch).await
    }

    async fn delete(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> k8s::Result<()> {
        self.inner.delete(resource, namespace, name).await
    }

    async fn delete_all_of(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        selector: &Selector,
    ) -> k8s::Result<()> {
        self.inner.delete_all_of(resource, namespace, selector).await
    }
}
