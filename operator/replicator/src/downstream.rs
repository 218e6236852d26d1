use crate::ownership;
use netsvc_operator_k8s_api::{
    self as k8s, namespace_resource, ApiResource, Client, DynamicObject, ResourceExt, Selector,
};
use std::sync::Arc;
use tracing::{debug, info};

/// A downstream [`Client`] that ensures an object's namespace exists before
/// creating it.
///
/// Only namespace existence is guaranteed: a namespace that already exists is
/// never modified. All other operations pass through unchanged.
#[derive(Clone)]
pub struct DownstreamClient {
    cluster_name: String,
    inner: Arc<dyn Client>,
}

// === impl DownstreamClient ===

impl DownstreamClient {
    /// Wraps a client that writes objects on behalf of the named upstream
    /// cluster.
    pub fn new(cluster_name: impl Into<String>, inner: Arc<dyn Client>) -> Self {
        Self {
            cluster_name: cluster_name.into(),
            inner,
        }
    }

    pub fn cluster_name(&self) -> &str {
        &self.cluster_name
    }

    async fn ensure_namespace(&self, name: &str) -> k8s::Result<()> {
        let namespaces = namespace_resource();
        if self.inner.get(&namespaces, None, name).await?.is_some() {
            return Ok(());
        }

        let mut namespace = DynamicObject::new(name, &namespaces);
        namespace.labels_mut().insert(
            ownership::UPSTREAM_CLUSTER_NAME.to_string(),
            ownership::encode_cluster_name(&self.cluster_name),
        );
        match self.inner.create(&namespaces, &namespace).await {
            Ok(_) => {
                info!(namespace = %name, cluster = %self.cluster_name, "Created downstream namespace");
                Ok(())
            }
            Err(error) if error.is_already_exists() => {
                debug!(namespace = %name, "Downstream namespace created concurrently");
                Ok(())
            }
            Err(error) => Err(error),
        }
    }
}

#[async_trait::async_trait]
impl Client for DownstreamClient {
    async fn get(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> k8s::Result<Option<DynamicObject>> {
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
        if let Some(ns) = object.metadata.namespace.as_deref() {
            self.ensure_namespace(ns).await?;
        }
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::MissedGet;
    use k8s::{GroupVersionKind, MemoryClient};

    fn route_resource() -> ApiResource {
        ApiResource::from_gvk(&GroupVersionKind::gvk(
            "gateway.networking.k8s.io",
            "v1",
            "HTTPRoute",
        ))
    }

    #[tokio::test]
    async fn create_provisions_the_namespace() {
        let store = Arc::new(MemoryClient::new());
        let client = DownstreamClient::new("org/project", store.clone());

        let route = DynamicObject::new("web", &route_resource()).within("ns-1234");
        client.create(&route_resource(), &route).await.unwrap();

        let namespace = store
            .get(&namespace_resource(), None, "ns-1234")
            .await
            .unwrap()
            .expect("namespace must be created");
        assert_eq!(
            namespace.labels().get(ownership::UPSTREAM_CLUSTER_NAME),
            Some(&"cluster-org_project".to_string())
        );
        assert!(store
            .get(&route_resource(), Some("ns-1234"), "web")
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn existing_namespaces_are_left_alone() {
        let store = Arc::new(MemoryClient::new());
        let mut existing = DynamicObject::new("shared", &namespace_resource());
        existing
            .labels_mut()
            .insert("owner".to_string(), "someone-else".to_string());
        store.seed(&namespace_resource(), existing);

        let client = DownstreamClient::new("local", store.clone());
        let route = DynamicObject::new("web", &route_resource()).within("shared");
        client.create(&route_resource(), &route).await.unwrap();

        let namespace = store
            .get(&namespace_resource(), None, "shared")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(namespace.labels().len(), 1);
        // Only the route was written.
        assert_eq!(store.writes(), 1);
    }

    #[tokio::test]
    async fn concurrently_created_namespaces_are_tolerated() {
        let store = Arc::new(MemoryClient::new());
        let mut existing = DynamicObject::new("ns-1234", &namespace_resource());
        existing
            .labels_mut()
            .insert("owner".to_string(), "someone-else".to_string());
        store.seed(&namespace_resource(), existing);

        // The namespace lookup misses, so the create races with the seeded
        // namespace and fails with AlreadyExists.
        let client = DownstreamClient::new(
            "local",
            Arc::new(MissedGet::new(store.clone(), "Namespace")),
        );
        let route = DynamicObject::new("web", &route_resource()).within("ns-1234");
        client.create(&route_resource(), &route).await.unwrap();

        let namespace = store
            .get(&namespace_resource(), None, "ns-1234")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            namespace.labels().get("owner").map(String::as_str),
            Some("someone-else")
        );
        assert_eq!(namespace.labels().len(), 1);
        assert_eq!(store.writes(), 1);
    }
}
