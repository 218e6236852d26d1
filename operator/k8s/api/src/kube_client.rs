use crate::{labels::Selector, Client, Error, Result};
use kube::api::{
    Api, ApiResource, DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PostParams,
};

/// A [`Client`] backed by a Kubernetes API server.
#[derive(Clone)]
pub struct KubeClient {
    client: kube::Client,
    field_manager: String,
}

// === impl KubeClient ===

impl KubeClient {
    pub fn new(client: kube::Client, field_manager: impl Into<String>) -> Self {
        Self {
            client,
            field_manager: field_manager.into(),
        }
    }

    fn api(&self, resource: &ApiResource, namespace: Option<&str>) -> Api<DynamicObject> {
        match namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, resource),
            None => Api::all_with(self.client.clone(), resource),
        }
    }

    fn post_params(&self) -> PostParams {
        PostParams {
            field_manager: Some(self.field_manager.clone()),
            ..Default::default()
        }
    }

    fn name<'o>(resource: &ApiResource, object: &'o DynamicObject) -> Result<&'o str> {
        object.metadata.name.as_deref().ok_or_else(|| Error::Invalid {
            kind: resource.kind.clone(),
            message: "object has no name".to_string(),
        })
    }
}

#[async_trait::async_trait]
impl Client for KubeClient {
    async fn get(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<DynamicObject>> {
        Ok(self.api(resource, namespace).get_opt(name).await?)
    }

    async fn list(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        selector: &Selector,
    ) -> Result<Vec<DynamicObject>> {
        let params = ListParams::default().labels(&selector.to_string());
        let list = self.api(resource, namespace).list(&params).await?;
        Ok(list.items)
    }

    async fn create(&self, resource: &ApiResource, object: &DynamicObject) -> Result<DynamicObject> {
        let api = self.api(resource, object.metadata.namespace.as_deref());
        Ok(api.create(&self.post_params(), object).await?)
    }

    async fn update(&self, resource: &ApiResource, object: &DynamicObject) -> Result<DynamicObject> {
        let name = Self::name(resource, object)?;
        let api = self.api(resource, object.metadata.namespace.as_deref());
        Ok(api.replace(name, &self.post_params(), object).await?)
    }

    async fn update_status(
        &self,
        resource: &ApiResource,
        object: &DynamicObject,
    ) -> Result<DynamicObject> {
        let name = Self::name(resource, object)?;
        let api = self.api(resource, object.metadata.namespace.as_deref());
        let body = serde_json::to_vec(object)?;
        Ok(api.replace_status(name, &self.post_params(), body).await?)
    }

    async fn patch(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<DynamicObject> {
        let params = PatchParams {
            field_manager: Some(self.field_manager.clone()),
            ..Default::default()
        };
        let api = self.api(resource, namespace);
        Ok(api.patch(name, &params, &Patch::Merge(patch)).await?)
    }

    async fn delete(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<()> {
        tracing::debug!(kind = %resource.kind, ?namespace, %name, "Deleting");
        self.api(resource, namespace)
            .delete(name, &DeleteParams::background())
            .await?;
        Ok(())
    }

    async fn delete_all_of(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        selector: &Selector,
    ) -> Result<()> {
        tracing::debug!(kind = %resource.kind, ?namespace, %selector, "Deleting collection");
        let params = ListParams::default().labels(&selector.to_string());
        self.api(resource, namespace)
            .delete_collection(&DeleteParams::background(), &params)
            .await?;
        Ok(())
    }
}
