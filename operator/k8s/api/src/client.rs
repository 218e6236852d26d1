use crate::labels::Selector;
use kube::api::{ApiResource, DynamicObject};

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{kind} {name:?} not found")]
    NotFound { kind: String, name: String },

    #[error("{kind} {name:?} already exists")]
    AlreadyExists { kind: String, name: String },

    #[error("conflict updating {kind} {name:?}: {message}")]
    Conflict {
        kind: String,
        name: String,
        message: String,
    },

    #[error("invalid {kind}: {message}")]
    Invalid { kind: String, message: String },

    #[error(transparent)]
    Api(kube::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// An untyped view of a Kubernetes-style object store.
///
/// Namespaced resources are addressed with `Some(namespace)`; cluster-scoped
/// resources with `None`. Objects passed to write operations are addressed by
/// their own metadata.
#[async_trait::async_trait]
pub trait Client: Send + Sync {
    async fn get(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<DynamicObject>>;

    async fn list(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        selector: &Selector,
    ) -> Result<Vec<DynamicObject>>;

    async fn create(&self, resource: &ApiResource, object: &DynamicObject) -> Result<DynamicObject>;

    /// Replaces an object's metadata and content. Status is left untouched.
    async fn update(&self, resource: &ApiResource, object: &DynamicObject) -> Result<DynamicObject>;

    /// Replaces an object's status. Everything else is left untouched.
    async fn update_status(
        &self,
        resource: &ApiResource,
        object: &DynamicObject,
    ) -> Result<DynamicObject>;

    /// Applies a JSON merge patch to an object.
    async fn patch(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<DynamicObject>;

    async fn delete(&self, resource: &ApiResource, namespace: Option<&str>, name: &str)
        -> Result<()>;

    async fn delete_all_of(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        selector: &Selector,
    ) -> Result<()>;
}

pub trait ResultExt<T> {
    /// Maps a not-found error to `Ok(None)`.
    fn ignore_not_found(self) -> Result<Option<T>>;
}

// === impl Error ===

impl Error {
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound { .. } => true,
            Self::Api(kube::Error::Api(rsp)) => rsp.code == 404,
            _ => false,
        }
    }

    pub fn is_already_exists(&self) -> bool {
        match self {
            Self::AlreadyExists { .. } => true,
            Self::Api(kube::Error::Api(rsp)) => rsp.code == 409 && rsp.reason == "AlreadyExists",
            _ => false,
        }
    }

    pub fn is_conflict(&self) -> bool {
        match self {
            Self::Conflict { .. } => true,
            Self::Api(kube::Error::Api(rsp)) => rsp.code == 409 && rsp.reason == "Conflict",
            _ => false,
        }
    }

    pub(crate) fn not_found(resource: &ApiResource, name: impl ToString) -> Self {
        Self::NotFound {
            kind: resource.kind.clone(),
            name: name.to_string(),
        }
    }
}

impl From<kube::Error> for Error {
    fn from(error: kube::Error) -> Self {
        Self::Api(error)
    }
}

// === impl ResultExt ===

impl<T> ResultExt<T> for Result<T> {
    fn ignore_not_found(self) -> Result<Option<T>> {
        match self {
            Ok(v) => Ok(Some(v)),
            Err(error) if error.is_not_found() => Ok(None),
            Err(error) => Err(error),
        }
    }
}

#[async_trait::async_trait]
impl<C: Client + ?Sized> Client for std::sync::Arc<C> {
    async fn get(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<DynamicObject>> {
        (**self).get(resource, namespace, name).await
    }

    async fn list(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        selector: &Selector,
    ) -> Result<Vec<DynamicObject>> {
        (**self).list(resource, namespace, selector).await
    }

    async fn create(&self, resource: &ApiResource, object: &DynamicObject) -> Result<DynamicObject> {
        (**self).create(resource, object).await
    }

    async fn update(&self, resource: &ApiResource, object: &DynamicObject) -> Result<DynamicObject> {
        (**self).update(resource, object).await
    }

    async fn update_status(
        &self,
        resource: &ApiResource,
        object: &DynamicObject,
    ) -> Result<DynamicObject> {
        (**self).update_status(resource, object).await
    }

    async fn patch(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<DynamicObject> {
        (**self).patch(resource, namespace, name, patch).await
    }

    async fn delete(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<()> {
        (**self).delete(resource, namespace, name).await
    }

    async fn delete_all_of(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        selector: &Selector,
    ) -> Result<()> {
        (**self).delete_all_of(resource, namespace, selector).await
    }
}
