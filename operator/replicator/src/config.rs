use crate::{
    ownership,
    status::{ConditionHandler, CopyStatus, StatusTransform},
};
use netsvc_operator_k8s_api::{object::gvk_key, ApiResource, GroupVersionKind};
use std::{collections::HashMap, sync::Arc};

/// The finalizer that blocks upstream deletion until downstream state is
/// torn down.
pub const DEFAULT_FINALIZER: &str = "meta.netsvc.dev/downstream-replication";

/// Annotation prefixes that are never copied downstream.
const DEFAULT_EXCLUDED_ANNOTATION_PREFIXES: &[&str] =
    &["kubectl.kubernetes.io/", ownership::LABEL_PREFIX];

/// How a single resource kind is replicated.
#[derive(Clone)]
pub struct ResourceConfig {
    pub gvk: GroupVersionKind,
    pub api_resource: ApiResource,
    /// The controller name reported in upstream statuses.
    pub controller_name: String,
    pub transform: Arc<dyn StatusTransform>,
    pub condition_handlers: Vec<Arc<dyn ConditionHandler>>,
}

/// The replication table. Built once at startup and shared immutably.
#[derive(Clone)]
pub struct ReplicationConfig {
    finalizer: String,
    excluded_annotation_prefixes: Vec<String>,
    resources: HashMap<String, ResourceConfig>,
}

#[derive(Clone)]
pub struct ReplicationConfigBuilder {
    finalizer: String,
    excluded_annotation_prefixes: Vec<String>,
    resources: Vec<ResourceConfig>,
}

// === impl ResourceConfig ===

impl ResourceConfig {
    /// Configures a kind whose status is copied as-is.
    pub fn new(gvk: GroupVersionKind, controller_name: impl Into<String>) -> Self {
        Self {
            api_resource: ApiResource::from_gvk(&gvk),
            gvk,
            controller_name: controller_name.into(),
            transform: Arc::new(CopyStatus),
            condition_handlers: Vec::new(),
        }
    }

    /// Overrides the resource description, e.g. with one discovered from the
    /// API server whose plural differs from the default guess.
    pub fn with_api_resource(mut self, api_resource: ApiResource) -> Self {
        self.api_resource = api_resource;
        self
    }

    pub fn with_transform(mut self, transform: impl StatusTransform + 'static) -> Self {
        self.transform = Arc::new(transform);
        self
    }

    pub fn with_condition_handler(mut self, handler: impl ConditionHandler + 'static) -> Self {
        self.condition_handlers.push(Arc::new(handler));
        self
    }

    pub fn key(&self) -> String {
        gvk_key(&self.gvk)
    }
}

impl std::fmt::Debug for ResourceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceConfig")
            .field("gvk", &self.key())
            .field("plural", &self.api_resource.plural)
            .field("controller_name", &self.controller_name)
            .field("condition_handlers", &self.condition_handlers.len())
            .finish()
    }
}

// === impl ReplicationConfig ===

impl ReplicationConfig {
    pub fn builder() -> ReplicationConfigBuilder {
        ReplicationConfigBuilder {
            finalizer: DEFAULT_FINALIZER.to_string(),
            excluded_annotation_prefixes: DEFAULT_EXCLUDED_ANNOTATION_PREFIXES
                .iter()
                .map(|p| p.to_string())
                .collect(),
            resources: Vec::new(),
        }
    }

    pub fn finalizer(&self) -> &str {
        &self.finalizer
    }

    pub fn resource(&self, gvk: &GroupVersionKind) -> Option<&ResourceConfig> {
        self.resources.get(&gvk_key(gvk))
    }

    pub fn resources(&self) -> impl Iterator<Item = &ResourceConfig> {
        self.resources.values()
    }

    /// Returns true if the annotation should be copied downstream.
    pub fn replicates_annotation(&self, key: &str) -> bool {
        !self
            .excluded_annotation_prefixes
            .iter()
            .any(|prefix| key.starts_with(prefix.as_str()))
    }
}

impl std::fmt::Debug for ReplicationConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicationConfig")
            .field("finalizer", &self.finalizer)
            .field(
                "excluded_annotation_prefixes",
                &self.excluded_annotation_prefixes,
            )
            .field("resources", &self.resources.keys().collect::<Vec<_>>())
            .finish()
    }
}

// === impl ReplicationConfigBuilder ===

impl ReplicationConfigBuilder {
    pub fn finalizer(mut self, finalizer: impl Into<String>) -> Self {
        self.finalizer = finalizer.into();
        self
    }

    pub fn exclude_annotation_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.excluded_annotation_prefixes.push(prefix.into());
        self
    }

    /// Registers a resource kind. A later registration of the same kind
    /// replaces an earlier one.
    pub fn resource(mut self, resource: ResourceConfig) -> Self {
        self.resources.push(resource);
        self
    }

    pub fn build(self) -> ReplicationConfig {
        ReplicationConfig {
            finalizer: self.finalizer,
            excluded_annotation_prefixes: self.excluded_annotation_prefixes,
            resources: self
                .resources
                .into_iter()
                .map(|r| (r.key(), r))
                .collect(),
        }
    }
}
