use crate::Client;
use std::{collections::BTreeMap, sync::Arc};

/// Resolves the clients of named clusters.
pub trait Clusters: Send + Sync {
    fn cluster(&self, name: &str) -> Option<Arc<dyn Client>>;

    fn names(&self) -> Vec<String>;
}

/// A fixed set of clusters known at startup.
#[derive(Clone, Default)]
pub struct StaticClusters(BTreeMap<String, Arc<dyn Client>>);

// === impl StaticClusters ===

impl StaticClusters {
    pub fn with(mut self, name: impl Into<String>, client: Arc<dyn Client>) -> Self {
        self.0.insert(name.into(), client);
        self
    }
}

impl Clusters for StaticClusters {
    fn cluster(&self, name: &str) -> Option<Arc<dyn Client>> {
        self.0.get(name).cloned()
    }

    fn names(&self) -> Vec<String> {
        self.0.keys().cloned().collect()
    }
}

impl std::fmt::Debug for StaticClusters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.0.keys()).finish()
    }
}
