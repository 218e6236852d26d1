use netsvc_operator_k8s_api as k8s;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to {action}: {source}")]
    Store {
        action: String,
        #[source]
        source: k8s::Error,
    },

    #[error("no replication config registered for {0}")]
    UnknownKind(String),

    #[error("unknown upstream cluster {0:?}")]
    UnknownCluster(String),

    #[error("cluster scoped resource controllers are not supported: {0}")]
    ClusterScoped(String),

    #[error("invalid owner reference: {0}")]
    ScopeMismatch(String),

    #[error("{object} is already controlled by {owner}")]
    AlreadyOwned { object: String, owner: String },

    #[error("invalid object: {0}")]
    InvalidObject(String),

    #[error("failed to transform status: {0}")]
    Transform(#[from] serde_json::Error),
}

pub(crate) trait Context<T> {
    fn with_context(self, action: impl FnOnce() -> String) -> Result<T>;
}

// === impl Error ===

impl Error {
    /// Returns true if the error was caused by a missing object.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Store { source, .. } if source.is_not_found())
    }
}

impl<T> Context<T> for k8s::Result<T> {
    fn with_context(self, action: impl FnOnce() -> String) -> Result<T> {
        self.map_err(|source| Error::Store {
            action: action(),
            source,
        })
    }
}
