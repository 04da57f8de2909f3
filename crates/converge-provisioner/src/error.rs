use thiserror::Error;

use crate::field::FieldError;

#[derive(Debug, Error)]
pub enum ProvisionerError {
    /// The provider reports the object absent. Reads treat this as "no
    /// current state"; deletes treat it as already done.
    #[error("resource not found: {kind}/{name}")]
    NotFound { kind: String, name: String },

    /// A conditional write lost a race.
    #[error("conflict on {key}: held by {owner} (generation {generation})")]
    Conflict {
        key: String,
        owner: String,
        generation: String,
    },

    /// The resource kind cannot apply this change in place.
    #[error("unimplemented: {0}")]
    Unimplemented(String),

    /// Network, quota or other provider-side failure. Not retried here.
    #[error("provider error: {0}")]
    Provider(String),

    /// An asynchronous provider job finished unsuccessfully. The message is
    /// the provider's own.
    #[error("operation {operation} failed: {message}")]
    OperationFailed { operation: String, message: String },

    #[error("resource {kind}/{name} did not become ready: {message}")]
    NotReady {
        kind: String,
        name: String,
        message: String,
    },

    #[error("operation cancelled")]
    Cancelled,

    #[error("field error: {0}")]
    Field(#[from] FieldError),

    #[error("unknown resource kind: {0}")]
    UnknownKind(String),

    #[error("invalid configuration for {key}: {message}")]
    InvalidConfig { key: String, message: String },

    #[error("engine config error: {0}")]
    Config(String),

    #[error("dependency cycle involving: {0}")]
    DependencyCycle(String),

    #[error("routing error: {0}")]
    Routing(String),

    #[error("state error: {0}")]
    State(String),

    #[error("storage error: {0}")]
    Storage(#[from] converge_storage::StorageError),

    #[error("invalid key: {0}")]
    Key(#[from] converge_core::CoreError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProvisionerError {
    /// Prepend resource identity to the error message.
    pub fn with_resource(self, label: &str, name: &str) -> Self {
        match self {
            Self::Provider(msg) => Self::Provider(format!("{label} ({name}): {msg}")),
            Self::Unimplemented(msg) => Self::Unimplemented(format!("{label} ({name}): {msg}")),
            other => other,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::NotFound { .. } | Self::Storage(converge_storage::StorageError::NotFound { .. })
        )
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            Self::Cancelled | Self::Storage(converge_storage::StorageError::Cancelled)
        )
    }
}
