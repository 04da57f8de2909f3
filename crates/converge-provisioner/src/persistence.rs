use std::path::PathBuf;
use std::sync::Arc;

use converge_storage::{BlobStore, StorageError};

use crate::error::ProvisionerError;
use crate::state::ProvisionerState;

/// Dual-write state persistence: the shared blob store (authoritative) plus
/// an optional local copy as a safety net.
pub struct StatePersistence {
    pub store: Arc<dyn BlobStore>,
    pub project: String,
    pub environment: String,
    pub key: String,
    pub local_path: Option<PathBuf>,
}

impl StatePersistence {
    pub fn new(
        store: Arc<dyn BlobStore>,
        project: &str,
        environment: &str,
    ) -> Result<Self, ProvisionerError> {
        converge_core::keys::validate_segment(project)?;
        converge_core::keys::validate_segment(environment)?;
        Ok(Self {
            store,
            project: project.to_string(),
            environment: environment.to_string(),
            key: converge_core::keys::state(project, environment),
            local_path: None,
        })
    }

    /// Also keep a copy under `dir/{project}/{environment}/state.json`.
    pub fn with_local_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        let dir: PathBuf = dir.into();
        self.local_path = Some(
            dir.join(&self.project)
                .join(&self.environment)
                .join("state.json"),
        );
        self
    }

    /// Write state locally first (atomic: tmp + rename), then to the blob
    /// store.
    ///
    /// A failed local write is logged and otherwise ignored; a failed blob
    /// store write is returned.
    pub async fn flush(&self, state: &ProvisionerState) -> Result<(), ProvisionerError> {
        if let Some(local_path) = &self.local_path {
            let json = serde_json::to_vec_pretty(state)?;
            let write = || -> std::io::Result<()> {
                if let Some(parent) = local_path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                let tmp_path = local_path.with_extension("json.tmp");
                std::fs::write(&tmp_path, &json)?;
                std::fs::rename(&tmp_path, local_path)
            };
            match write() {
                Ok(()) => {
                    tracing::debug!(path = %local_path.display(), "state flushed to local disk");
                }
                Err(e) => {
                    tracing::warn!(error = %e, path = %local_path.display(), "failed to write local state copy");
                }
            }
        }

        let generation =
            converge_storage::state::save_state(self.store.as_ref(), &self.key, state).await?;
        tracing::debug!(key = %self.key, %generation, resources = state.resources.len(), "state flushed");
        Ok(())
    }

    /// Load state: blob store first (authoritative), then the local copy,
    /// then a fresh empty state.
    ///
    /// The local copy is only consulted when the store has no state object.
    /// Any other store failure, including an unreadable document, is
    /// returned.
    pub async fn load(&self) -> Result<ProvisionerState, ProvisionerError> {
        match converge_storage::state::load_state::<ProvisionerState>(self.store.as_ref(), &self.key)
            .await
        {
            Ok((state, _generation)) => {
                tracing::debug!(key = %self.key, "state loaded from blob store");
                state.check_version()?;
                return Ok(state);
            }
            Err(StorageError::NotFound { .. }) => {
                tracing::debug!("no state in blob store, trying local");
            }
            Err(e) => {
                tracing::error!(key = %self.key, error = %e, "failed to load state from blob store");
                return Err(e.into());
            }
        }

        if let Some(local_path) = self.local_path.as_ref().filter(|p| p.exists()) {
            let json = std::fs::read(local_path)?;
            let state: ProvisionerState = serde_json::from_slice(&json)?;
            state.check_version()?;
            tracing::debug!(path = %local_path.display(), "state loaded from local disk");
            return Ok(state);
        }

        tracing::debug!("no existing state found, starting fresh");
        Ok(ProvisionerState::new(&self.project, &self.environment))
    }
}
