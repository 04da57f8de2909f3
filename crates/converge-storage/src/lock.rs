//! Distributed lock manager.
//!
//! A lock is an object in the shared blob store. Acquiring means creating
//! it with a conditional write that only succeeds when no object exists;
//! releasing means a conditional delete keyed on the generation returned at
//! acquisition. A caller can therefore never remove a lock it does not
//! hold, even if its own lock was broken and re-acquired by someone else.

use std::sync::Arc;
use std::time::Duration;

use converge_core::{LockHandle, LockOwner, keys};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::StorageError;
use crate::store::BlobStore;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// `user@host` of the current process.
pub fn default_owner() -> String {
    let user = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string());
    let host = hostname::get()
        .map(|h| h.to_string_lossy().trim().to_string())
        .ok()
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "unknown".to_string());
    format!("{user}@{host}")
}

/// Acquires and releases named locks for one project environment.
pub struct LockManager {
    store: Arc<dyn BlobStore>,
    project: String,
    environment: String,
    owner: String,
    poll_interval: Duration,
}

impl LockManager {
    pub fn new(
        store: Arc<dyn BlobStore>,
        project: impl Into<String>,
        environment: impl Into<String>,
    ) -> Self {
        Self {
            store,
            project: project.into(),
            environment: environment.into(),
            owner: default_owner(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = owner.into();
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    fn lock_key(&self, name: &str) -> Result<String, StorageError> {
        keys::validate_segment(name)?;
        Ok(keys::lock(&self.project, &self.environment, name))
    }

    /// Acquire every lock in `names`.
    ///
    /// Names are deduplicated and acquired sequentially in sorted order so
    /// that two processes asking for overlapping sets cannot deadlock. With
    /// `wait` unset a held lock fails immediately; otherwise acquisition is
    /// retried every poll interval until `wait` has elapsed. If any lock
    /// cannot be taken, the ones already acquired are released again.
    pub async fn acquire(
        &self,
        names: &[&str],
        wait: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<Vec<LockHandle>, StorageError> {
        let mut sorted: Vec<&str> = names.to_vec();
        sorted.sort_unstable();
        sorted.dedup();

        let deadline = wait.map(|w| Instant::now() + w);
        let mut handles = Vec::with_capacity(sorted.len());

        for name in sorted {
            match self.acquire_one(name, deadline, cancel).await {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    if let Err(release_err) = self.release_all(handles).await {
                        tracing::warn!(
                            error = %release_err,
                            "failed to roll back partially acquired locks"
                        );
                    }
                    return Err(e);
                }
            }
        }

        Ok(handles)
    }

    async fn acquire_one(
        &self,
        name: &str,
        deadline: Option<Instant>,
        cancel: &CancellationToken,
    ) -> Result<LockHandle, StorageError> {
        let key = self.lock_key(name)?;

        loop {
            if cancel.is_cancelled() {
                return Err(StorageError::Cancelled);
            }

            let body = serde_json::to_vec(&LockOwner {
                owner: self.owner.clone(),
                acquired_at: jiff::Timestamp::now(),
            })?;

            let (holder, generation) = match self.store.conditional_create(&key, body).await {
                Ok(generation) => {
                    tracing::info!(lock = %name, owner = %self.owner, "lock acquired");
                    return Ok(LockHandle {
                        name: name.to_string(),
                        key,
                        owner: self.owner.clone(),
                        generation,
                    });
                }
                Err(StorageError::PreconditionFailed { .. }) => match self.describe(&key).await {
                    Some(found) => found,
                    // Released between our write and our read: try again now.
                    None => continue,
                },
                Err(e) => return Err(e),
            };

            let now = Instant::now();
            let retry = deadline.is_some_and(|d| now < d);
            if !retry {
                return Err(StorageError::LockHeld {
                    name: name.to_string(),
                    owner: holder,
                    generation,
                });
            }

            tracing::debug!(lock = %name, holder = %holder, "lock held, waiting");
            let sleep_for = deadline
                .map(|d| (d - now).min(self.poll_interval))
                .unwrap_or(self.poll_interval);
            tokio::select! {
                _ = cancel.cancelled() => return Err(StorageError::Cancelled),
                _ = tokio::time::sleep(sleep_for) => {}
            }
        }
    }

    /// Owner and generation of an existing lock object, if it still exists.
    async fn describe(&self, key: &str) -> Option<(String, String)> {
        match self.store.get(key).await {
            Ok(blob) => {
                let owner = match serde_json::from_slice::<LockOwner>(&blob.body) {
                    Ok(meta) => meta.owner,
                    Err(e) => {
                        tracing::warn!(key = %key, error = %e, "unreadable lock owner metadata");
                        "unknown".to_string()
                    }
                };
                Some((owner, blob.generation))
            }
            Err(StorageError::NotFound { .. }) => None,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "failed to read lock owner");
                Some(("unknown".to_string(), "unknown".to_string()))
            }
        }
    }

    /// Release one lock. Fails with [`StorageError::LockIdMismatch`] if the
    /// lock object is gone or was re-created under another generation.
    pub async fn release(&self, handle: &LockHandle) -> Result<(), StorageError> {
        match self
            .store
            .conditional_delete(&handle.key, &handle.generation)
            .await
        {
            Ok(()) => {
                tracing::info!(lock = %handle.name, "lock released");
                Ok(())
            }
            Err(StorageError::PreconditionFailed { .. } | StorageError::NotFound { .. }) => {
                Err(StorageError::LockIdMismatch {
                    name: handle.name.clone(),
                    generation: handle.generation.clone(),
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Release locks in reverse acquisition order. Every lock is attempted;
    /// the first failure is returned.
    pub async fn release_all(&self, handles: Vec<LockHandle>) -> Result<(), StorageError> {
        let mut first_err = None;
        for handle in handles.iter().rev() {
            if let Err(e) = self.release(handle).await {
                tracing::warn!(lock = %handle.name, error = %e, "lock release failed");
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}
