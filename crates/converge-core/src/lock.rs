use serde::{Deserialize, Serialize};

/// Proof of a held lock.
///
/// `generation` is the optimistic-concurrency token the blob store returned
/// when the lock object was conditionally created. Release is only valid
/// for this exact generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockHandle {
    pub name: String,
    pub key: String,
    pub owner: String,
    pub generation: String,
}

/// Body of a lock object, written at acquisition time for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockOwner {
    /// `user@host` of the process holding the lock.
    pub owner: String,
    pub acquired_at: jiff::Timestamp,
}
