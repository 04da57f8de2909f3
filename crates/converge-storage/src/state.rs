use serde::{Serialize, de::DeserializeOwned};

use crate::error::StorageError;
use crate::store::BlobStore;

/// Load a JSON state document. Returns the deserialized value and its
/// generation.
pub async fn load_state<T: DeserializeOwned>(
    store: &dyn BlobStore,
    key: &str,
) -> Result<(T, String), StorageError> {
    let blob = store.get(key).await?;
    let value: T = serde_json::from_slice(&blob.body)?;
    Ok((value, blob.generation))
}

/// Save a JSON state document. Returns the new generation.
pub async fn save_state<T: Serialize>(
    store: &dyn BlobStore,
    key: &str,
    value: &T,
) -> Result<String, StorageError> {
    let body = serde_json::to_vec_pretty(value)?;
    store.put(key, body).await
}
