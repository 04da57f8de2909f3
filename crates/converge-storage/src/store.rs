use std::future::Future;
use std::pin::Pin;

use crate::error::StorageError;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Body and generation of a stored object.
#[derive(Debug, Clone)]
pub struct Blob {
    pub body: Vec<u8>,
    pub generation: String,
}

/// Listing entry for one stored object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMeta {
    pub key: String,
    pub size: u64,
    pub generation: String,
    /// Hex MD5 of the content, when the backend can report it.
    pub md5: Option<String>,
}

/// Minimal object-store capability.
///
/// Every successful write returns the new generation, an opaque token that
/// changes whenever the object is replaced. `conditional_create` and
/// `conditional_delete` fail with [`StorageError::PreconditionFailed`] when
/// their precondition does not hold.
///
/// Methods return boxed futures for dyn compatibility.
pub trait BlobStore: Send + Sync {
    /// Read an object. Fails with [`StorageError::NotFound`] if absent.
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Blob, StorageError>>;

    /// Unconditionally write an object.
    fn put<'a>(&'a self, key: &'a str, body: Vec<u8>) -> BoxFuture<'a, Result<String, StorageError>>;

    /// Remove an object. Removing an absent object succeeds.
    fn delete<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<(), StorageError>>;

    /// Write an object only if no object exists under `key`.
    fn conditional_create<'a>(
        &'a self,
        key: &'a str,
        body: Vec<u8>,
    ) -> BoxFuture<'a, Result<String, StorageError>>;

    /// Remove an object only if its current generation is `generation`.
    ///
    /// An absent object fails with [`StorageError::NotFound`].
    fn conditional_delete<'a>(
        &'a self,
        key: &'a str,
        generation: &'a str,
    ) -> BoxFuture<'a, Result<(), StorageError>>;

    /// List every object whose key starts with `prefix`, ordered by key.
    fn list<'a>(&'a self, prefix: &'a str) -> BoxFuture<'a, Result<Vec<ObjectMeta>, StorageError>>;
}
