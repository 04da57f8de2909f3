//! converge-storage
//!
//! Blob-store capability shared by state persistence, file synchronization
//! and the distributed lock manager. Ships an S3-backed store, an in-memory
//! store and a per-region client pool.

pub mod client;
pub mod error;
pub mod lock;
pub mod memory;
pub mod objects;
pub mod state;
pub mod store;

pub use crate::client::ClientPool;
pub use crate::error::{StorageError, format_err_chain};
pub use crate::lock::LockManager;
pub use crate::memory::MemoryStore;
pub use crate::objects::S3Store;
pub use crate::store::{Blob, BlobStore, BoxFuture, ObjectMeta};
