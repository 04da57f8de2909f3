//! converge-core
//!
//! Pure shared vocabulary of the converge engine: resource addresses, file
//! fingerprints, lock handles and the blob-store key layout.
//! No cloud SDK dependency and no I/O.

pub mod addr;
pub mod error;
pub mod files;
pub mod keys;
pub mod lock;

pub use crate::addr::ResourceKey;
pub use crate::error::CoreError;
pub use crate::files::{FileInfo, FileMap};
pub use crate::lock::{LockHandle, LockOwner};
