use std::collections::BTreeMap;

use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};

/// Fingerprint of one blob in a synchronized file set.
///
/// `hash` is the lowercase hex MD5 of the content.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileInfo {
    pub hash: String,
}

impl FileInfo {
    pub fn new(hash: impl Into<String>) -> Self {
        Self { hash: hash.into() }
    }

    /// Fingerprint a blob body.
    pub fn of(content: &[u8]) -> Self {
        Self {
            hash: content_hash(content),
        }
    }
}

/// Relative path (always `/`-separated) to fingerprint.
///
/// Ordered so that serialized state and plan payloads are deterministic.
pub type FileMap = BTreeMap<String, FileInfo>;

/// Lowercase hex MD5 of `content`.
pub fn content_hash(content: &[u8]) -> String {
    hex::encode(Md5::digest(content))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_hex_md5() {
        assert_eq!(content_hash(b""), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(FileInfo::of(b"abc").hash, "900150983cd24fb0d6963f7d28e17f72");
    }
}
