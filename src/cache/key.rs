//! Cache key derivation.

use sha2::{Digest, Sha256};
use std::fmt;

/// Number of digest bytes kept in a key (128 bits).
const KEY_BYTES: usize = 16;

/// Identity of a cached resource: a truncated SHA-256 of `<protocol>://<url>`.
///
/// Rendered as 32 lowercase hex characters, which is what names the entry
/// file inside the cache directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey([u8; KEY_BYTES]);

impl CacheKey {
    /// Derive the key for a resource.
    ///
    /// The url is hashed verbatim; nothing about its shape is validated, so
    /// empty or malformed input still yields a key.
    pub fn derive(protocol: &str, url: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(protocol.as_bytes());
        hasher.update(b"://");
        hasher.update(url.as_bytes());
        let digest = hasher.finalize();

        let mut bytes = [0u8; KEY_BYTES];
        bytes.copy_from_slice(&digest[..KEY_BYTES]);
        Self(bytes)
    }

    /// Hex rendering used as the file name.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}
