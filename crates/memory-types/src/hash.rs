//! Content fingerprints.
//!
//! A `HashKey` is the lowercase hex MD5 digest of a text. It keys the
//! embedding cache and doubles as the derived id of a stored memory, so
//! storing identical content twice targets the same record.

use std::fmt;

use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};

/// Length of a hex-encoded MD5 digest.
pub const HASH_KEY_LEN: usize = 32;

/// Deterministic fingerprint of a piece of text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HashKey(String);

impl HashKey {
    /// Hash the UTF-8 bytes of `text`.
    pub fn of(text: &str) -> Self {
        let digest = Md5::digest(text.as_bytes());
        Self(hex::encode(digest))
    }

    /// Prefix the digest with a namespace, e.g. `cloud:5eb6...`.
    ///
    /// Used to keep vectors from different embedding spaces apart when
    /// they share one cache.
    pub fn namespaced(namespace: &str, text: &str) -> Self {
        let Self(digest) = Self::of(text);
        Self(format!("{namespace}:{digest}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for HashKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<HashKey> for String {
    fn from(key: HashKey) -> Self {
        key.0
    }
}

impl AsRef<str> for HashKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
