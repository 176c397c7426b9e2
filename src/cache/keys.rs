//! Cache key derivation.
//!
//! A key is the truncated SHA-256 of the source identity, the source
//! fingerprint and the canonical command set. Because the fingerprint is part
//! of the input, replacing a source image changes every key derived from it
//! and old entries are simply never addressed again.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::domain::{CommandSet, SourceDescriptor};

/// Fixed-length lowercase hex identity of a derived artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Pure, I/O-free key derivation with a configured output length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheKeyGenerator {
    length: usize,
}

impl CacheKeyGenerator {
    pub const MIN_LENGTH: usize = 8;
    /// Hex length of a full SHA-256 digest.
    pub const MAX_LENGTH: usize = 64;
    pub const DEFAULT_LENGTH: usize = 12;

    /// Create a generator; `length` is clamped to `MIN_LENGTH..=MAX_LENGTH`.
    pub fn new(length: usize) -> Self {
        Self {
            length: length.clamp(Self::MIN_LENGTH, Self::MAX_LENGTH),
        }
    }

    pub fn length(&self) -> usize {
        self.length
    }

    pub fn derive(&self, source: &SourceDescriptor, commands: &CommandSet) -> CacheKey {
        let mut hasher = Sha256::new();
        // Length-prefix every field so adjacent values cannot run together.
        for field in [
            source.provider.as_str(),
            source.path.as_str(),
            source.fingerprint.token().as_str(),
            commands.canonical().as_str(),
        ] {
            hasher.update((field.len() as u64).to_be_bytes());
            hasher.update(field.as_bytes());
        }

        let mut encoded = hex::encode(hasher.finalize());
        encoded.truncate(self.length);
        CacheKey(encoded)
    }
}

impl Default for CacheKeyGenerator {
    fn default() -> Self {
        Self::new(Self::DEFAULT_LENGTH)
    }
}
