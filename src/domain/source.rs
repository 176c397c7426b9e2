//! Source image identity and change detection.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Cheap, comparable summary of a source's current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint {
    #[serde(with = "time::serde::rfc3339")]
    pub last_modified: OffsetDateTime,
    pub length: u64,
}

impl Fingerprint {
    pub fn new(last_modified: OffsetDateTime, length: u64) -> Self {
        Self {
            last_modified,
            length,
        }
    }

    /// Stable textual form used when deriving cache keys.
    pub fn token(&self) -> String {
        format!(
            "{}:{}",
            self.last_modified.unix_timestamp_nanos(),
            self.length
        )
    }
}

/// What a provider reports about a source without reading its bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceMetadata {
    pub fingerprint: Fingerprint,
    pub content_type: Option<String>,
}

/// A resolved source: logical path, the provider that claimed it, and its fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceDescriptor {
    pub path: String,
    pub provider: String,
    pub fingerprint: Fingerprint,
}
