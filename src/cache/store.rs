//! Durable store contract and the in-process LRU backend.

use std::num::NonZeroUsize;
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use lru::LruCache;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;

use crate::application::stream::{self, ByteStream};
use crate::domain::Fingerprint;

use super::keys::CacheKey;
use super::lock::mutex_lock;

const SOURCE: &str = "cache::store";

#[derive(Debug, Error)]
pub enum CacheStoreError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("corrupt cache metadata for `{key}`: {message}")]
    CorruptMetadata { key: String, message: String },
    #[error("cache backend error: {0}")]
    Backend(String),
}

/// Everything known about a cached artifact apart from its bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntryMetadata {
    pub key: CacheKey,
    pub content_type: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub source_fingerprint: Fingerprint,
    pub length: u64,
}

/// Attributes supplied by the writer; the store assigns the creation time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCacheEntry {
    pub content_type: String,
    pub source_fingerprint: Fingerprint,
}

/// Capability set every cache backend implements.
///
/// `write` must be atomic for readers: an entry is either absent or complete.
/// Operations on different keys must not block each other.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn exists(&self, key: &CacheKey) -> Result<bool, CacheStoreError>;

    async fn metadata(&self, key: &CacheKey)
    -> Result<Option<CacheEntryMetadata>, CacheStoreError>;

    async fn open_read(&self, key: &CacheKey) -> Result<Option<ByteStream>, CacheStoreError>;

    /// Metadata and body of the same entry.
    ///
    /// The default reads them in two steps; backends where a concurrent
    /// `write` can land in between override it.
    async fn open_entry(
        &self,
        key: &CacheKey,
    ) -> Result<Option<(CacheEntryMetadata, ByteStream)>, CacheStoreError> {
        let Some(metadata) = self.metadata(key).await? else {
            return Ok(None);
        };
        Ok(self.open_read(key).await?.map(|body| (metadata, body)))
    }

    async fn write(
        &self,
        key: &CacheKey,
        body: ByteStream,
        entry: NewCacheEntry,
    ) -> Result<CacheEntryMetadata, CacheStoreError>;
}

#[derive(Clone)]
struct StoredEntry {
    metadata: CacheEntryMetadata,
    body: Bytes,
}

/// Bounded in-memory store with LRU eviction.
///
/// Suitable for tests and single-process deployments that do not need
/// entries to survive a restart.
pub struct MemoryCache {
    entries: Mutex<LruCache<CacheKey, StoredEntry>>,
}

impl MemoryCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Insert a complete entry directly, bypassing `write`.
    pub fn put(&self, metadata: CacheEntryMetadata, body: Bytes) {
        let key = metadata.key.clone();
        mutex_lock(&self.entries, SOURCE, "put").put(key, StoredEntry { metadata, body });
    }

    pub fn len(&self) -> usize {
        mutex_lock(&self.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn get(&self, key: &CacheKey, op: &'static str) -> Option<StoredEntry> {
        mutex_lock(&self.entries, SOURCE, op).get(key).cloned()
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn exists(&self, key: &CacheKey) -> Result<bool, CacheStoreError> {
        Ok(mutex_lock(&self.entries, SOURCE, "exists").contains(key))
    }

    async fn metadata(
        &self,
        key: &CacheKey,
    ) -> Result<Option<CacheEntryMetadata>, CacheStoreError> {
        Ok(self.get(key, "metadata").map(|entry| entry.metadata))
    }

    async fn open_read(&self, key: &CacheKey) -> Result<Option<ByteStream>, CacheStoreError> {
        Ok(self
            .get(key, "open_read")
            .map(|entry| stream::once(entry.body)))
    }

    async fn open_entry(
        &self,
        key: &CacheKey,
    ) -> Result<Option<(CacheEntryMetadata, ByteStream)>, CacheStoreError> {
        Ok(self
            .get(key, "open_entry")
            .map(|entry| (entry.metadata, stream::once(entry.body))))
    }

    async fn write(
        &self,
        key: &CacheKey,
        body: ByteStream,
        entry: NewCacheEntry,
    ) -> Result<CacheEntryMetadata, CacheStoreError> {
        // Buffer first so the entry only becomes visible once complete.
        let body = stream::collect(body).await?;
        let metadata = CacheEntryMetadata {
            key: key.clone(),
            content_type: entry.content_type,
            created_at: OffsetDateTime::now_utc(),
            source_fingerprint: entry.source_fingerprint,
            length: body.len() as u64,
        };
        self.put(metadata.clone(), body);
        Ok(metadata)
    }
}
