//! Filesystem-backed cache store.
//!
//! Each entry is two files under a sharded directory:
//! `<root>/<k0>/<k1>/<key>` holds the bytes and `<key>.meta` holds the JSON
//! metadata. Both are published by renaming a fully written temporary file, data
//! first, so an entry is present exactly when its metadata file exists.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Instant;

use async_trait::async_trait;
use futures::StreamExt;
use tempfile::TempPath;
use time::OffsetDateTime;
use tokio::{fs, io::AsyncWriteExt};
use tracing::debug;

use crate::application::stream::{self, ByteStream};

use super::keys::CacheKey;
use super::store::{CacheEntryMetadata, CacheStore, CacheStoreError, NewCacheEntry};

const META_SUFFIX: &str = ".meta";
const TEMP_PREFIX: &str = ".tmp-";

#[derive(Debug, Clone)]
pub struct PhysicalFileSystemCache {
    root: PathBuf,
    folder_depth: usize,
}

impl PhysicalFileSystemCache {
    /// Initialise the cache rooted at `root`, creating it if necessary.
    pub fn new(root: impl Into<PathBuf>, folder_depth: usize) -> Result<Self, std::io::Error> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root, folder_depth })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory that holds the entry for `key`.
    pub fn entry_dir(&self, key: &CacheKey) -> PathBuf {
        let mut dir = self.root.clone();
        for shard in key.as_str().chars().take(self.folder_depth) {
            dir.push(shard.to_string());
        }
        dir
    }

    pub fn data_path(&self, key: &CacheKey) -> PathBuf {
        self.entry_dir(key).join(key.as_str())
    }

    pub fn meta_path(&self, key: &CacheKey) -> PathBuf {
        self.entry_dir(key)
            .join(format!("{}{META_SUFFIX}", key.as_str()))
    }

    async fn read_metadata(
        &self,
        key: &CacheKey,
    ) -> Result<Option<CacheEntryMetadata>, CacheStoreError> {
        let raw = match fs::read(self.meta_path(key)).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        serde_json::from_slice(&raw)
            .map(Some)
            .map_err(|err| CacheStoreError::CorruptMetadata {
                key: key.to_string(),
                message: err.to_string(),
            })
    }
}

#[async_trait]
impl CacheStore for PhysicalFileSystemCache {
    async fn exists(&self, key: &CacheKey) -> Result<bool, CacheStoreError> {
        Ok(fs::try_exists(self.meta_path(key)).await?)
    }

    async fn metadata(
        &self,
        key: &CacheKey,
    ) -> Result<Option<CacheEntryMetadata>, CacheStoreError> {
        self.read_metadata(key).await
    }

    async fn open_read(&self, key: &CacheKey) -> Result<Option<ByteStream>, CacheStoreError> {
        if !self.exists(key).await? {
            return Ok(None);
        }

        match fs::File::open(self.data_path(key)).await {
            Ok(file) => Ok(Some(stream::from_reader(file))),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Reads the sidecar on both sides of opening the data file. A rewrite that
    /// lands in between changes or removes the sidecar and is reported as absent.
    async fn open_entry(
        &self,
        key: &CacheKey,
    ) -> Result<Option<(CacheEntryMetadata, ByteStream)>, CacheStoreError> {
        let Some(before) = self.read_metadata(key).await? else {
            return Ok(None);
        };

        let file = match fs::File::open(self.data_path(key)).await {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let on_disk = file.metadata().await?.len();
        let after = self.read_metadata(key).await?;

        if after.as_ref() != Some(&before) || on_disk != before.length {
            debug!(
                target = "cache::physical",
                op = "open_entry",
                result = "replaced",
                cache_key = %key,
                "Entry changed while opening"
            );
            return Ok(None);
        }

        Ok(Some((before, stream::from_reader(file))))
    }

    async fn write(
        &self,
        key: &CacheKey,
        body: ByteStream,
        entry: NewCacheEntry,
    ) -> Result<CacheEntryMetadata, CacheStoreError> {
        let started_at = Instant::now();
        let dir = self.entry_dir(key);
        fs::create_dir_all(&dir).await?;

        let (data, length) = write_temp(&dir, body).await?;

        // Withdraw a replaced entry before its bytes change underneath it.
        let meta_path = self.meta_path(key);
        match fs::remove_file(&meta_path).await {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }

        data.persist(self.data_path(key))
            .map_err(|err| CacheStoreError::Io(err.error))?;

        let metadata = CacheEntryMetadata {
            key: key.clone(),
            content_type: entry.content_type,
            created_at: OffsetDateTime::now_utc(),
            source_fingerprint: entry.source_fingerprint,
            length,
        };
        let encoded =
            serde_json::to_vec(&metadata).map_err(|err| CacheStoreError::Backend(err.to_string()))?;
        let (meta, _) = write_temp(&dir, stream::once(encoded.into())).await?;
        meta.persist(&meta_path)
            .map_err(|err| CacheStoreError::Io(err.error))?;

        debug!(
            target = "cache::physical",
            op = "write",
            result = "ok",
            cache_key = %key,
            bytes = length,
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            "Published cache entry"
        );

        Ok(metadata)
    }
}

/// Stream `body` into a synced temporary file in `dir`.
///
/// The file is deleted if any step fails or the returned path is dropped
/// without being persisted.
async fn write_temp(dir: &Path, mut body: ByteStream) -> Result<(TempPath, u64), CacheStoreError> {
    let temp = tempfile::Builder::new()
        .prefix(TEMP_PREFIX)
        .tempfile_in(dir)?;
    let (file, path) = temp.into_parts();
    let mut file = fs::File::from_std(file);

    let mut length = 0u64;
    while let Some(chunk) = body.next().await {
        let chunk = chunk?;
        length += chunk.len() as u64;
        file.write_all(&chunk).await?;
    }
    file.flush().await?;
    file.sync_all().await?;
    drop(file);

    Ok((path, length))
}
