//! Source images served from a local directory.

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::fs;

use crate::application::sources::{ProviderError, SourceProvider};
use crate::application::stream::{self, ByteStream};
use crate::domain::{Fingerprint, SourceMetadata};

pub const NAME: &str = "filesystem";

/// Claims every logical path with an image file extension and resolves it
/// below `root`.
#[derive(Debug, Clone)]
pub struct FileSystemProvider {
    root: PathBuf,
}

impl FileSystemProvider {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a logical path below the root, refusing anything that could escape it.
    fn resolve(&self, path: &str) -> Option<PathBuf> {
        let relative = Path::new(path.trim_start_matches('/'));
        if relative.as_os_str().is_empty()
            || relative.components().any(|component| {
                matches!(
                    component,
                    Component::ParentDir | Component::RootDir | Component::Prefix(_)
                )
            })
        {
            return None;
        }
        Some(self.root.join(relative))
    }
}

fn image_type(path: &str) -> Option<String> {
    mime_guess::from_path(path)
        .first()
        .filter(|mime| mime.type_() == mime_guess::mime::IMAGE)
        .map(|mime| mime.essence_str().to_string())
}

#[async_trait]
impl SourceProvider for FileSystemProvider {
    fn name(&self) -> &str {
        NAME
    }

    fn matches(&self, path: &str) -> bool {
        image_type(path).is_some() && self.resolve(path).is_some()
    }

    async fn metadata(&self, path: &str) -> Result<Option<SourceMetadata>, ProviderError> {
        let Some(absolute) = self.resolve(path) else {
            return Ok(None);
        };

        let metadata = match fs::metadata(&absolute).await {
            Ok(metadata) if metadata.is_file() => metadata,
            Ok(_) => return Ok(None),
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        let last_modified = OffsetDateTime::from(metadata.modified()?);
        Ok(Some(SourceMetadata {
            fingerprint: Fingerprint::new(last_modified, metadata.len()),
            content_type: image_type(path),
        }))
    }

    async fn open_read(&self, path: &str) -> Result<Option<ByteStream>, ProviderError> {
        let Some(absolute) = self.resolve(path) else {
            return Ok(None);
        };

        match fs::File::open(&absolute).await {
            Ok(file) => Ok(Some(stream::from_reader(file))),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, SystemTime};

    use bytes::Bytes;
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn claims_only_image_paths_inside_root() {
        let provider = FileSystemProvider::new("/srv/images");

        assert!(provider.matches("/photo.jpg"));
        assert!(provider.matches("/nested/dir/icon.PNG"));
        assert!(!provider.matches("/notes.txt"));
        assert!(!provider.matches("/no-extension"));
        assert!(!provider.matches("/../secret.png"));
        assert!(!provider.matches("/a/../../b.png"));
    }

    #[tokio::test]
    async fn metadata_reports_mtime_and_length() {
        let dir = TempDir::new().expect("temp dir");
        std::fs::write(dir.path().join("photo.jpg"), b"12345").expect("write");
        let provider = FileSystemProvider::new(dir.path());

        let metadata = provider
            .metadata("/photo.jpg")
            .await
            .expect("metadata")
            .expect("found");

        assert_eq!(metadata.fingerprint.length, 5);
        assert_eq!(metadata.content_type.as_deref(), Some("image/jpeg"));

        let body = provider
            .open_read("/photo.jpg")
            .await
            .expect("open")
            .expect("found");
        assert_eq!(
            stream::collect(body).await.expect("collect"),
            Bytes::from_static(b"12345")
        );
    }

    #[tokio::test]
    async fn touching_the_file_changes_the_fingerprint() {
        let dir = TempDir::new().expect("temp dir");
        let file = dir.path().join("photo.jpg");
        std::fs::write(&file, b"12345").expect("write");
        let provider = FileSystemProvider::new(dir.path());

        let before = provider
            .metadata("/photo.jpg")
            .await
            .expect("metadata")
            .expect("found");

        let handle = std::fs::File::options()
            .write(true)
            .open(&file)
            .expect("open");
        handle
            .set_modified(SystemTime::now() + Duration::from_secs(60))
            .expect("set mtime");

        let after = provider
            .metadata("/photo.jpg")
            .await
            .expect("metadata")
            .expect("found");
        assert_ne!(before.fingerprint, after.fingerprint);
        assert_eq!(before.fingerprint.length, after.fingerprint.length);
    }

    #[tokio::test]
    async fn missing_files_and_directories_are_not_found() {
        let dir = TempDir::new().expect("temp dir");
        std::fs::create_dir(dir.path().join("folder.png")).expect("mkdir");
        let provider = FileSystemProvider::new(dir.path());

        assert!(provider.metadata("/absent.png").await.expect("metadata").is_none());
        assert!(provider.metadata("/folder.png").await.expect("metadata").is_none());
        assert!(provider.open_read("/absent.png").await.expect("open").is_none());
    }
}
