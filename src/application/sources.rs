//! Source provider contract and the ordered registry that selects between providers.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use crate::application::stream::ByteStream;
use crate::domain::{SourceDescriptor, SourceMetadata};

/// Errors raised by a provider while inspecting or reading a source.
///
/// A missing source is not an error; providers report it as `Ok(None)`.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("remote origin returned status {status} for `{url}`")]
    RemoteStatus { status: u16, url: String },
    #[error("remote origin request failed: {message}")]
    Remote { message: String },
}

impl ProviderError {
    pub fn remote(message: impl std::fmt::Display) -> Self {
        Self::Remote {
            message: message.to_string(),
        }
    }
}

/// Capability set every source backend implements.
#[async_trait]
pub trait SourceProvider: Send + Sync {
    /// Identifier recorded in [`SourceDescriptor::provider`] and folded into cache keys.
    fn name(&self) -> &str;

    /// Whether this provider claims the logical path. Must not perform I/O.
    fn matches(&self, path: &str) -> bool;

    /// Existence and fingerprint, without reading the content.
    async fn metadata(&self, path: &str) -> Result<Option<SourceMetadata>, ProviderError>;

    /// Open the source bytes for reading.
    async fn open_read(&self, path: &str) -> Result<Option<ByteStream>, ProviderError>;
}

/// A source located by the registry together with the provider that owns it.
#[derive(Clone)]
pub struct ResolvedSource {
    pub descriptor: SourceDescriptor,
    pub metadata: SourceMetadata,
    provider: Arc<dyn SourceProvider>,
}

impl ResolvedSource {
    /// Open the source stream through the provider that resolved it.
    pub async fn open(&self) -> Result<Option<ByteStream>, ProviderError> {
        self.provider.open_read(&self.descriptor.path).await
    }
}

impl std::fmt::Debug for ResolvedSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedSource")
            .field("descriptor", &self.descriptor)
            .field("metadata", &self.metadata)
            .finish()
    }
}

/// Ordered list of providers; the first provider that claims a path wins.
///
/// Order expresses precedence and is fixed at construction.
#[derive(Clone, Default)]
pub struct SourceProviderRegistry {
    providers: Vec<Arc<dyn SourceProvider>>,
}

impl SourceProviderRegistry {
    pub fn new(providers: Vec<Arc<dyn SourceProvider>>) -> Self {
        Self { providers }
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// The first provider claiming `path`, if any.
    pub fn provider_for(&self, path: &str) -> Option<&Arc<dyn SourceProvider>> {
        self.providers.iter().find(|provider| provider.matches(path))
    }

    /// Resolve metadata for `path`. `Ok(None)` means no provider claims it or
    /// the claiming provider cannot find it.
    pub async fn resolve(&self, path: &str) -> Result<Option<ResolvedSource>, ProviderError> {
        let Some(provider) = self.provider_for(path) else {
            debug!(
                target = "application::sources",
                path,
                result = "unclaimed",
                "no provider claims path"
            );
            return Ok(None);
        };

        let Some(metadata) = provider.metadata(path).await? else {
            debug!(
                target = "application::sources",
                path,
                provider = provider.name(),
                result = "not_found",
                "provider could not find source"
            );
            return Ok(None);
        };

        Ok(Some(ResolvedSource {
            descriptor: SourceDescriptor {
                path: path.to_string(),
                provider: provider.name().to_string(),
                fingerprint: metadata.fingerprint,
            },
            metadata,
            provider: Arc::clone(provider),
        }))
    }

    /// Resolve `path` and open its stream in one step.
    pub async fn resolve_stream(
        &self,
        path: &str,
    ) -> Result<Option<(SourceDescriptor, ByteStream)>, ProviderError> {
        let Some(resolved) = self.resolve(path).await? else {
            return Ok(None);
        };
        Ok(resolved
            .open()
            .await?
            .map(|stream| (resolved.descriptor, stream)))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use bytes::Bytes;
    use time::OffsetDateTime;

    use super::*;
    use crate::application::stream::{self, collect};
    use crate::domain::Fingerprint;

    struct StaticProvider {
        name: &'static str,
        prefix: &'static str,
        found: bool,
        metadata_calls: AtomicUsize,
    }

    impl StaticProvider {
        fn new(name: &'static str, prefix: &'static str, found: bool) -> Self {
            Self {
                name,
                prefix,
                found,
                metadata_calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl SourceProvider for StaticProvider {
        fn name(&self) -> &str {
            self.name
        }

        fn matches(&self, path: &str) -> bool {
            path.starts_with(self.prefix)
        }

        async fn metadata(&self, _path: &str) -> Result<Option<SourceMetadata>, ProviderError> {
            self.metadata_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.found.then(|| SourceMetadata {
                fingerprint: Fingerprint::new(OffsetDateTime::UNIX_EPOCH, 3),
                content_type: None,
            }))
        }

        async fn open_read(&self, _path: &str) -> Result<Option<ByteStream>, ProviderError> {
            Ok(self
                .found
                .then(|| stream::once(Bytes::from(self.name.as_bytes().to_vec()))))
        }
    }

    #[tokio::test]
    async fn first_matching_provider_wins() {
        let first = Arc::new(StaticProvider::new("first", "/", true));
        let second = Arc::new(StaticProvider::new("second", "/", true));
        let registry = SourceProviderRegistry::new(vec![
            first.clone() as Arc<dyn SourceProvider>,
            second.clone(),
        ]);

        let (descriptor, body) = registry
            .resolve_stream("/photo.jpg")
            .await
            .expect("resolve")
            .expect("found");

        assert_eq!(descriptor.provider, "first");
        assert_eq!(
            collect(body).await.expect("body"),
            Bytes::from_static(b"first")
        );
        assert_eq!(second.metadata_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn claimed_but_missing_is_not_found_without_fallthrough() {
        let claiming = Arc::new(StaticProvider::new("fs", "/", false));
        let fallback = Arc::new(StaticProvider::new("remote", "/", true));
        let registry = SourceProviderRegistry::new(vec![
            claiming as Arc<dyn SourceProvider>,
            fallback.clone(),
        ]);

        let resolved = registry.resolve("/missing.png").await.expect("resolve");

        assert!(resolved.is_none());
        assert_eq!(fallback.metadata_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unclaimed_path_is_not_found() {
        let remote: Arc<dyn SourceProvider> = Arc::new(StaticProvider::new("remote", "/cdn", true));
        let registry = SourceProviderRegistry::new(vec![remote]);

        assert!(registry.provider_for("/local.png").is_none());
        assert!(registry.resolve("/local.png").await.expect("resolve").is_none());
    }
}
