//! End-to-end resolution of derived images.
//!
//! normalize → resolve source → derive key → cache lookup → (leased transform →
//! cache write) → response metadata.

use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use time::{Duration, OffsetDateTime};
use tracing::{debug, warn};

use crate::application::normalizer::CommandNormalizer;
use crate::application::response::{ResponseHeaders, ResponseMetadataBuilder};
use crate::application::sources::{ProviderError, ResolvedSource, SourceProviderRegistry};
use crate::application::stream::{self, ByteStream};
use crate::application::transform::{ImageTransformer, TransformError, TransformedImage};
use crate::cache::{
    CacheConfig, CacheEntryMetadata, CacheKey, CacheKeyGenerator, CacheStore, ConcurrencyGate,
    NewCacheEntry,
};
use crate::domain::{CommandSet, Fingerprint};

pub const CACHE_HIT_TOTAL: &str = "pixcache_cache_hit_total";
pub const CACHE_MISS_TOTAL: &str = "pixcache_cache_miss_total";
pub const CACHE_STALE_TOTAL: &str = "pixcache_cache_stale_total";
pub const CACHE_WRITE_FAILURE_TOTAL: &str = "pixcache_cache_write_failure_total";
pub const TRANSFORM_TOTAL: &str = "pixcache_transform_total";
pub const TRANSFORM_FAILURE_TOTAL: &str = "pixcache_transform_failure_total";
pub const TRANSFORM_MS: &str = "pixcache_transform_ms";

const TARGET: &str = "application::pipeline";

/// Every way a request can fail once it reaches the pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("no source image for `{path}`")]
    NotFound { path: String },
    #[error("source could not be read")]
    Source(#[source] ProviderError),
    #[error("image transformation failed")]
    Transform(#[source] TransformError),
}

impl PipelineError {
    fn not_found(path: &str) -> Self {
        Self::NotFound {
            path: path.to_string(),
        }
    }
}

/// Whether the artifact came from the store or was produced for this request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    Hit,
    Miss,
}

impl CacheOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            CacheOutcome::Hit => "hit",
            CacheOutcome::Miss => "miss",
        }
    }
}

/// A servable derived image.
pub struct ImageResponse {
    pub body: ByteStream,
    pub content_type: String,
    pub headers: ResponseHeaders,
    pub cache_key: CacheKey,
    pub outcome: CacheOutcome,
    pub length: u64,
}

impl std::fmt::Debug for ImageResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageResponse")
            .field("content_type", &self.content_type)
            .field("headers", &self.headers)
            .field("cache_key", &self.cache_key)
            .field("outcome", &self.outcome)
            .field("length", &self.length)
            .finish_non_exhaustive()
    }
}

type CommandsHook = Arc<dyn Fn(&mut CommandSet) + Send + Sync>;
type ProcessedHook = Arc<dyn Fn(&mut TransformedImage) + Send + Sync>;
type BeforeSaveHook = Arc<dyn Fn(&CacheKey, &TransformedImage) + Send + Sync>;
type ResponseHook = Arc<dyn Fn(&mut ResponseHeaders) + Send + Sync>;

/// Optional synchronous callbacks run at fixed points of the pipeline.
///
/// | hook | runs | may change |
/// |------|------|------------|
/// | `on_parse_commands` | after normalization, before source resolution | the command set the key is derived from |
/// | `on_processed` | after a successful transform, before the cache write | bytes and content type |
/// | `on_before_save` | immediately before the cache write | nothing |
/// | `on_prepare_response` | after headers are built, hits and misses alike | header values |
#[derive(Clone, Default)]
pub struct PipelineHooks {
    parse_commands: Option<CommandsHook>,
    processed: Option<ProcessedHook>,
    before_save: Option<BeforeSaveHook>,
    prepare_response: Option<ResponseHook>,
}

impl PipelineHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_parse_commands(
        mut self,
        hook: impl Fn(&mut CommandSet) + Send + Sync + 'static,
    ) -> Self {
        self.parse_commands = Some(Arc::new(hook));
        self
    }

    pub fn on_processed(
        mut self,
        hook: impl Fn(&mut TransformedImage) + Send + Sync + 'static,
    ) -> Self {
        self.processed = Some(Arc::new(hook));
        self
    }

    pub fn on_before_save(
        mut self,
        hook: impl Fn(&CacheKey, &TransformedImage) + Send + Sync + 'static,
    ) -> Self {
        self.before_save = Some(Arc::new(hook));
        self
    }

    pub fn on_prepare_response(
        mut self,
        hook: impl Fn(&mut ResponseHeaders) + Send + Sync + 'static,
    ) -> Self {
        self.prepare_response = Some(Arc::new(hook));
        self
    }
}

impl std::fmt::Debug for PipelineHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineHooks")
            .field("on_parse_commands", &self.parse_commands.is_some())
            .field("on_processed", &self.processed.is_some())
            .field("on_before_save", &self.before_save.is_some())
            .field("on_prepare_response", &self.prepare_response.is_some())
            .finish()
    }
}

/// Collaborators the orchestrator is assembled from.
pub struct PipelineComponents {
    pub normalizer: CommandNormalizer,
    pub sources: SourceProviderRegistry,
    pub cache: Arc<dyn CacheStore>,
    pub transformer: Arc<dyn ImageTransformer>,
    pub hooks: PipelineHooks,
}

#[derive(Clone)]
pub struct PipelineOrchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    normalizer: CommandNormalizer,
    sources: SourceProviderRegistry,
    keys: CacheKeyGenerator,
    cache: Arc<dyn CacheStore>,
    gate: ConcurrencyGate,
    transformer: Arc<dyn ImageTransformer>,
    responses: ResponseMetadataBuilder,
    max_cache_age: Duration,
    hooks: PipelineHooks,
}

impl PipelineOrchestrator {
    pub fn new(components: PipelineComponents, config: &CacheConfig) -> Self {
        let PipelineComponents {
            normalizer,
            sources,
            cache,
            transformer,
            hooks,
        } = components;

        Self {
            inner: Arc::new(Inner {
                normalizer,
                sources,
                keys: config.key_generator(),
                cache,
                gate: ConcurrencyGate::new(),
                transformer,
                responses: ResponseMetadataBuilder::new(
                    config.max_browser_cache_age,
                    config.max_cache_age,
                ),
                max_cache_age: config.max_cache_age,
                hooks,
            }),
        }
    }

    /// Serve `path` transformed by the given request parameters.
    pub async fn handle<I, K, V>(
        &self,
        path: &str,
        parameters: I,
    ) -> Result<ImageResponse, PipelineError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let commands = self.inner.parse_commands(self.inner.normalizer.normalize(parameters));
        self.serve(path, commands).await
    }

    /// Serve `path` with commands taken from a raw query string.
    pub async fn handle_query(
        &self,
        path: &str,
        query: Option<&str>,
    ) -> Result<ImageResponse, PipelineError> {
        let commands = self.inner.parse_commands(
            self.inner
                .normalizer
                .normalize_query(query.unwrap_or_default()),
        );
        self.serve(path, commands).await
    }

    /// The key a request would be served under. Resolves source metadata only.
    pub async fn cache_key_for_query(
        &self,
        path: &str,
        query: Option<&str>,
    ) -> Result<CacheKey, PipelineError> {
        let commands = self.inner.parse_commands(
            self.inner
                .normalizer
                .normalize_query(query.unwrap_or_default()),
        );
        let (_, key) = self.inner.resolve(path, &commands).await?;
        Ok(key)
    }

    /// Keys currently being populated or waited on.
    pub fn in_flight(&self) -> usize {
        self.inner.gate.in_flight()
    }

    async fn serve(
        &self,
        path: &str,
        commands: CommandSet,
    ) -> Result<ImageResponse, PipelineError> {
        let (resolved, key) = self.inner.resolve(path, &commands).await?;

        if let Some((metadata, body)) = self
            .inner
            .lookup(&key, &resolved.descriptor.fingerprint)
            .await
        {
            metrics::counter!(CACHE_HIT_TOTAL).increment(1);
            debug!(
                target = TARGET,
                op = "serve",
                result = "hit",
                path,
                cache_key = %key,
                "Serving cached artifact"
            );
            return Ok(self.inner.respond(metadata, body, CacheOutcome::Hit));
        }

        metrics::counter!(CACHE_MISS_TOTAL).increment(1);
        debug!(
            target = TARGET,
            op = "serve",
            result = "miss",
            path,
            cache_key = %key,
            "Cache miss"
        );

        // The population task owns the lease, so a dropped request cannot
        // abandon a half-finished transform.
        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(async move { inner.populate(resolved, commands, key).await });
        match task.await {
            Ok(result) => result,
            Err(err) => Err(PipelineError::Transform(TransformError::Failed(format!(
                "population task did not complete: {err}"
            )))),
        }
    }
}

impl Inner {
    fn parse_commands(&self, mut commands: CommandSet) -> CommandSet {
        if let Some(hook) = &self.hooks.parse_commands {
            hook(&mut commands);
        }
        commands
    }

    async fn resolve(
        &self,
        path: &str,
        commands: &CommandSet,
    ) -> Result<(ResolvedSource, CacheKey), PipelineError> {
        let resolved = self
            .sources
            .resolve(path)
            .await
            .map_err(PipelineError::Source)?
            .ok_or_else(|| PipelineError::not_found(path))?;
        let key = self.keys.derive(&resolved.descriptor, commands);
        Ok((resolved, key))
    }

    /// A fresh entry for `key` together with its body, or `None`.
    ///
    /// Store failures are reported as a miss.
    async fn lookup(
        &self,
        key: &CacheKey,
        fingerprint: &Fingerprint,
    ) -> Option<(CacheEntryMetadata, ByteStream)> {
        let (metadata, body) = match self.cache.open_entry(key).await {
            Ok(Some(entry)) => entry,
            Ok(None) => return None,
            Err(err) => {
                warn!(
                    target = TARGET,
                    op = "lookup",
                    result = "read_error",
                    cache_key = %key,
                    error = %err,
                    "Failed to read cached artifact; treating as miss"
                );
                return None;
            }
        };

        if !self.is_fresh(&metadata, fingerprint, OffsetDateTime::now_utc()) {
            metrics::counter!(CACHE_STALE_TOTAL).increment(1);
            debug!(
                target = TARGET,
                op = "lookup",
                result = "stale",
                cache_key = %key,
                created_at = %metadata.created_at,
                "Cached artifact is stale"
            );
            return None;
        }

        Some((metadata, body))
    }

    fn is_fresh(
        &self,
        metadata: &CacheEntryMetadata,
        fingerprint: &Fingerprint,
        now: OffsetDateTime,
    ) -> bool {
        metadata.source_fingerprint == *fingerprint
            && now - metadata.created_at < self.max_cache_age
    }

    async fn populate(
        &self,
        resolved: ResolvedSource,
        commands: CommandSet,
        key: CacheKey,
    ) -> Result<ImageResponse, PipelineError> {
        let lease = self.gate.acquire(&key).await;
        let fingerprint = resolved.descriptor.fingerprint;

        // Whoever held the lease before us has probably just written the entry.
        if let Some((metadata, body)) = self.lookup(&key, &fingerprint).await {
            lease.release();
            metrics::counter!(CACHE_HIT_TOTAL).increment(1);
            debug!(
                target = TARGET,
                op = "populate",
                result = "hit_after_wait",
                cache_key = %key,
                "Artifact populated by concurrent request"
            );
            return Ok(self.respond(metadata, body, CacheOutcome::Hit));
        }

        let started_at = Instant::now();
        metrics::counter!(TRANSFORM_TOTAL).increment(1);
        let mut image = match self.transform(&resolved, &commands).await {
            Ok(image) => image,
            Err(err) => {
                metrics::counter!(TRANSFORM_FAILURE_TOTAL).increment(1);
                warn!(
                    target = TARGET,
                    op = "populate",
                    result = "error",
                    path = %resolved.descriptor.path,
                    cache_key = %key,
                    elapsed_ms = started_at.elapsed().as_millis() as u64,
                    error = %err,
                    "Failed to produce derived image"
                );
                return Err(err);
            }
        };
        let elapsed = started_at.elapsed();
        metrics::histogram!(TRANSFORM_MS).record(elapsed.as_secs_f64() * 1000.0);

        if let Some(hook) = &self.hooks.processed {
            hook(&mut image);
        }
        if let Some(hook) = &self.hooks.before_save {
            hook(&key, &image);
        }

        let entry = NewCacheEntry {
            content_type: image.content_type.clone(),
            source_fingerprint: fingerprint,
        };
        let metadata = match self
            .cache
            .write(&key, stream::once(image.bytes.clone()), entry)
            .await
        {
            Ok(metadata) => metadata,
            Err(err) => {
                metrics::counter!(CACHE_WRITE_FAILURE_TOTAL).increment(1);
                warn!(
                    target = TARGET,
                    op = "populate",
                    result = "write_error",
                    cache_key = %key,
                    error = %err,
                    "Failed to store derived image; serving uncached"
                );
                CacheEntryMetadata {
                    key: key.clone(),
                    content_type: image.content_type.clone(),
                    created_at: OffsetDateTime::now_utc(),
                    source_fingerprint: fingerprint,
                    length: image.bytes.len() as u64,
                }
            }
        };
        lease.release();

        debug!(
            target = TARGET,
            op = "populate",
            result = "ok",
            path = %resolved.descriptor.path,
            cache_key = %key,
            bytes = metadata.length,
            elapsed_ms = elapsed.as_millis() as u64,
            "Derived image produced"
        );

        Ok(self.respond(metadata, stream::once(image.bytes), CacheOutcome::Miss))
    }

    async fn transform(
        &self,
        resolved: &ResolvedSource,
        commands: &CommandSet,
    ) -> Result<TransformedImage, PipelineError> {
        let source = resolved
            .open()
            .await
            .map_err(PipelineError::Source)?
            .ok_or_else(|| PipelineError::not_found(&resolved.descriptor.path))?;
        let output = self
            .transformer
            .transform(source, commands)
            .await
            .map_err(PipelineError::Transform)?;
        let bytes = stream::collect(output.body)
            .await
            .map_err(|err| PipelineError::Transform(TransformError::Io(err)))?;

        Ok(TransformedImage {
            bytes,
            content_type: output.content_type,
        })
    }

    fn respond(
        &self,
        metadata: CacheEntryMetadata,
        body: ByteStream,
        outcome: CacheOutcome,
    ) -> ImageResponse {
        let mut headers = self.responses.build(&metadata, OffsetDateTime::now_utc());
        if let Some(hook) = &self.hooks.prepare_response {
            hook(&mut headers);
        }

        ImageResponse {
            body,
            content_type: metadata.content_type,
            headers,
            cache_key: metadata.key,
            outcome,
            length: metadata.length,
        }
    }
}
