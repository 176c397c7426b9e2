use std::fs::{self, File};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration as StdDuration, SystemTime};

use async_trait::async_trait;
use bytes::Bytes;
use pixcache::application::pipeline::{
    CacheOutcome, PipelineComponents, PipelineError, PipelineHooks, PipelineOrchestrator,
};
use pixcache::application::normalizer::CommandNormalizer;
use pixcache::application::sources::{SourceProvider, SourceProviderRegistry};
use pixcache::application::stream::{self, ByteStream};
use pixcache::application::transform::{ImageTransformer, TransformError, TransformOutput};
use pixcache::cache::{
    CacheConfig, CacheEntryMetadata, CacheKey, CacheStore, CacheStoreError, MemoryCache,
    NewCacheEntry, PhysicalFileSystemCache,
};
use pixcache::domain::CommandSet;
use pixcache::domain::processors::BUILTIN_PROCESSORS;
use pixcache::infra::providers::FileSystemProvider;
use tempfile::TempDir;
use time::{Duration, OffsetDateTime};

/// Echoes the source with the canonical command string appended.
#[derive(Default)]
struct RecordingTransformer {
    calls: AtomicUsize,
    fail: AtomicBool,
    delay: Option<StdDuration>,
}

impl RecordingTransformer {
    fn slow(delay: StdDuration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageTransformer for RecordingTransformer {
    async fn transform(
        &self,
        source: ByteStream,
        commands: &CommandSet,
    ) -> Result<TransformOutput, TransformError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(TransformError::Failed("decoder crashed".to_string()));
        }

        let mut bytes = stream::collect(source).await?.to_vec();
        bytes.extend_from_slice(b"|");
        bytes.extend_from_slice(commands.canonical().as_bytes());
        Ok(TransformOutput {
            body: stream::once(Bytes::from(bytes)),
            content_type: "image/webp".to_string(),
        })
    }
}

/// Never stores anything.
struct BrokenStore;

#[async_trait]
impl CacheStore for BrokenStore {
    async fn exists(&self, _key: &CacheKey) -> Result<bool, CacheStoreError> {
        Ok(false)
    }

    async fn metadata(
        &self,
        _key: &CacheKey,
    ) -> Result<Option<CacheEntryMetadata>, CacheStoreError> {
        Ok(None)
    }

    async fn open_read(&self, _key: &CacheKey) -> Result<Option<ByteStream>, CacheStoreError> {
        Ok(None)
    }

    async fn write(
        &self,
        _key: &CacheKey,
        _body: ByteStream,
        _entry: NewCacheEntry,
    ) -> Result<CacheEntryMetadata, CacheStoreError> {
        Err(CacheStoreError::Backend("disk full".to_string()))
    }
}

struct Fixture {
    sources: TempDir,
    _cache_dir: TempDir,
    pipeline: PipelineOrchestrator,
    transformer: Arc<RecordingTransformer>,
}

fn write_source(root: &Path, name: &str, contents: &[u8]) {
    fs::write(root.join(name), contents).expect("write source image");
}

fn set_mtime(path: &Path, when: SystemTime) {
    File::options()
        .write(true)
        .open(path)
        .expect("open source")
        .set_modified(when)
        .expect("set mtime");
}

fn orchestrator(
    sources: &Path,
    cache: Arc<dyn CacheStore>,
    transformer: Arc<RecordingTransformer>,
) -> PipelineOrchestrator {
    let provider: Arc<dyn SourceProvider> = Arc::new(FileSystemProvider::new(sources));
    PipelineOrchestrator::new(
        PipelineComponents {
            normalizer: CommandNormalizer::new(BUILTIN_PROCESSORS),
            sources: SourceProviderRegistry::new(vec![provider]),
            cache,
            transformer,
            hooks: PipelineHooks::new(),
        },
        &CacheConfig::default(),
    )
}

fn fixture(transformer: RecordingTransformer) -> Fixture {
    let sources = TempDir::new().expect("source dir");
    let cache_dir = TempDir::new().expect("cache dir");
    write_source(sources.path(), "photo.jpg", b"original");

    let cache: Arc<dyn CacheStore> = Arc::new(
        PhysicalFileSystemCache::new(cache_dir.path(), 2).expect("cache should initialize"),
    );
    let transformer = Arc::new(transformer);
    let pipeline = orchestrator(sources.path(), cache, Arc::clone(&transformer));

    Fixture {
        sources,
        _cache_dir: cache_dir,
        pipeline,
        transformer,
    }
}

#[tokio::test]
async fn equivalent_requests_share_one_artifact() {
    let fx = fixture(RecordingTransformer::default());

    let first = fx
        .pipeline
        .handle_query("/photo.jpg", Some("width=300&format=webp"))
        .await
        .expect("first request");
    assert_eq!(first.outcome, CacheOutcome::Miss);
    assert_eq!(first.content_type, "image/webp");
    let first_key = first.cache_key.clone();
    let body = stream::collect(first.body).await.expect("body");
    assert_eq!(body, Bytes::from_static(b"original|format=webp&width=300"));

    let second = fx
        .pipeline
        .handle_query("/photo.jpg", Some("FORMAT=webp&utm_source=mail&width=300"))
        .await
        .expect("second request");
    assert_eq!(second.outcome, CacheOutcome::Hit);
    assert_eq!(second.cache_key, first_key);
    assert_eq!(second.length, body.len() as u64);
    assert_eq!(
        stream::collect(second.body).await.expect("cached body"),
        body
    );
    assert_eq!(fx.transformer.calls(), 1);
}

#[tokio::test]
async fn source_change_produces_a_new_key() {
    let fx = fixture(RecordingTransformer::default());
    let path = fx.sources.path().join("photo.jpg");
    set_mtime(&path, SystemTime::UNIX_EPOCH + StdDuration::from_secs(1_700_000_000));

    let before = fx
        .pipeline
        .handle_query("/photo.jpg", Some("width=300&format=webp"))
        .await
        .expect("before change");

    write_source(fx.sources.path(), "photo.jpg", b"replaced");
    set_mtime(&path, SystemTime::UNIX_EPOCH + StdDuration::from_secs(1_700_000_600));

    let after = fx
        .pipeline
        .handle_query("/photo.jpg", Some("width=300&format=webp"))
        .await
        .expect("after change");

    assert_ne!(after.cache_key, before.cache_key);
    assert_eq!(after.outcome, CacheOutcome::Miss);
    assert_eq!(
        stream::collect(after.body).await.expect("body"),
        Bytes::from_static(b"replaced|format=webp&width=300")
    );
    assert_eq!(fx.transformer.calls(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_misses_transform_once() {
    let fx = fixture(RecordingTransformer::slow(StdDuration::from_millis(100)));

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let pipeline = fx.pipeline.clone();
        tasks.push(tokio::spawn(async move {
            let response = pipeline
                .handle_query("/photo.jpg", Some("width=64"))
                .await
                .expect("request should succeed");
            let outcome = response.outcome;
            let body = stream::collect(response.body).await.expect("body");
            (outcome, body)
        }));
    }

    let mut misses = 0;
    for task in tasks {
        let (outcome, body) = task.await.expect("task should not panic");
        if outcome == CacheOutcome::Miss {
            misses += 1;
        }
        assert_eq!(body, Bytes::from_static(b"original|width=64"));
    }

    assert_eq!(fx.transformer.calls(), 1);
    assert_eq!(misses, 1);
    assert_eq!(fx.pipeline.in_flight(), 0);
}

#[tokio::test]
async fn failed_transform_releases_the_key() {
    let fx = fixture(RecordingTransformer::default());
    fx.transformer.fail.store(true, Ordering::SeqCst);

    let failed = fx.pipeline.handle_query("/photo.jpg", Some("width=10")).await;
    assert!(matches!(failed, Err(PipelineError::Transform(_))));
    assert_eq!(fx.pipeline.in_flight(), 0);

    fx.transformer.fail.store(false, Ordering::SeqCst);
    let retried = fx
        .pipeline
        .handle_query("/photo.jpg", Some("width=10"))
        .await
        .expect("retry should succeed");

    assert_eq!(retried.outcome, CacheOutcome::Miss);
    assert_eq!(fx.transformer.calls(), 2);
}

#[tokio::test]
async fn missing_source_never_reaches_the_transformer() {
    let fx = fixture(RecordingTransformer::default());

    let result = fx.pipeline.handle_query("/absent.jpg", Some("width=10")).await;

    assert!(matches!(result, Err(PipelineError::NotFound { .. })));
    assert_eq!(fx.transformer.calls(), 0);
}

#[tokio::test]
async fn entries_past_max_cache_age_are_rebuilt() {
    let sources = TempDir::new().expect("source dir");
    write_source(sources.path(), "photo.jpg", b"original");
    let memory = Arc::new(MemoryCache::new(8));
    let transformer = Arc::new(RecordingTransformer::default());
    let pipeline = orchestrator(
        sources.path(),
        memory.clone(),
        Arc::clone(&transformer),
    );

    let fingerprint = FileSystemProvider::new(sources.path())
        .metadata("/photo.jpg")
        .await
        .expect("metadata")
        .expect("source exists")
        .fingerprint;
    let key = pipeline
        .cache_key_for_query("/photo.jpg", Some("width=10"))
        .await
        .expect("key");
    let max_age = CacheConfig::default().max_cache_age;

    memory.put(
        CacheEntryMetadata {
            key: key.clone(),
            content_type: "image/webp".to_string(),
            created_at: OffsetDateTime::now_utc() - max_age - Duration::days(1),
            source_fingerprint: fingerprint,
            length: 3,
        },
        Bytes::from_static(b"old"),
    );

    let rebuilt = pipeline
        .handle_query("/photo.jpg", Some("width=10"))
        .await
        .expect("rebuilt");
    assert_eq!(rebuilt.outcome, CacheOutcome::Miss);
    assert_eq!(transformer.calls(), 1);

    memory.put(
        CacheEntryMetadata {
            key: key.clone(),
            content_type: "image/webp".to_string(),
            created_at: OffsetDateTime::now_utc() - Duration::days(1),
            source_fingerprint: fingerprint,
            length: 5,
        },
        Bytes::from_static(b"fresh"),
    );

    let hit = pipeline
        .handle_query("/photo.jpg", Some("width=10"))
        .await
        .expect("hit");
    assert_eq!(hit.outcome, CacheOutcome::Hit);
    assert_eq!(
        stream::collect(hit.body).await.expect("body"),
        Bytes::from_static(b"fresh")
    );
    assert_eq!(transformer.calls(), 1);
}

#[tokio::test]
async fn cache_write_failure_still_serves_the_image() {
    let sources = TempDir::new().expect("source dir");
    write_source(sources.path(), "photo.jpg", b"original");
    let transformer = Arc::new(RecordingTransformer::default());
    let pipeline = orchestrator(
        sources.path(),
        Arc::new(BrokenStore),
        Arc::clone(&transformer),
    );

    for _ in 0..2 {
        let response = pipeline
            .handle_query("/photo.jpg", Some("quality=80"))
            .await
            .expect("served without caching");
        assert_eq!(response.outcome, CacheOutcome::Miss);
        assert_eq!(
            stream::collect(response.body).await.expect("body"),
            Bytes::from_static(b"original|quality=80")
        );
    }

    assert_eq!(transformer.calls(), 2);
    assert_eq!(pipeline.in_flight(), 0);
}

#[tokio::test]
async fn abandoned_request_still_populates_the_cache() {
    let fx = fixture(RecordingTransformer::slow(StdDuration::from_millis(200)));

    let request = {
        let pipeline = fx.pipeline.clone();
        tokio::spawn(async move { pipeline.handle_query("/photo.jpg", Some("width=48")).await })
    };
    while fx.transformer.calls() == 0 {
        tokio::time::sleep(StdDuration::from_millis(5)).await;
    }
    request.abort();
    assert!(request.await.is_err_and(|err| err.is_cancelled()));

    tokio::time::timeout(StdDuration::from_secs(5), async {
        while fx.pipeline.in_flight() > 0 {
            tokio::time::sleep(StdDuration::from_millis(5)).await;
        }
    })
    .await
    .expect("population should finish without its caller");

    let next = fx
        .pipeline
        .handle_query("/photo.jpg", Some("width=48"))
        .await
        .expect("next request");
    assert_eq!(next.outcome, CacheOutcome::Hit);
    assert_eq!(
        stream::collect(next.body).await.expect("body"),
        Bytes::from_static(b"original|width=48")
    );
    assert_eq!(fx.transformer.calls(), 1);
}
