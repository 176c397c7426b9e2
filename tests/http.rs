use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode, header},
};
use http_body_util::BodyExt;
use pixcache::application::normalizer::CommandNormalizer;
use pixcache::application::pipeline::{PipelineComponents, PipelineHooks, PipelineOrchestrator};
use pixcache::application::sources::{SourceProvider, SourceProviderRegistry};
use pixcache::cache::{CacheConfig, PhysicalFileSystemCache};
use pixcache::domain::processors::BUILTIN_PROCESSORS;
use pixcache::infra::http::{HttpState, REQUEST_ID_HEADER, build_router};
use pixcache::infra::providers::FileSystemProvider;
use pixcache::infra::transform::PassthroughTransformer;
use tempfile::TempDir;
use tower::ServiceExt;

const PNG: &[u8] = &[
    0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44, 0x52,
    0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1F, 0x15, 0xC4,
    0x89,
];

struct TestApp {
    _sources: TempDir,
    _cache: TempDir,
    router: Router,
}

fn app() -> TestApp {
    let sources = TempDir::new().expect("source dir");
    let cache = TempDir::new().expect("cache dir");
    std::fs::create_dir_all(sources.path().join("img")).expect("nested dir");
    std::fs::write(sources.path().join("img/photo.png"), PNG).expect("write png");

    let provider: Arc<dyn SourceProvider> = Arc::new(FileSystemProvider::new(sources.path()));
    let pipeline = PipelineOrchestrator::new(
        PipelineComponents {
            normalizer: CommandNormalizer::new(BUILTIN_PROCESSORS),
            sources: SourceProviderRegistry::new(vec![provider]),
            cache: Arc::new(
                PhysicalFileSystemCache::new(cache.path(), 2).expect("cache should initialize"),
            ),
            transformer: Arc::new(PassthroughTransformer),
            hooks: PipelineHooks::new(),
        },
        &CacheConfig::default(),
    );

    TestApp {
        _sources: sources,
        _cache: cache,
        router: build_router(HttpState { pipeline }),
    }
}

async fn send(
    router: &Router,
    uri: &str,
    headers: &[(header::HeaderName, &str)],
) -> axum::response::Response {
    let mut builder = Request::builder().method(Method::GET).uri(uri);
    for (name, value) in headers {
        builder = builder.header(name, *value);
    }
    let request = builder.body(Body::empty()).expect("request should build");
    router
        .clone()
        .oneshot(request)
        .await
        .expect("router should respond")
}

async fn body_bytes(response: axum::response::Response) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .expect("body should collect")
        .to_bytes()
        .to_vec()
}

fn header_str<'a>(response: &'a axum::response::Response, name: header::HeaderName) -> &'a str {
    response
        .headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .expect("header present")
}

#[tokio::test]
async fn health_check_has_no_body() {
    let app = app();

    let response = send(&app.router, "/_health", &[]).await;

    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert!(response.headers().get(REQUEST_ID_HEADER).is_some());
}

#[tokio::test]
async fn caller_request_id_is_echoed() {
    let app = app();

    let response = send(
        &app.router,
        "/img/missing.png",
        &[(REQUEST_ID_HEADER, "req-42")],
    )
    .await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(header_str(&response, REQUEST_ID_HEADER), "req-42");
}

#[tokio::test]
async fn serves_image_with_cache_headers() {
    let app = app();

    let response = send(&app.router, "/img/photo.png?width=300&utm=x", &[]).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header_str(&response, header::CONTENT_TYPE), "image/png");
    assert_eq!(
        header_str(&response, header::CONTENT_LENGTH),
        PNG.len().to_string()
    );
    assert_eq!(
        header_str(&response, header::CACHE_CONTROL),
        "public, max-age=604800, must-revalidate"
    );
    assert!(header_str(&response, header::ETAG).starts_with('"'));
    assert!(header_str(&response, header::LAST_MODIFIED).ends_with(" GMT"));
    assert!(header_str(&response, header::EXPIRES).ends_with(" GMT"));
    assert_eq!(body_bytes(response).await, PNG);
}

#[tokio::test]
async fn matching_etag_is_not_modified() {
    let app = app();
    let first = send(&app.router, "/img/photo.png?width=300", &[]).await;
    let etag = header_str(&first, header::ETAG).to_string();

    let second = send(
        &app.router,
        "/img/photo.png?width=300",
        &[(header::IF_NONE_MATCH, etag.as_str())],
    )
    .await;

    assert_eq!(second.status(), StatusCode::NOT_MODIFIED);
    assert_eq!(header_str(&second, header::ETAG), etag);
    assert!(second.headers().get(header::CACHE_CONTROL).is_some());
    assert!(body_bytes(second).await.is_empty());
}

#[tokio::test]
async fn different_commands_do_not_match_etag() {
    let app = app();
    let first = send(&app.router, "/img/photo.png?width=300", &[]).await;
    let etag = header_str(&first, header::ETAG).to_string();

    let other = send(
        &app.router,
        "/img/photo.png?width=200",
        &[(header::IF_NONE_MATCH, etag.as_str())],
    )
    .await;

    assert_eq!(other.status(), StatusCode::OK);
    assert_ne!(header_str(&other, header::ETAG), etag);
}

#[tokio::test]
async fn if_modified_since_last_modified_is_not_modified() {
    let app = app();
    let first = send(&app.router, "/img/photo.png", &[]).await;
    let last_modified = header_str(&first, header::LAST_MODIFIED).to_string();

    let second = send(
        &app.router,
        "/img/photo.png",
        &[(header::IF_MODIFIED_SINCE, last_modified.as_str())],
    )
    .await;
    assert_eq!(second.status(), StatusCode::NOT_MODIFIED);

    let stale_client = send(
        &app.router,
        "/img/photo.png",
        &[(header::IF_MODIFIED_SINCE, "Mon, 01 Jan 2001 00:00:00 GMT")],
    )
    .await;
    assert_eq!(stale_client.status(), StatusCode::OK);
}

#[tokio::test]
async fn unknown_and_escaping_paths_are_not_found() {
    let app = app();

    let missing = send(&app.router, "/img/missing.png?width=10", &[]).await;
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);

    let escaping = send(&app.router, "/img/..%2F..%2Fsecret.png", &[]).await;
    assert_eq!(escaping.status(), StatusCode::NOT_FOUND);
}
