use std::time::Instant;

use axum::{
    body::Body,
    http::{HeaderName, HeaderValue, Request, StatusCode},
    middleware::Next,
    response::Response,
};
use tracing::{Level, event};
use uuid::Uuid;

use crate::application::error::ErrorReport;

const TARGET: &str = "pixcache::http::response";
pub const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
}

impl RequestContext {
    /// Reuse a caller-supplied id when it is a short printable token.
    fn from_request(request: &Request<Body>) -> Self {
        let request_id = request
            .headers()
            .get(&REQUEST_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .filter(|id| !id.is_empty() && id.len() <= 128)
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        Self { request_id }
    }
}

/// Attach a [`RequestContext`] to the request and echo its id on the response.
pub async fn set_request_context(mut request: Request<Body>, next: Next) -> Response {
    let ctx = RequestContext::from_request(&request);
    request.extensions_mut().insert(ctx.clone());

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&ctx.request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response.extensions_mut().insert(ctx);
    response
}

/// Log every 4xx/5xx once, with the diagnostic chain the handler attached.
pub async fn log_responses(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let request_id = request
        .extensions()
        .get::<RequestContext>()
        .map(|ctx| ctx.request_id.clone())
        .unwrap_or_default();
    let started_at = Instant::now();

    let mut response = next.run(request).await;
    let status = response.status();
    if !(status.is_client_error() || status.is_server_error()) {
        return response;
    }

    let report = response.extensions_mut().remove::<ErrorReport>();
    let failure = Failure {
        status,
        method: method.as_str(),
        path: uri.path(),
        query: uri.query().unwrap_or(""),
        elapsed_ms: started_at.elapsed().as_millis() as u64,
        request_id: &request_id,
        report: report.as_ref(),
    };
    if status.is_server_error() {
        failure.log(Level::ERROR, "request failed");
    } else {
        failure.log(Level::WARN, "client request error");
    }

    response
}

struct Failure<'a> {
    status: StatusCode,
    method: &'a str,
    path: &'a str,
    query: &'a str,
    elapsed_ms: u64,
    request_id: &'a str,
    report: Option<&'a ErrorReport>,
}

impl Failure<'_> {
    fn log(&self, level: Level, message: &str) {
        let Self {
            status,
            method,
            path,
            query,
            elapsed_ms,
            request_id,
            report,
        } = *self;
        let source = report.map_or("unknown", |report| report.source);
        let chain: &[String] = report.map_or(&[], |report| &report.messages);
        let detail = chain
            .first()
            .map_or("no diagnostic available", String::as_str);
        let status = status.as_u16();

        // `event!` needs a constant level.
        macro_rules! emit {
            ($level:expr) => {
                event!(
                    $level,
                    target = TARGET,
                    status,
                    method,
                    path,
                    query,
                    elapsed_ms,
                    source,
                    detail,
                    chain = ?chain,
                    request_id,
                    "{}",
                    message
                )
            };
        }

        if level == Level::ERROR {
            emit!(Level::ERROR);
        } else {
            emit!(Level::WARN);
        }
    }
}
