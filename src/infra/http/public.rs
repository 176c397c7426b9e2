use axum::{
    Router,
    body::Body,
    extract::{Path, RawQuery, State},
    http::{
        HeaderMap, HeaderValue, StatusCode,
        header::{
            CACHE_CONTROL, CONTENT_LENGTH, CONTENT_TYPE, ETAG, EXPIRES, IF_MODIFIED_SINCE,
            IF_NONE_MATCH, LAST_MODIFIED,
        },
    },
    middleware,
    response::{IntoResponse, Response},
    routing::get,
};
use tracing::debug;

use crate::application::{
    error::HttpError,
    pipeline::PipelineOrchestrator,
    response::{ResponseHeaders, http_date, parse_http_date},
};

use super::middleware::{log_responses, set_request_context};

const SOURCE: &str = "infra::http::public::serve_image";

#[derive(Clone)]
pub struct HttpState {
    pub pipeline: PipelineOrchestrator,
}

pub fn build_router(state: HttpState) -> Router {
    Router::new()
        .route("/_health", get(health))
        .route("/{*path}", get(serve_image))
        .with_state(state)
        .layer(middleware::from_fn(log_responses))
        .layer(middleware::from_fn(set_request_context))
}

async fn health() -> StatusCode {
    StatusCode::NO_CONTENT
}

async fn serve_image(
    State(state): State<HttpState>,
    Path(path): Path<String>,
    RawQuery(query): RawQuery,
    request_headers: HeaderMap,
) -> Result<Response, HttpError> {
    let logical_path = format!("/{path}");
    let image = state
        .pipeline
        .handle_query(&logical_path, query.as_deref())
        .await?;

    let mut headers = cache_headers(&image.headers)?;

    if is_not_modified(&request_headers, &image.headers) {
        debug!(
            target = SOURCE,
            path = %logical_path,
            cache_key = %image.cache_key,
            result = "not_modified",
            "Conditional request satisfied"
        );
        let mut response = StatusCode::NOT_MODIFIED.into_response();
        response.headers_mut().extend(headers);
        return Ok(response);
    }

    headers.insert(CONTENT_TYPE, header_value(&image.content_type)?);
    headers.insert(CONTENT_LENGTH, HeaderValue::from(image.length));

    let mut response = Response::new(Body::from_stream(image.body));
    *response.headers_mut() = headers;
    Ok(response)
}

fn cache_headers(values: &ResponseHeaders) -> Result<HeaderMap, HttpError> {
    let mut headers = HeaderMap::new();
    headers.insert(CACHE_CONTROL, header_value(&values.cache_control)?);
    headers.insert(ETAG, header_value(&values.etag)?);
    headers.insert(LAST_MODIFIED, date_value(values.last_modified)?);
    headers.insert(EXPIRES, date_value(values.expires)?);
    Ok(headers)
}

/// `If-None-Match` wins over `If-Modified-Since` when both are sent.
fn is_not_modified(request: &HeaderMap, values: &ResponseHeaders) -> bool {
    if let Some(if_none_match) = request.get(IF_NONE_MATCH) {
        return if_none_match
            .to_str()
            .is_ok_and(|candidates| values.etag_matches(candidates));
    }

    request
        .get(IF_MODIFIED_SINCE)
        .and_then(|value| value.to_str().ok())
        .and_then(parse_http_date)
        .is_some_and(|since| values.not_modified_since(since))
}

fn header_value(value: &str) -> Result<HeaderValue, HttpError> {
    HeaderValue::from_str(value).map_err(|err| {
        HttpError::from_error(
            SOURCE,
            StatusCode::INTERNAL_SERVER_ERROR,
            "Invalid response header",
            &err,
        )
    })
}

fn date_value(value: time::OffsetDateTime) -> Result<HeaderValue, HttpError> {
    let formatted = http_date(value).map_err(|err| {
        HttpError::from_error(
            SOURCE,
            StatusCode::INTERNAL_SERVER_ERROR,
            "Invalid response header",
            &err,
        )
    })?;
    header_value(&formatted)
}
