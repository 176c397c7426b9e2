//! Source images fetched from an HTTP origin.

use std::time::Duration;

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use reqwest::{Client, StatusCode, Url, header};
use time::OffsetDateTime;

use crate::application::response::parse_http_date;
use crate::application::sources::{ProviderError, SourceProvider};
use crate::application::stream::ByteStream;
use crate::domain::{Fingerprint, SourceMetadata};

/// Claims paths under `prefix` and maps `<prefix>/<rest>` to `<base_url>/<rest>`.
///
/// Metadata comes from a `HEAD` request (`Last-Modified`, `Content-Length`);
/// bodies are streamed from `GET`.
#[derive(Debug, Clone)]
pub struct RemoteProvider {
    name: String,
    prefix: String,
    base_url: Url,
    client: Client,
}

impl RemoteProvider {
    pub fn new(prefix: &str, base_url: &str, timeout: Duration) -> Result<Self, ProviderError> {
        let prefix = format!("/{}", prefix.trim_matches('/'));
        let mut base_url = Url::parse(base_url).map_err(ProviderError::remote)?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        let client = Client::builder()
            .user_agent(concat!("pixcache/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(ProviderError::remote)?;

        Ok(Self {
            name: format!("remote:{prefix}"),
            prefix,
            base_url,
            client,
        })
    }

    /// Path segments below the prefix. Empty, dot and backslash segments are refused.
    fn relative<'a>(&self, path: &'a str) -> Option<Vec<&'a str>> {
        let rest = path.strip_prefix(self.prefix.as_str())?;
        let rest = rest.strip_prefix('/')?;
        let segments: Vec<&str> = rest.split('/').collect();
        let valid = segments
            .iter()
            .all(|segment| !matches!(*segment, "" | "." | "..") && !segment.contains('\\'));
        valid.then_some(segments)
    }

    /// `<base_url>/<rest>`, or `None` when the result would leave the base URL.
    pub fn url_for(&self, path: &str) -> Option<Url> {
        let segments = self.relative(path)?;
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .ok()?
            .pop_if_empty()
            .extend(segments);

        let stays_under_base =
            url.origin() == self.base_url.origin() && url.path().starts_with(self.base_url.path());
        stays_under_base.then_some(url)
    }
}

fn header_str<'a>(headers: &'a header::HeaderMap, name: header::HeaderName) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

#[async_trait]
impl SourceProvider for RemoteProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn matches(&self, path: &str) -> bool {
        self.url_for(path).is_some()
    }

    async fn metadata(&self, path: &str) -> Result<Option<SourceMetadata>, ProviderError> {
        let Some(url) = self.url_for(path) else {
            return Ok(None);
        };

        let response = self
            .client
            .head(url.clone())
            .send()
            .await
            .map_err(ProviderError::remote)?;
        match response.status() {
            StatusCode::NOT_FOUND => return Ok(None),
            status if !status.is_success() => {
                return Err(ProviderError::RemoteStatus {
                    status: status.as_u16(),
                    url: url.to_string(),
                });
            }
            _ => {}
        }

        let headers = response.headers();
        let last_modified = header_str(headers, header::LAST_MODIFIED)
            .and_then(parse_http_date)
            .unwrap_or(OffsetDateTime::UNIX_EPOCH);
        let length = header_str(headers, header::CONTENT_LENGTH)
            .and_then(|value| value.trim().parse::<u64>().ok())
            .unwrap_or_default();
        let content_type = header_str(headers, header::CONTENT_TYPE).map(str::to_string);

        Ok(Some(SourceMetadata {
            fingerprint: Fingerprint::new(last_modified, length),
            content_type,
        }))
    }

    async fn open_read(&self, path: &str) -> Result<Option<ByteStream>, ProviderError> {
        let Some(url) = self.url_for(path) else {
            return Ok(None);
        };

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(ProviderError::remote)?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if !status.is_success() => Err(ProviderError::RemoteStatus {
                status: status.as_u16(),
                url: url.to_string(),
            }),
            _ => Ok(Some(
                response
                    .bytes_stream()
                    .map_err(std::io::Error::other)
                    .boxed(),
            )),
        }
    }
}
