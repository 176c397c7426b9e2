//! Freshness and validation metadata for served artifacts.

use time::{
    Duration, OffsetDateTime, PrimitiveDateTime, UtcOffset, format_description::FormatItem,
    macros::format_description,
};

use crate::cache::CacheEntryMetadata;

/// RFC 7231 IMF-fixdate, e.g. `Sun, 06 Nov 1994 08:49:37 GMT`.
const HTTP_DATE: &[FormatItem<'static>] = format_description!(
    "[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second] GMT"
);

/// Format `value` as an HTTP-date in GMT.
pub fn http_date(value: OffsetDateTime) -> Result<String, time::error::Format> {
    value.to_offset(UtcOffset::UTC).format(HTTP_DATE)
}

/// Parse an IMF-fixdate. Obsolete HTTP date forms are not accepted.
pub fn parse_http_date(value: &str) -> Option<OffsetDateTime> {
    PrimitiveDateTime::parse(value.trim(), HTTP_DATE)
        .ok()
        .map(PrimitiveDateTime::assume_utc)
}

/// Header values for one response. Hooks may edit any field before it is sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHeaders {
    pub cache_control: String,
    /// Strong validator, already quoted.
    pub etag: String,
    pub last_modified: OffsetDateTime,
    pub expires: OffsetDateTime,
    /// Freshness lifetime advertised in `cache_control`.
    pub max_age: Duration,
}

impl ResponseHeaders {
    /// Whether an `If-None-Match` header value matches this entity.
    ///
    /// Uses weak comparison, as required for `If-None-Match`.
    pub fn etag_matches(&self, if_none_match: &str) -> bool {
        let ours = opaque_tag(&self.etag);
        if_none_match
            .split(',')
            .map(str::trim)
            .any(|candidate| candidate == "*" || opaque_tag(candidate) == ours)
    }

    /// Whether the entity is unchanged since `since`, at one-second resolution.
    pub fn not_modified_since(&self, since: OffsetDateTime) -> bool {
        self.last_modified.unix_timestamp() <= since.unix_timestamp()
    }
}

fn opaque_tag(tag: &str) -> &str {
    tag.strip_prefix("W/").unwrap_or(tag)
}

/// Derives response headers from a cache entry and the two age ceilings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseMetadataBuilder {
    max_browser_age: Duration,
    max_cache_age: Duration,
}

impl ResponseMetadataBuilder {
    pub fn new(max_browser_age: Duration, max_cache_age: Duration) -> Self {
        Self {
            max_browser_age,
            max_cache_age,
        }
    }

    /// Pure: the result depends only on `entry`, `now` and the ceilings.
    pub fn build(&self, entry: &CacheEntryMetadata, now: OffsetDateTime) -> ResponseHeaders {
        // An eviction instant past the representable range leaves only the browser ceiling.
        let remaining = entry
            .created_at
            .checked_add(self.max_cache_age)
            .map_or(self.max_browser_age, |evicted_at| evicted_at - now);
        let max_age = Duration::seconds(
            self.max_browser_age
                .min(remaining)
                .max(Duration::ZERO)
                .whole_seconds(),
        );
        let expires = now
            .checked_add(max_age)
            .unwrap_or_else(|| PrimitiveDateTime::MAX.assume_utc());

        ResponseHeaders {
            cache_control: format!(
                "public, max-age={}, must-revalidate",
                max_age.whole_seconds()
            ),
            etag: format!("\"{}\"", entry.key),
            last_modified: entry.created_at,
            expires,
            max_age,
        }
    }
}
