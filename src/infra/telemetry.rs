use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::application::pipeline::{
    CACHE_HIT_TOTAL, CACHE_MISS_TOTAL, CACHE_STALE_TOTAL, CACHE_WRITE_FAILURE_TOTAL,
    TRANSFORM_FAILURE_TOTAL, TRANSFORM_MS, TRANSFORM_TOTAL,
};
use crate::cache::gate::LEASE_WAIT_TOTAL;
use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

/// Register metric descriptions with the installed recorder. Idempotent.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            CACHE_HIT_TOTAL,
            Unit::Count,
            "Requests served from a fresh cache entry."
        );
        describe_counter!(
            CACHE_MISS_TOTAL,
            Unit::Count,
            "Requests that found no fresh cache entry."
        );
        describe_counter!(
            CACHE_STALE_TOTAL,
            Unit::Count,
            "Cache entries rejected for a changed source or exceeded store age."
        );
        describe_counter!(
            CACHE_WRITE_FAILURE_TOTAL,
            Unit::Count,
            "Derived images served without being stored."
        );
        describe_counter!(
            TRANSFORM_TOTAL,
            Unit::Count,
            "Transformations started."
        );
        describe_counter!(
            TRANSFORM_FAILURE_TOTAL,
            Unit::Count,
            "Transformations that failed to produce an image."
        );
        describe_counter!(
            LEASE_WAIT_TOTAL,
            Unit::Count,
            "Requests that waited for another request populating the same key."
        );
        describe_histogram!(
            TRANSFORM_MS,
            Unit::Milliseconds,
            "Transformation latency in milliseconds."
        );
    });
}
