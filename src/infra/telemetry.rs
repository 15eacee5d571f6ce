use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

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

pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "sectio_cache_var_hit_total",
            Unit::Count,
            "Total number of variable cache hits (memory or store)."
        );
        describe_counter!(
            "sectio_cache_var_miss_total",
            Unit::Count,
            "Total number of variable cache misses."
        );
        describe_counter!(
            "sectio_cache_object_hit_total",
            Unit::Count,
            "Total number of object cache hits (memory or store)."
        );
        describe_counter!(
            "sectio_cache_object_miss_total",
            Unit::Count,
            "Total number of object cache misses."
        );
        describe_counter!(
            "sectio_cache_artifact_hit_total",
            Unit::Count,
            "Total number of rendered artifact hits."
        );
        describe_counter!(
            "sectio_cache_artifact_miss_total",
            Unit::Count,
            "Total number of rendered artifact misses."
        );
        describe_counter!(
            "sectio_cache_checksum_mismatch_total",
            Unit::Count,
            "Total number of stored rows rejected because their checksum did not match."
        );
        describe_counter!(
            "sectio_store_rebuild_total",
            Unit::Count,
            "Total number of scope stores deleted after a driver failure."
        );
        describe_counter!(
            "sectio_artifact_invalidated_total",
            Unit::Count,
            "Total number of rendered artifacts removed by invalidation."
        );
        describe_histogram!(
            "sectio_cache_clean_ms",
            Unit::Milliseconds,
            "Latency of invalidation controller operations in milliseconds."
        );
    });
}
