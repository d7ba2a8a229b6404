use std::sync::Once;

use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};
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

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "placecache_cache_hit_total",
            Unit::Count,
            "Nearby queries answered from the place store alone."
        );
        describe_counter!(
            "placecache_cache_miss_total",
            Unit::Count,
            "Nearby queries whose cached places did not meet the coverage threshold."
        );
        describe_counter!(
            "placecache_provider_call_total",
            Unit::Count,
            "Billable provider attempts, labelled by operation."
        );
        describe_counter!(
            "placecache_provider_error_total",
            Unit::Count,
            "Failed provider attempts, labelled by error kind."
        );
        describe_counter!(
            "placecache_coalesced_wait_total",
            Unit::Count,
            "Queries that joined an in-flight provider search instead of issuing one."
        );
        describe_counter!(
            "placecache_rollout_fallback_total",
            Unit::Count,
            "Cache-path failures transparently re-issued on the legacy path."
        );
        describe_counter!(
            "placecache_store_write_failed_total",
            Unit::Count,
            "Provider results that could not be written to the place store."
        );
        describe_counter!(
            "placecache_ledger_write_failed_total",
            Unit::Count,
            "Call ledger entries discarded after a failed write."
        );
        describe_gauge!(
            "placecache_rollout_percentage",
            Unit::Percent,
            "Share of new sessions routed through the cache path."
        );
        describe_histogram!(
            "placecache_resolve_ms",
            Unit::Milliseconds,
            "Cache-path resolution latency in milliseconds."
        );
    });
}
