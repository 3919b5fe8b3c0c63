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

/// Register metric descriptions once per process.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "courier_cache_hit_total",
            Unit::Count,
            "Total number of fresh expiring-cache reads."
        );
        describe_counter!(
            "courier_cache_miss_total",
            Unit::Count,
            "Total number of expiring-cache reads that found nothing fresh."
        );
        describe_counter!(
            "courier_cache_evict_total",
            Unit::Count,
            "Total number of expiring-cache evictions, by reason."
        );
        describe_counter!(
            "courier_queue_events_total",
            Unit::Count,
            "Request queue lifecycle events, by queue and event."
        );
        describe_gauge!(
            "courier_queue_in_flight",
            Unit::Count,
            "Calls currently executing per request queue."
        );
        describe_histogram!(
            "courier_queue_wait",
            Unit::Milliseconds,
            "Time a request waited in its band before the first attempt."
        );
        describe_counter!(
            "courier_batch_flush_total",
            Unit::Count,
            "Spreadsheet batch flushes, by trigger."
        );
        describe_histogram!(
            "courier_batch_operations",
            Unit::Count,
            "Operations coalesced into one spreadsheet batch flush."
        );
        for queue in ["analysis", "sheets", "webhook"] {
            describe_histogram!(
                format!("courier_{queue}_dispatch"),
                Unit::Milliseconds,
                "External call latency in milliseconds, including the queue timeout."
            );
        }
        describe_histogram!(
            "courier_categorize",
            Unit::Milliseconds,
            "End-to-end categorization latency in milliseconds."
        );
        describe_histogram!(
            "courier_sheets_metadata",
            Unit::Milliseconds,
            "Spreadsheet metadata fetch latency in milliseconds, cache misses only."
        );
    });
}
