//! Process-wide tracing subscriber and metric descriptions.

use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing::{Subscriber, info, level_filters::LevelFilter};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    registry::LookupSpan,
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Filter directives read from the environment, ahead of `RUST_LOG`.
pub const LOG_ENV: &str = "GAZETTE_LOG";

/// Dependencies that log every connection at `debug`. Capped unless the
/// environment names them explicitly.
const QUIET_TARGETS: &[(&str, &str)] = &[
    ("hyper_util", "hyper_util=warn"),
    ("reqwest", "reqwest=warn"),
    ("rustls", "rustls=warn"),
];

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let overrides = std::env::var(LOG_ENV)
        .or_else(|_| std::env::var(EnvFilter::DEFAULT_ENV))
        .ok();
    let env_filter = build_filter(logging.level, overrides.as_deref())?;

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer(logging.format))
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })?;

    info!(
        target = "gazette::telemetry",
        level = %logging.level,
        format = ?logging.format,
        "Logging initialised"
    );
    Ok(())
}

/// `level` as the default, then `overrides`, then caps for chatty dependencies.
fn build_filter(level: LevelFilter, overrides: Option<&str>) -> Result<EnvFilter, InfraError> {
    let overrides = overrides.unwrap_or_default();
    let mut filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .parse_lossy(overrides);

    for (target, directive) in QUIET_TARGETS {
        if overrides.contains(target) {
            continue;
        }
        let directive = directive.parse().map_err(|err| {
            InfraError::telemetry(format!("invalid filter directive `{directive}`: {err}"))
        })?;
        filter = filter.add_directive(directive);
    }
    Ok(filter)
}

fn fmt_layer<S>(format: LogFormat) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'span> LookupSpan<'span>,
{
    match format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .with_target(true)
            .with_thread_names(true)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_target(true)
            .with_thread_names(true)
            .boxed(),
    }
}

pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "gazette_cache_hit_total",
            Unit::Count,
            "Total number of cache lookups served from a tier."
        );
        describe_counter!(
            "gazette_cache_miss_total",
            Unit::Count,
            "Total number of cache lookups that needed an upstream fetch."
        );
        describe_counter!(
            "gazette_cache_evict_total",
            Unit::Count,
            "Total number of memory-tier evictions due to capacity."
        );
        describe_counter!(
            "gazette_cache_demote_total",
            Unit::Count,
            "Total number of evicted entries moved to the persistent tier."
        );
        describe_counter!(
            "gazette_cache_promote_total",
            Unit::Count,
            "Total number of persistent-tier hits moved back to memory."
        );
        describe_counter!(
            "gazette_cache_expired_total",
            Unit::Count,
            "Total number of entries removed after their TTL elapsed."
        );
        describe_counter!(
            "gazette_cache_fetch_error_total",
            Unit::Count,
            "Total number of failed upstream fetches."
        );
        describe_counter!(
            "gazette_cache_lock_poisoned_total",
            Unit::Count,
            "Total number of poisoned cache locks recovered."
        );
        describe_histogram!(
            "gazette_cache_fetch_ms",
            Unit::Milliseconds,
            "Upstream fetch latency in milliseconds."
        );
        describe_histogram!(
            "gazette_cache_sweep_ms",
            Unit::Milliseconds,
            "Expiry sweep duration in milliseconds."
        );
    });
}
