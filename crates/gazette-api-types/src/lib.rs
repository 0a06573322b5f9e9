//! Wire types shared by the Gazette server and `gazette-cli`.
//!
//! Field names follow the JSON contract consumed by the site's UI layer, which
//! is camelCase throughout.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Error string carried by the degraded stats response.
pub const STATS_UNAVAILABLE_ERROR: &str = "Cache service unavailable";

/// Cache statistics as reported over HTTP.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStatsView {
    pub total_entries: u64,
    pub total_size: u64,
    pub hit_rate: f64,
    pub miss_rate: f64,
    pub total_hits: u64,
    pub total_misses: u64,
    pub average_response_time: f64,
    pub top_keys: Vec<TopKeyView>,
    /// Unix epoch milliseconds of the most recent sweep.
    pub last_cleanup: i64,
    pub storage_breakdown: StorageBreakdownView,
}

impl CacheStatsView {
    /// All-zero stats used when the cache service cannot report.
    pub fn zeroed(now: OffsetDateTime) -> Self {
        Self {
            total_entries: 0,
            total_size: 0,
            hit_rate: 0.0,
            miss_rate: 0.0,
            total_hits: 0,
            total_misses: 0,
            average_response_time: 0.0,
            top_keys: Vec::new(),
            last_cleanup: epoch_millis(now),
            storage_breakdown: StorageBreakdownView::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopKeyView {
    pub key: String,
    pub count: u64,
}

/// Bytes held per storage tier.
///
/// `localStorage` is the historical name of the persistent tier in the UI
/// contract and is kept as-is.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageBreakdownView {
    pub memory: u64,
    pub local_storage: u64,
}

/// Successful stats response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsResponse {
    pub success: bool,
    pub stats: CacheStatsView,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

impl StatsResponse {
    pub fn new(stats: CacheStatsView, timestamp: OffsetDateTime) -> Self {
        Self {
            success: true,
            stats,
            timestamp,
        }
    }
}

/// Degraded stats response returned when the cache service is unavailable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsFallbackResponse {
    pub success: bool,
    pub error: String,
    pub stats: CacheStatsView,
    pub fallback: bool,
}

impl StatsFallbackResponse {
    pub fn unavailable(now: OffsetDateTime) -> Self {
        Self {
            success: false,
            error: STATS_UNAVAILABLE_ERROR.to_string(),
            stats: CacheStatsView::zeroed(now),
            fallback: true,
        }
    }
}

/// Either shape of the stats endpoint, for clients that read both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StatsEnvelope {
    Ok(StatsResponse),
    Fallback(StatsFallbackResponse),
}

/// Result of an operator-triggered sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepResponse {
    pub removed: u64,
}

pub fn epoch_millis(at: OffsetDateTime) -> i64 {
    (at.unix_timestamp_nanos() / 1_000_000) as i64
}
