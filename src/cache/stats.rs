//! Hit/miss accounting, response-time averaging and per-key access counts.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use gazette_api_types::{CacheStatsView, StorageBreakdownView, TopKeyView, epoch_millis};
use time::OffsetDateTime;
use tracing::debug;

use super::lock::mutex_lock;

const SOURCE: &str = "cache::stats";

/// Keys tracked for `topKeys` before the coldest half is dropped.
const MAX_TRACKED_KEYS: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyCount {
    pub key: String,
    pub count: u64,
}

/// Point-in-time copy of the aggregator's counters.
#[derive(Debug, Clone, PartialEq)]
pub struct StatsSnapshot {
    pub total_hits: u64,
    pub total_misses: u64,
    pub hit_rate: f64,
    pub miss_rate: f64,
    /// Mean of the retained response-time samples, in milliseconds.
    pub average_response_time: f64,
    pub top_keys: Vec<KeyCount>,
}

/// Thread-safe hit/miss and access-frequency counters.
pub struct StatsAggregator {
    state: Mutex<StatsState>,
    window: usize,
    top_keys_limit: usize,
}

#[derive(Default)]
struct StatsState {
    hits: u64,
    misses: u64,
    samples: VecDeque<f64>,
    sample_sum: f64,
    access: HashMap<String, u64>,
}

impl StatsAggregator {
    /// `window` bounds the response-time samples kept for the running mean.
    pub fn new(window: usize, top_keys_limit: usize) -> Self {
        Self {
            state: Mutex::new(StatsState::default()),
            window: window.max(1),
            top_keys_limit,
        }
    }

    pub fn record_hit(&self, response_ms: f64) {
        let mut state = mutex_lock(&self.state, SOURCE, "record_hit");
        state.hits += 1;
        state.push_sample(response_ms, self.window);
    }

    pub fn record_miss(&self, response_ms: f64) {
        let mut state = mutex_lock(&self.state, SOURCE, "record_miss");
        state.misses += 1;
        state.push_sample(response_ms, self.window);
    }

    pub fn record_access(&self, key: &str) {
        let mut state = mutex_lock(&self.state, SOURCE, "record_access");
        match state.access.get_mut(key) {
            Some(count) => *count += 1,
            None => {
                if state.access.len() >= MAX_TRACKED_KEYS {
                    state.prune_access_table();
                }
                state.access.insert(key.to_string(), 1);
            }
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let state = mutex_lock(&self.state, SOURCE, "snapshot");
        let total = state.hits + state.misses;
        let hit_rate = if total == 0 {
            0.0
        } else {
            state.hits as f64 / total as f64
        };
        let miss_rate = if total == 0 { 0.0 } else { 1.0 - hit_rate };
        let average_response_time = if state.samples.is_empty() {
            0.0
        } else {
            state.sample_sum / state.samples.len() as f64
        };

        StatsSnapshot {
            total_hits: state.hits,
            total_misses: state.misses,
            hit_rate,
            miss_rate,
            average_response_time,
            top_keys: top_n(&state.access, self.top_keys_limit),
        }
    }

    pub fn reset(&self) {
        *mutex_lock(&self.state, SOURCE, "reset") = StatsState::default();
        debug!("Cache statistics reset");
    }
}

impl StatsState {
    fn push_sample(&mut self, sample: f64, window: usize) {
        let sample = if sample.is_finite() { sample.max(0.0) } else { 0.0 };
        if self.samples.len() == window
            && let Some(oldest) = self.samples.pop_front()
        {
            self.sample_sum -= oldest;
        }
        self.samples.push_back(sample);
        self.sample_sum += sample;
        if self.samples.len() == 1 {
            // Resynchronise whenever the window restarts so float drift stays bounded.
            self.sample_sum = sample;
        }
    }

    fn prune_access_table(&mut self) {
        let keep = MAX_TRACKED_KEYS / 2;
        let mut ranked: Vec<(String, u64)> = self.access.drain().collect();
        ranked.sort_unstable_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(keep);
        self.access.extend(ranked);
        debug!(kept = keep, "Pruned cold keys from access table");
    }
}

/// The `limit` most-accessed keys, highest count first, ties by key.
fn top_n(access: &HashMap<String, u64>, limit: usize) -> Vec<KeyCount> {
    if limit == 0 || access.is_empty() {
        return Vec::new();
    }

    let mut ranked: Vec<(&String, u64)> = access.iter().map(|(key, count)| (key, *count)).collect();
    let order = |a: &(&String, u64), b: &(&String, u64)| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0));
    if ranked.len() > limit {
        ranked.select_nth_unstable_by(limit - 1, order);
        ranked.truncate(limit);
    }
    ranked.sort_unstable_by(order);

    ranked
        .into_iter()
        .map(|(key, count)| KeyCount {
            key: key.clone(),
            count,
        })
        .collect()
}

/// Byte totals per storage tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StorageBreakdown {
    pub memory: u64,
    pub persistent: u64,
}

/// Aggregator counters merged with tier totals.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheStats {
    pub total_entries: u64,
    pub total_size: u64,
    pub hit_rate: f64,
    pub miss_rate: f64,
    pub total_hits: u64,
    pub total_misses: u64,
    pub average_response_time: f64,
    pub top_keys: Vec<KeyCount>,
    pub last_cleanup: OffsetDateTime,
    pub storage_breakdown: StorageBreakdown,
}

impl From<CacheStats> for CacheStatsView {
    fn from(stats: CacheStats) -> Self {
        Self {
            total_entries: stats.total_entries,
            total_size: stats.total_size,
            hit_rate: stats.hit_rate,
            miss_rate: stats.miss_rate,
            total_hits: stats.total_hits,
            total_misses: stats.total_misses,
            average_response_time: stats.average_response_time,
            top_keys: stats
                .top_keys
                .into_iter()
                .map(|entry| TopKeyView {
                    key: entry.key,
                    count: entry.count,
                })
                .collect(),
            last_cleanup: epoch_millis(stats.last_cleanup),
            storage_breakdown: StorageBreakdownView {
                memory: stats.storage_breakdown.memory,
                local_storage: stats.storage_breakdown.persistent,
            },
        }
    }
}
