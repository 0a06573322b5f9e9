//! Cache facade used by route handlers.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures::FutureExt;
use metrics::{counter, histogram};
use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::config::CacheConfig;
use super::entry::expiry_for;
use super::error::{CacheError, FetchError, TierError};
use super::inflight::{Claim, InFlightGuard, SharedFetch};
use super::stats::{CacheStats, StatsAggregator, StorageBreakdown};
use super::tiered::TieredCache;

const METRIC_HIT: &str = "gazette_cache_hit_total";
const METRIC_MISS: &str = "gazette_cache_miss_total";
const METRIC_FETCH_ERROR: &str = "gazette_cache_fetch_error_total";
const METRIC_FETCH_MS: &str = "gazette_cache_fetch_ms";
const METRIC_SWEEP_MS: &str = "gazette_cache_sweep_ms";

/// How a value was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Hit,
    Miss,
    /// Service disabled; fetched directly without touching the cache.
    Bypass,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Hit => "HIT",
            Outcome::Miss => "MISS",
            Outcome::Bypass => "BYPASS",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Served {
    pub value: Bytes,
    pub outcome: Outcome,
}

/// Tiered cache plus statistics, shared through `Arc` by every handler.
pub struct CacheService {
    cache: Arc<TieredCache>,
    stats: StatsAggregator,
    config: CacheConfig,
    available: AtomicBool,
}

impl CacheService {
    pub fn new(cache: TieredCache, config: CacheConfig) -> Self {
        Self {
            cache: Arc::new(cache),
            stats: StatsAggregator::new(config.response_time_window, config.top_keys_limit),
            config,
            available: AtomicBool::new(true),
        }
    }

    pub fn from_config(config: CacheConfig) -> Result<Self, TierError> {
        let cache = TieredCache::from_config(&config)?;
        Ok(Self::new(cache, config))
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Underlying entry table, for inspection.
    pub fn tiers(&self) -> &TieredCache {
        &self.cache
    }

    /// Return the cached value for `key`, or run `fetch` once and cache its result.
    ///
    /// Concurrent callers for the same key share one `fetch`. The fetch runs on
    /// its own task, so it completes and is stored even if every caller stops
    /// waiting. Failures are returned to all waiters and never cached.
    pub async fn fetch_with_cache<F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        fetch: F,
    ) -> Result<Served, CacheError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Bytes, FetchError>> + Send + 'static,
    {
        if !self.is_available() {
            return fetch()
                .await
                .map(|value| Served {
                    value,
                    outcome: Outcome::Bypass,
                })
                .map_err(CacheError::Fetch);
        }

        let now = OffsetDateTime::now_utc();
        expiry_for(now, ttl)?;

        let started = Instant::now();
        self.stats.record_access(key);
        let mut start = move |id| self.spawn_fetch(key, id, ttl, fetch);
        loop {
            let now = OffsetDateTime::now_utc();
            match self.cache.claim(key, now, start) {
                Claim::Hit(value) => {
                    self.record_hit(key, started);
                    return Ok(Served {
                        value,
                        outcome: Outcome::Hit,
                    });
                }
                Claim::Load(pending, unused) => {
                    if let Some(entry) = self.cache.load(pending, now).await {
                        self.record_hit(key, started);
                        return Ok(Served {
                            value: entry.value,
                            outcome: Outcome::Hit,
                        });
                    }
                    // Unreadable entries are dropped, so the next claim fetches.
                    start = unused;
                }
                Claim::Lead(pending) | Claim::Wait(pending) => {
                    let result = pending.await;
                    self.record_miss(key, started);
                    return result.map(|value| Served {
                        value,
                        outcome: Outcome::Miss,
                    });
                }
            }
        }
    }

    fn spawn_fetch<F, Fut>(&self, key: &str, id: u64, ttl: Duration, fetch: F) -> SharedFetch
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Bytes, FetchError>> + Send + 'static,
    {
        let cache = Arc::clone(&self.cache);
        let task_key = key.to_string();
        let handle = tokio::spawn(async move {
            let _registration = InFlightGuard::new(Arc::clone(&cache), task_key.clone(), id);
            let started = Instant::now();
            let result = fetch().await;
            histogram!(METRIC_FETCH_MS).record(started.elapsed().as_secs_f64() * 1000.0);

            match result {
                Ok(value) => {
                    if let Err(err) = cache.set(&task_key, value.clone(), ttl) {
                        warn!(key = %task_key, error = %err, "Fetched value not cached");
                    }
                    Ok(value)
                }
                Err(err) => {
                    counter!(METRIC_FETCH_ERROR).increment(1);
                    warn!(key = %task_key, error = %err, "Upstream fetch failed");
                    Err(CacheError::Fetch(err))
                }
            }
        });

        let key = key.to_string();
        async move {
            handle.await.unwrap_or_else(|err| {
                warn!(key = %key, error = %err, "In-flight fetch task did not complete");
                Err(CacheError::FetchAborted { key })
            })
        }
        .boxed()
        .shared()
    }

    /// Read `key` without a fallback fetch, recording a hit or miss.
    pub async fn get(&self, key: &str) -> Option<Bytes> {
        let started = Instant::now();
        if !self.is_available() {
            return self.cache.get(key).await;
        }
        self.stats.record_access(key);
        let value = self.cache.get(key).await;
        match value {
            Some(_) => self.record_hit(key, started),
            None => self.record_miss(key, started),
        }
        value
    }

    pub fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<(), CacheError> {
        self.cache.set(key, value, ttl)
    }

    pub fn invalidate(&self, key: &str) -> bool {
        let removed = self.cache.invalidate(key);
        debug!(key, removed, "Cache key invalidated");
        removed
    }

    /// Remove expired entries in batches, yielding between them.
    pub async fn sweep(&self) -> usize {
        let started = Instant::now();
        let now = OffsetDateTime::now_utc();
        let batch_size = self.config.sweep_batch_size.max(1);
        let mut removed = 0;
        loop {
            let batch = self.cache.sweep_batch(now, batch_size);
            removed += batch.removed;
            if batch.scanned < batch_size {
                break;
            }
            tokio::task::yield_now().await;
        }
        self.cache.mark_cleanup(now);

        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        histogram!(METRIC_SWEEP_MS).record(elapsed_ms);
        if removed > 0 {
            info!(removed, elapsed_ms, "Expired cache entries swept");
        } else {
            debug!(elapsed_ms, "Cache sweep found nothing expired");
        }
        removed
    }

    /// Drop every entry. Statistics are left untouched.
    pub fn clear(&self) {
        self.cache.clear();
        info!("Cache cleared");
    }

    pub fn reset_stats(&self) {
        self.stats.reset();
    }

    /// Current statistics merged with tier totals.
    pub fn get_stats(&self) -> Result<CacheStats, CacheError> {
        if !self.is_available() {
            return Err(CacheError::Unavailable);
        }

        let snapshot = self.stats.snapshot();
        let totals = self.cache.totals(OffsetDateTime::now_utc());
        Ok(CacheStats {
            total_entries: totals.entries() as u64,
            total_size: totals.bytes(),
            hit_rate: snapshot.hit_rate,
            miss_rate: snapshot.miss_rate,
            total_hits: snapshot.total_hits,
            total_misses: snapshot.total_misses,
            average_response_time: snapshot.average_response_time,
            top_keys: snapshot.top_keys,
            last_cleanup: self.cache.last_cleanup(),
            storage_breakdown: StorageBreakdown {
                memory: totals.memory_bytes,
                persistent: totals.persistent_bytes,
            },
        })
    }

    /// Stop caching and reporting; reads go straight to the fetch function.
    pub fn disable(&self) {
        if self.available.swap(false, Ordering::SeqCst) {
            warn!("Cache service disabled by operator");
        }
    }

    pub fn enable(&self) {
        if !self.available.swap(true, Ordering::SeqCst) {
            info!("Cache service re-enabled by operator");
        }
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    /// Run [`CacheService::sweep`] every `sweep_interval` until the handle is aborted.
    pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let service = Arc::clone(self);
        let period = self.config.sweep_interval;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await; // Skip the first immediate tick
            loop {
                interval.tick().await;
                service.sweep().await;
            }
        })
    }

    fn record_hit(&self, key: &str, started: Instant) {
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        self.stats.record_hit(elapsed_ms);
        counter!(METRIC_HIT).increment(1);
        debug!(key, outcome = "hit", elapsed_ms, "Cache lookup");
    }

    fn record_miss(&self, key: &str, started: Instant) {
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        self.stats.record_miss(elapsed_ms);
        counter!(METRIC_MISS).increment(1);
        debug!(key, outcome = "miss", elapsed_ms, "Cache lookup");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    const MINUTE: Duration = Duration::from_secs(60);

    fn service(capacity: u64) -> CacheService {
        CacheService::from_config(CacheConfig::memory_only(capacity)).expect("service")
    }

    #[tokio::test]
    async fn miss_then_hit() {
        let service = service(1024);
        let calls = Arc::new(AtomicUsize::new(0));

        for expected in [Outcome::Miss, Outcome::Hit] {
            let calls = Arc::clone(&calls);
            let served = service
                .fetch_with_cache("feed", MINUTE, move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, FetchError>(Bytes::from_static(b"<rss/>"))
                })
                .await
                .expect("served");
            assert_eq!(served.outcome, expected);
            assert_eq!(served.value, Bytes::from_static(b"<rss/>"));
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let stats = service.get_stats().expect("stats");
        assert_eq!((stats.total_hits, stats.total_misses), (1, 1));
        assert_eq!(stats.top_keys[0].count, 2);
    }

    #[tokio::test]
    async fn zero_ttl_rejected_before_fetch() {
        let service = service(1024);
        let err = service
            .fetch_with_cache("feed", Duration::ZERO, || async {
                Err(FetchError::msg("fetch must not run"))
            })
            .await
            .expect_err("invalid ttl");
        assert!(matches!(err, CacheError::InvalidTtl(_)));
        assert_eq!(service.get_stats().expect("stats").total_misses, 0);
    }

    #[tokio::test]
    async fn disabled_service_bypasses_cache() {
        let service = service(1024);
        service.disable();

        let served = service
            .fetch_with_cache("feed", MINUTE, || async {
                Ok::<_, FetchError>(Bytes::from_static(b"x"))
            })
            .await
            .expect("served");
        assert_eq!(served.outcome, Outcome::Bypass);
        assert!(matches!(service.get_stats(), Err(CacheError::Unavailable)));

        service.enable();
        let stats = service.get_stats().expect("stats");
        assert_eq!(stats.total_entries, 0);
        assert_eq!(stats.total_misses, 0);
    }

    #[tokio::test]
    async fn get_records_hit_and_miss() {
        let service = service(1024);
        assert!(service.get("feed").await.is_none());
        service
            .set("feed", Bytes::from_static(b"v"), MINUTE)
            .expect("set");
        assert_eq!(service.get("feed").await, Some(Bytes::from_static(b"v")));

        let stats = service.get_stats().expect("stats");
        assert_eq!((stats.total_hits, stats.total_misses), (1, 1));
    }

    #[tokio::test]
    async fn sweep_updates_last_cleanup() {
        let service = service(1024);
        let before = service.get_stats().expect("stats").last_cleanup;
        tokio::time::sleep(Duration::from_millis(5)).await;

        assert_eq!(service.sweep().await, 0);
        assert!(service.get_stats().expect("stats").last_cleanup > before);
    }
}
