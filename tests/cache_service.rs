use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;
use gazette::cache::{
    CacheConfig, CacheError, CacheService, FetchError, Outcome, PersistentTierKind, Tier,
};
use tempfile::TempDir;
use tokio::sync::Barrier;

const TTL: Duration = Duration::from_secs(60);

fn memory_cache(capacity: u64) -> Arc<CacheService> {
    Arc::new(CacheService::from_config(CacheConfig::memory_only(capacity)).expect("cache"))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_callers_share_one_fetch() {
    let cache = memory_cache(1024);
    let calls = Arc::new(AtomicUsize::new(0));
    let barrier = Arc::new(Barrier::new(8));

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let cache = Arc::clone(&cache);
        let calls = Arc::clone(&calls);
        let barrier = Arc::clone(&barrier);
        tasks.push(tokio::spawn(async move {
            barrier.wait().await;
            cache
                .fetch_with_cache("https://example.com/world.rss", TTL, move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    Ok::<_, FetchError>(Bytes::from_static(b"<rss/>"))
                })
                .await
        }));
    }

    for task in tasks {
        let served = task.await.expect("join").expect("served");
        assert_eq!(served.value, Bytes::from_static(b"<rss/>"));
    }

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(cache.tiers().in_flight_len(), 0);

    let stats = cache.get_stats().expect("stats");
    assert_eq!(stats.total_hits + stats.total_misses, 8);
    assert_eq!(stats.total_entries, 1);
    assert_eq!(stats.top_keys[0].count, 8);
}

#[tokio::test]
async fn overflow_is_demoted_to_disk_tier() {
    let dir = TempDir::new().expect("tempdir");
    let config = CacheConfig {
        memory_capacity_bytes: 100,
        persistent_tier: PersistentTierKind::Disk {
            directory: dir.path().to_path_buf(),
        },
        ..CacheConfig::default()
    };
    let cache = CacheService::from_config(config).expect("cache");

    for (key, size) in [("a", 60usize), ("b", 50usize)] {
        cache
            .fetch_with_cache(key, TTL, move || async move {
                Ok::<_, FetchError>(Bytes::from(vec![b'x'; size]))
            })
            .await
            .expect("served");
    }

    let stats = cache.get_stats().expect("stats");
    assert_eq!(stats.total_entries, 2);
    assert_eq!(stats.total_size, 110);
    assert_eq!(stats.storage_breakdown.memory, 50);
    assert_eq!(stats.storage_breakdown.persistent, 60);
}

#[tokio::test]
async fn memory_only_overflow_evicts_least_recent() {
    let cache = memory_cache(100);
    cache.set("a", Bytes::from(vec![b'x'; 60]), TTL).expect("set a");
    cache.set("b", Bytes::from(vec![b'y'; 50]), TTL).expect("set b");

    assert!(cache.get("a").await.is_none());
    assert_eq!(cache.get("b").await, Some(Bytes::from(vec![b'y'; 50])));
    assert_eq!(cache.get_stats().expect("stats").total_size, 50);
}

#[tokio::test]
async fn persistent_hit_reads_file_and_promotes() {
    let dir = TempDir::new().expect("tempdir");
    let config = CacheConfig {
        memory_capacity_bytes: 100,
        persistent_tier: PersistentTierKind::Disk {
            directory: dir.path().to_path_buf(),
        },
        ..CacheConfig::default()
    };
    let cache = CacheService::from_config(config).expect("cache");
    cache.set("a", Bytes::from(vec![b'a'; 60]), TTL).expect("set a");
    cache.set("b", Bytes::from(vec![b'b'; 50]), TTL).expect("set b");
    cache.tiers().flush();

    let served = cache
        .fetch_with_cache("a", TTL, || async {
            Err::<Bytes, _>(FetchError::msg("fetch must not run"))
        })
        .await
        .expect("persistent hit");
    assert_eq!(served.outcome, Outcome::Hit);
    assert_eq!(served.value, Bytes::from(vec![b'a'; 60]));
    assert_eq!(cache.tiers().tier_of("a"), Some(Tier::Memory));

    let stats = cache.get_stats().expect("stats");
    assert_eq!((stats.total_hits, stats.total_misses), (1, 0));
    assert_eq!(stats.storage_breakdown.memory, 60);
    assert_eq!(stats.storage_breakdown.persistent, 50);
}

#[tokio::test]
async fn expired_entries_leave_totals_before_sweep() {
    let cache = memory_cache(1024);
    cache
        .set("k", Bytes::from(vec![b'x'; 10]), Duration::from_millis(30))
        .expect("set");
    assert_eq!(cache.get_stats().expect("stats").total_entries, 1);

    tokio::time::sleep(Duration::from_millis(80)).await;

    let stats = cache.get_stats().expect("stats");
    assert_eq!(stats.total_entries, 0);
    assert_eq!(stats.total_size, 0);
    assert_eq!(stats.storage_breakdown.memory, 0);
    // Nothing has removed it yet; the sweep still finds it.
    assert_eq!(cache.sweep().await, 1);
}

#[tokio::test]
async fn failed_fetch_counts_a_miss_and_stores_nothing() {
    let cache = memory_cache(1024);

    let err = cache
        .fetch_with_cache("k", TTL, || async {
            Err::<Bytes, _>(FetchError::msg("upstream returned 500"))
        })
        .await
        .expect_err("fetch fails");
    assert!(matches!(err, CacheError::Fetch(_)));

    let stats = cache.get_stats().expect("stats");
    assert_eq!(stats.total_misses, 1);
    assert_eq!(stats.total_hits, 0);
    assert_eq!(stats.total_entries, 0);

    let served = cache
        .fetch_with_cache("k", TTL, || async {
            Ok::<_, FetchError>(Bytes::from_static(b"ok"))
        })
        .await
        .expect("retry fetches again");
    assert_eq!(served.outcome, Outcome::Miss);
}

#[tokio::test]
async fn rates_and_top_keys_follow_accesses() {
    let cache = memory_cache(1024);
    for key in ["a", "a", "a", "b", "b", "c"] {
        cache
            .fetch_with_cache(key, TTL, || async {
                Ok::<_, FetchError>(Bytes::from_static(b"v"))
            })
            .await
            .expect("served");
    }

    let stats = cache.get_stats().expect("stats");
    assert_eq!(stats.total_misses, 3);
    assert_eq!(stats.total_hits, 3);
    assert!((stats.hit_rate - 0.5).abs() < f64::EPSILON);
    assert!((stats.hit_rate + stats.miss_rate - 1.0).abs() < 1e-9);

    let keys: Vec<(&str, u64)> = stats
        .top_keys
        .iter()
        .map(|entry| (entry.key.as_str(), entry.count))
        .collect();
    assert_eq!(keys, vec![("a", 3), ("b", 2), ("c", 1)]);
    assert!(stats.top_keys.len() <= cache.config().top_keys_limit);
}

#[tokio::test]
async fn expired_entries_are_refetched_and_swept() {
    let cache = memory_cache(1024);
    let short = Duration::from_millis(50);
    let calls = Arc::new(AtomicUsize::new(0));

    let load = |calls: Arc<AtomicUsize>| {
        move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, FetchError>(Bytes::from_static(b"v"))
        }
    };

    cache
        .fetch_with_cache("k", short, load(Arc::clone(&calls)))
        .await
        .expect("first");
    cache.set("other", Bytes::from_static(b"w"), short).expect("set");
    tokio::time::sleep(Duration::from_millis(120)).await;

    let served = cache
        .fetch_with_cache("k", TTL, load(Arc::clone(&calls)))
        .await
        .expect("second");
    assert_eq!(served.outcome, Outcome::Miss);
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    let before = cache.get_stats().expect("stats").last_cleanup;
    assert_eq!(cache.sweep().await, 1);
    let stats = cache.get_stats().expect("stats");
    assert_eq!(stats.total_entries, 1);
    assert!(stats.last_cleanup >= before);
}

#[tokio::test]
async fn abandoned_caller_still_populates_cache() {
    let cache = memory_cache(1024);

    let caller = {
        let cache = Arc::clone(&cache);
        tokio::spawn(async move {
            cache
                .fetch_with_cache("slow", TTL, || async {
                    tokio::time::sleep(Duration::from_millis(80)).await;
                    Ok::<_, FetchError>(Bytes::from_static(b"late"))
                })
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    caller.abort();
    let _ = caller.await;

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(
        cache.tiers().get("slow").await,
        Some(Bytes::from_static(b"late"))
    );
    assert_eq!(cache.tiers().in_flight_len(), 0);
}

#[tokio::test]
async fn disabled_service_bypasses_and_hides_stats() {
    let cache = memory_cache(1024);
    cache.disable();

    let served = cache
        .fetch_with_cache("k", TTL, || async {
            Ok::<_, FetchError>(Bytes::from_static(b"v"))
        })
        .await
        .expect("bypass");
    assert_eq!(served.outcome, Outcome::Bypass);
    assert!(matches!(cache.get_stats(), Err(CacheError::Unavailable)));

    cache.enable();
    let stats = cache.get_stats().expect("stats");
    assert_eq!(stats.total_entries, 0);
    assert_eq!(stats.total_hits + stats.total_misses, 0);
}

#[tokio::test]
async fn zero_ttl_is_rejected_before_fetching() {
    let cache = memory_cache(1024);
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);

    let err = cache
        .fetch_with_cache("k", Duration::ZERO, move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<_, FetchError>(Bytes::from_static(b"v"))
        })
        .await
        .expect_err("zero ttl");
    assert!(matches!(err, CacheError::InvalidTtl(_)));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}
