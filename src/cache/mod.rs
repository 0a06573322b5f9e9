//! Gazette Cache System
//!
//! Fronts slow feed fetches with a two-tier cache:
//!
//! - **Memory tier**: byte-bounded LRU held in process
//! - **Persistent tier**: optional on-disk store receiving memory evictions
//!
//! [`CacheService`] is the only type handlers touch. It deduplicates
//! concurrent fetches of one key, stores results, and keeps hit/miss,
//! latency and per-key access statistics.
//!
//! ## Configuration
//!
//! Cache behavior is controlled via `gazette.toml`:
//!
//! ```toml
//! [cache]
//! memory_capacity_bytes = 67108864
//! persistent_tier = "disk"
//! persistent_directory = "var/cache"
//! default_ttl_seconds = 300
//! # ... see config.rs for all options
//! ```

mod config;
mod disk;
mod entry;
mod error;
mod inflight;
mod lock;
mod service;
mod stats;
mod tier;
mod tiered;
mod worker;

pub use config::{CacheConfig, PersistentTierKind};
pub use disk::DiskTier;
pub use entry::{CacheEntry, EntryMeta, Tier};
pub use error::{CacheError, FetchError, TierError};
pub use service::{CacheService, Outcome, Served};
pub use stats::{CacheStats, KeyCount, StatsAggregator, StatsSnapshot, StorageBreakdown};
pub use tier::{
    JobKind, MemoryTier, Payload, PayloadRead, Removed, Stored, TierBackend, TierJob,
};
pub use tiered::{SweepBatch, TierTotals, TieredCache};
