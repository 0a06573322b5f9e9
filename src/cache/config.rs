//! Cache configuration.
//!
//! Built from the `[cache]` section of `gazette.toml`.

use std::path::PathBuf;
use std::time::Duration;

const MIB: u64 = 1024 * 1024;

// Default values for cache configuration
const DEFAULT_MEMORY_CAPACITY_BYTES: u64 = 64 * MIB;
const DEFAULT_PERSISTENT_CAPACITY_BYTES: u64 = 256 * MIB;
const DEFAULT_TTL_SECONDS: u64 = 300;
const DEFAULT_SWEEP_INTERVAL_SECONDS: u64 = 60;
const DEFAULT_SWEEP_BATCH_SIZE: usize = 256;
const DEFAULT_RESPONSE_TIME_WINDOW: usize = 1000;
const DEFAULT_TOP_KEYS_LIMIT: usize = 10;

/// Backend placed behind the memory tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistentTierKind {
    None,
    Disk { directory: PathBuf },
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Byte capacity of the memory tier.
    pub memory_capacity_bytes: u64,
    pub persistent_tier: PersistentTierKind,
    /// Byte capacity of the persistent tier, if any.
    pub persistent_capacity_bytes: u64,
    /// TTL applied when a caller does not supply one.
    pub default_ttl: Duration,
    /// Period of the background expiry sweep.
    pub sweep_interval: Duration,
    /// Expired entries removed per lock acquisition during a sweep.
    pub sweep_batch_size: usize,
    /// Response-time samples kept for the running mean.
    pub response_time_window: usize,
    /// Length of `topKeys` in stats snapshots.
    pub top_keys_limit: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            memory_capacity_bytes: DEFAULT_MEMORY_CAPACITY_BYTES,
            persistent_tier: PersistentTierKind::None,
            persistent_capacity_bytes: DEFAULT_PERSISTENT_CAPACITY_BYTES,
            default_ttl: Duration::from_secs(DEFAULT_TTL_SECONDS),
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECONDS),
            sweep_batch_size: DEFAULT_SWEEP_BATCH_SIZE,
            response_time_window: DEFAULT_RESPONSE_TIME_WINDOW,
            top_keys_limit: DEFAULT_TOP_KEYS_LIMIT,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        let persistent_tier = match &settings.persistent_tier {
            crate::config::PersistentTierSetting::None => PersistentTierKind::None,
            crate::config::PersistentTierSetting::Disk { directory } => PersistentTierKind::Disk {
                directory: directory.clone(),
            },
        };
        Self {
            memory_capacity_bytes: settings.memory_capacity_bytes.get(),
            persistent_tier,
            persistent_capacity_bytes: settings.persistent_capacity_bytes.get(),
            default_ttl: settings.default_ttl,
            sweep_interval: settings.sweep_interval,
            sweep_batch_size: settings.sweep_batch_size.get(),
            response_time_window: settings.response_time_window.get(),
            top_keys_limit: settings.top_keys_limit.get(),
        }
    }
}

impl CacheConfig {
    /// Config for a memory-only cache of the given size, other values default.
    pub fn memory_only(capacity_bytes: u64) -> Self {
        Self {
            memory_capacity_bytes: capacity_bytes,
            ..Self::default()
        }
    }

    pub fn has_persistent_tier(&self) -> bool {
        !matches!(self.persistent_tier, PersistentTierKind::None)
    }
}
