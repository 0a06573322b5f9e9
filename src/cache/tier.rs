//! Storage backends for the tiered cache.
//!
//! Both tiers implement [`TierBackend`]; the tiered cache talks to the trait
//! and configuration decides which backend sits in the persistent slot.
//!
//! Backends are called with the entry-table lock held, so they only touch
//! their in-memory index. Blocking storage work is handed back as a
//! [`PayloadRead`] or a [`TierJob`] and runs after the lock is released.

use std::path::PathBuf;

use bytes::Bytes;
use lru::LruCache;

use super::entry::{CacheEntry, EntryMeta, Tier};
use super::error::TierError;

/// Byte-bounded key/value storage.
///
/// Backends do not enforce their own capacity on insert beyond refusing
/// writes they cannot hold; the tiered cache decides what to evict first.
pub trait TierBackend: Send {
    /// Short name used in logs and metrics.
    fn name(&self) -> &'static str;

    fn capacity_bytes(&self) -> u64;

    /// Sum of `size_bytes` over stored entries.
    fn size_bytes(&self) -> u64;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes that can still be inserted without exceeding capacity.
    fn free_bytes(&self) -> u64 {
        self.capacity_bytes().saturating_sub(self.size_bytes())
    }

    /// Size of the entry stored under `key`, if any.
    fn size_of(&self, key: &str) -> Option<u64> {
        self.peek_meta(key).map(|meta| meta.size_bytes)
    }

    /// Metadata without touching recency.
    fn peek_meta(&self, key: &str) -> Option<EntryMeta>;

    /// Key and metadata of every stored entry, in no particular order.
    fn list_meta(&self) -> Vec<(String, EntryMeta)>;

    /// Mark an entry most recently used, bump its access count and hand out its payload.
    fn get(&mut self, key: &str) -> Option<Stored>;

    /// Store an entry, replacing any previous value under the same key.
    fn insert(&mut self, entry: CacheEntry) -> Result<Vec<TierJob>, TierError>;

    /// Drop an entry from the index.
    fn remove(&mut self, key: &str) -> Option<Removed>;

    fn clear(&mut self) -> Vec<TierJob>;
}

/// Payload of a stored entry.
pub enum Payload {
    /// Bytes already in hand.
    Resident(Bytes),
    /// Bytes that still have to be read from storage.
    Deferred(PayloadRead),
}

/// What [`TierBackend::get`] hands out.
pub struct Stored {
    pub meta: EntryMeta,
    pub payload: Payload,
}

/// What [`TierBackend::remove`] leaves behind.
pub struct Removed {
    pub meta: EntryMeta,
    /// Storage cleanup for the removed entry, if the backend keeps any.
    pub cleanup: Option<TierJob>,
}

type ReadFn = Box<dyn FnOnce() -> Result<Bytes, TierError> + Send>;
type JobFn = Box<dyn FnOnce() -> Result<(), TierError> + Send>;

/// Blocking read of one stored payload.
pub struct PayloadRead(ReadFn);

impl PayloadRead {
    pub fn new(read: impl FnOnce() -> Result<Bytes, TierError> + Send + 'static) -> Self {
        Self(Box::new(read))
    }

    pub fn run(self) -> Result<Bytes, TierError> {
        (self.0)()
    }
}

/// What a [`TierJob`] does, for logging and failure handling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobKind {
    /// Persist an entry already present in the index. A failed write drops
    /// that entry from the index.
    Write { key: String, meta: EntryMeta },
    /// Delete storage of an entry no longer in the index.
    Delete { path: PathBuf },
}

/// Blocking storage work queued while the entry-table lock was held.
pub struct TierJob {
    pub(crate) kind: JobKind,
    pub(crate) run: JobFn,
}

impl std::fmt::Debug for TierJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TierJob").field("kind", &self.kind).finish_non_exhaustive()
    }
}

impl TierJob {
    pub fn new(kind: JobKind, run: impl FnOnce() -> Result<(), TierError> + Send + 'static) -> Self {
        Self {
            kind,
            run: Box::new(run),
        }
    }

    pub fn kind(&self) -> &JobKind {
        &self.kind
    }

    pub fn run(self) -> Result<(), TierError> {
        (self.run)()
    }
}

/// In-process tier backed by an unbounded LRU list and a byte counter.
pub struct MemoryTier {
    entries: LruCache<String, CacheEntry>,
    capacity_bytes: u64,
    size_bytes: u64,
}

impl MemoryTier {
    pub fn new(capacity_bytes: u64) -> Self {
        Self {
            entries: LruCache::unbounded(),
            capacity_bytes,
            size_bytes: 0,
        }
    }

    /// Remove and return the least recently used entry.
    pub fn pop_lru(&mut self) -> Option<CacheEntry> {
        self.entries.pop_lru().map(|(_, entry)| {
            self.size_bytes -= entry.size_bytes;
            entry
        })
    }
}

impl TierBackend for MemoryTier {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn capacity_bytes(&self) -> u64 {
        self.capacity_bytes
    }

    fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn peek_meta(&self, key: &str) -> Option<EntryMeta> {
        self.entries.peek(key).map(CacheEntry::meta)
    }

    fn list_meta(&self) -> Vec<(String, EntryMeta)> {
        self.entries
            .iter()
            .map(|(key, entry)| (key.clone(), entry.meta()))
            .collect()
    }

    fn get(&mut self, key: &str) -> Option<Stored> {
        self.entries.get_mut(key).map(|entry| {
            entry.access_count += 1;
            Stored {
                meta: entry.meta(),
                payload: Payload::Resident(entry.value.clone()),
            }
        })
    }

    fn insert(&mut self, mut entry: CacheEntry) -> Result<Vec<TierJob>, TierError> {
        entry.tier = Tier::Memory;
        let size = entry.size_bytes;
        if let Some(previous) = self.entries.put(entry.key.clone(), entry) {
            self.size_bytes -= previous.size_bytes;
        }
        self.size_bytes += size;
        Ok(Vec::new())
    }

    fn remove(&mut self, key: &str) -> Option<Removed> {
        self.entries.pop(key).map(|entry| {
            self.size_bytes -= entry.size_bytes;
            Removed {
                meta: entry.meta(),
                cleanup: None,
            }
        })
    }

    fn clear(&mut self) -> Vec<TierJob> {
        self.entries.clear();
        self.size_bytes = 0;
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use time::OffsetDateTime;

    use super::*;

    fn entry(key: &str, size: usize) -> CacheEntry {
        CacheEntry::new(
            key,
            Bytes::from(vec![b'x'; size]),
            OffsetDateTime::now_utc(),
            Duration::from_secs(60),
        )
        .expect("entry")
    }

    #[test]
    fn tracks_size_across_overwrite_and_remove() {
        let mut tier = MemoryTier::new(1024);
        tier.insert(entry("a", 10)).expect("insert");
        tier.insert(entry("b", 20)).expect("insert");
        assert_eq!(tier.size_bytes(), 30);

        tier.insert(entry("a", 5)).expect("overwrite");
        assert_eq!(tier.size_bytes(), 25);
        assert_eq!(tier.size_of("a"), Some(5));

        let removed = tier.remove("b").expect("removed");
        assert_eq!(removed.meta.size_bytes, 20);
        assert!(removed.cleanup.is_none());
        assert_eq!(tier.size_bytes(), 5);
        assert_eq!(tier.len(), 1);
        assert_eq!(tier.free_bytes(), 1019);
    }

    #[test]
    fn get_refreshes_recency_and_counts_access() {
        let mut tier = MemoryTier::new(1024);
        tier.insert(entry("a", 1)).expect("insert");
        tier.insert(entry("b", 1)).expect("insert");

        let read = tier.get("a").expect("present");
        assert_eq!(read.meta.access_count, 1);
        assert!(matches!(read.payload, Payload::Resident(ref value) if value.len() == 1));

        let lru = tier.pop_lru().expect("entry");
        assert_eq!(lru.key, "b");
    }

    #[test]
    fn peek_does_not_refresh_recency() {
        let mut tier = MemoryTier::new(1024);
        tier.insert(entry("a", 1)).expect("insert");
        tier.insert(entry("b", 1)).expect("insert");

        assert!(tier.peek_meta("a").is_some());
        let lru = tier.pop_lru().expect("entry");
        assert_eq!(lru.key, "a");
        assert_eq!(tier.size_bytes(), 1);
    }

    #[test]
    fn memory_tier_never_queues_storage_jobs() {
        let mut tier = MemoryTier::new(1024);
        assert!(tier.insert(entry("a", 8)).expect("insert").is_empty());
        assert!(tier.clear().is_empty());
        assert!(tier.is_empty());
    }
}
