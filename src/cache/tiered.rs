//! Two-tier entry table.
//!
//! A bounded memory tier sits in front of an optional persistent tier. Memory
//! overflow demotes least-recently-used entries into the persistent tier;
//! persistent hits are promoted back. A key lives in at most one tier.
//!
//! The entry table, the expiry index and the in-flight fetch registry share
//! one mutex, so lookup-and-claim is a single critical section. Payload reads
//! from the persistent tier happen after that lock is released, and writes
//! and deletes are queued to a [`TierWorker`] thread.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use bytes::Bytes;
use metrics::counter;
use time::OffsetDateTime;
use tracing::{debug, warn};

use super::config::{CacheConfig, PersistentTierKind};
use super::disk::DiskTier;
use super::entry::{CacheEntry, EntryMeta, Tier};
use super::error::{CacheError, TierError};
use super::inflight::{Claim, InFlight, SharedFetch};
use super::lock::mutex_lock;
use super::tier::{MemoryTier, Payload, PayloadRead, TierBackend, TierJob};
use super::worker::{TierWorker, WriteFailed};

const SOURCE: &str = "cache::tiered";

const METRIC_EVICT: &str = "gazette_cache_evict_total";
const METRIC_DEMOTE: &str = "gazette_cache_demote_total";
const METRIC_PROMOTE: &str = "gazette_cache_promote_total";
const METRIC_EXPIRED: &str = "gazette_cache_expired_total";

/// Entry counts and byte totals across both tiers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TierTotals {
    pub memory_entries: usize,
    pub memory_bytes: u64,
    pub persistent_entries: usize,
    pub persistent_bytes: u64,
}

impl TierTotals {
    pub fn entries(&self) -> usize {
        self.memory_entries + self.persistent_entries
    }

    pub fn bytes(&self) -> u64 {
        self.memory_bytes + self.persistent_bytes
    }

    fn tier_mut(&mut self, tier: Tier) -> (&mut usize, &mut u64) {
        match tier {
            Tier::Memory => (&mut self.memory_entries, &mut self.memory_bytes),
            Tier::Persistent => (&mut self.persistent_entries, &mut self.persistent_bytes),
        }
    }
}

/// Outcome of one sweep batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepBatch {
    /// Expiry-index records consumed.
    pub scanned: usize,
    /// Entries actually deleted from a tier.
    pub removed: usize,
}

/// A live entry whose payload has to be read from storage before use.
pub(crate) struct PendingLoad {
    target: LoadTarget,
    read: PayloadRead,
}

struct LoadTarget {
    key: String,
    tier: Tier,
    meta: EntryMeta,
    promote: bool,
}

enum Lookup {
    Hit(CacheEntry),
    Load(PendingLoad),
    Miss,
}

pub struct TieredCache {
    state: Arc<Mutex<TableState>>,
    worker: Option<TierWorker>,
}

struct TableState {
    memory: MemoryTier,
    persistent: Option<Box<dyn TierBackend>>,
    expiry: BTreeSet<(OffsetDateTime, String)>,
    in_flight: HashMap<String, InFlight>,
    next_fetch_id: u64,
    last_cleanup: OffsetDateTime,
    /// Storage work to hand to the worker once the lock is released.
    jobs: Vec<TierJob>,
}

impl TieredCache {
    pub fn new(
        memory: MemoryTier,
        persistent: Option<Box<dyn TierBackend>>,
    ) -> Result<Self, TierError> {
        let mut expiry = BTreeSet::new();
        for (key, meta) in memory.list_meta() {
            expiry.insert((meta.expires_at, key));
        }
        if let Some(tier) = persistent.as_ref() {
            for (key, meta) in tier.list_meta() {
                expiry.insert((meta.expires_at, key));
            }
        }

        let has_persistent = persistent.is_some();
        let state = Arc::new(Mutex::new(TableState {
            memory,
            persistent,
            expiry,
            in_flight: HashMap::new(),
            next_fetch_id: 0,
            last_cleanup: OffsetDateTime::now_utc(),
            jobs: Vec::new(),
        }));
        let worker = if has_persistent {
            Some(TierWorker::spawn(drop_failed_writes(Arc::downgrade(&state)))?)
        } else {
            None
        };

        Ok(Self { state, worker })
    }

    /// Build the tiers named by `config`, opening the persistent directory if any.
    pub fn from_config(config: &CacheConfig) -> Result<Self, TierError> {
        let memory = MemoryTier::new(config.memory_capacity_bytes);
        let persistent: Option<Box<dyn TierBackend>> = match &config.persistent_tier {
            PersistentTierKind::None => None,
            PersistentTierKind::Disk { directory } => Some(Box::new(DiskTier::open(
                directory.clone(),
                config.persistent_capacity_bytes,
            )?)),
        };
        Self::new(memory, persistent)
    }

    pub async fn get(&self, key: &str) -> Option<Bytes> {
        self.get_at(key, OffsetDateTime::now_utc())
            .await
            .map(|entry| entry.value)
    }

    /// Look `key` up as of `now`, promoting persistent hits.
    pub async fn get_at(&self, key: &str, now: OffsetDateTime) -> Option<CacheEntry> {
        match self.with_state("get", |state| state.lookup(key, now)) {
            Lookup::Hit(entry) => Some(entry),
            Lookup::Load(pending) => self.load(pending, now).await,
            Lookup::Miss => None,
        }
    }

    /// Read a stored payload on the blocking pool, then promote it if the
    /// entry is still the one that was looked up.
    pub(crate) async fn load(&self, pending: PendingLoad, now: OffsetDateTime) -> Option<CacheEntry> {
        let PendingLoad { target, read } = pending;
        let result = tokio::task::spawn_blocking(move || read.run())
            .await
            .unwrap_or_else(|err| Err(TierError::Io(std::io::Error::other(err))));
        self.with_state("load", |state| state.finish_load(&target, result, now))
    }

    pub fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<(), CacheError> {
        self.set_at(key, value, ttl, OffsetDateTime::now_utc())
    }

    pub fn set_at(
        &self,
        key: &str,
        value: Bytes,
        ttl: Duration,
        now: OffsetDateTime,
    ) -> Result<(), CacheError> {
        let entry = CacheEntry::new(key, value, now, ttl)?;
        self.with_state("set", |state| state.place(entry, now));
        Ok(())
    }

    /// Remove `key` from whichever tier holds it. Returns whether anything was removed.
    pub fn invalidate(&self, key: &str) -> bool {
        self.with_state("invalidate", |state| state.discard(key))
    }

    /// Tier currently holding `key`, without touching recency.
    pub fn tier_of(&self, key: &str) -> Option<Tier> {
        mutex_lock(&*self.state, SOURCE, "tier_of").tier_of(key)
    }

    /// Remove up to `limit` entries whose expiry is at or before `now`.
    pub fn sweep_batch(&self, now: OffsetDateTime, limit: usize) -> SweepBatch {
        let batch = self.with_state("sweep_batch", |state| state.sweep_due(now, limit));
        if batch.removed > 0 {
            counter!(METRIC_EXPIRED).increment(batch.removed as u64);
        }
        batch
    }

    /// Sweep everything expired as of `now`, releasing the lock between batches.
    pub fn sweep_at(&self, now: OffsetDateTime, batch_size: usize) -> usize {
        let batch_size = batch_size.max(1);
        let mut removed = 0;
        loop {
            let batch = self.sweep_batch(now, batch_size);
            removed += batch.removed;
            if batch.scanned < batch_size {
                break;
            }
        }
        self.mark_cleanup(now);
        removed
    }

    pub fn sweep(&self, batch_size: usize) -> usize {
        self.sweep_at(OffsetDateTime::now_utc(), batch_size)
    }

    pub(crate) fn mark_cleanup(&self, at: OffsetDateTime) {
        mutex_lock(&*self.state, SOURCE, "mark_cleanup").last_cleanup = at;
    }

    pub fn last_cleanup(&self) -> OffsetDateTime {
        mutex_lock(&*self.state, SOURCE, "last_cleanup").last_cleanup
    }

    /// Counts and sizes of entries still live at `now`.
    ///
    /// Entries past their expiry are left out even before a sweep or a
    /// lookup has removed them.
    pub fn totals(&self, now: OffsetDateTime) -> TierTotals {
        mutex_lock(&*self.state, SOURCE, "totals").live_totals(now)
    }

    /// Drop every stored entry. In-flight fetches are left alone.
    pub fn clear(&self) {
        self.with_state("clear", TableState::clear);
    }

    /// Block until queued persistent-tier writes and deletes have finished.
    pub fn flush(&self) {
        if let Some(worker) = self.worker.as_ref() {
            worker.flush();
        }
    }

    /// Return a live value, join a pending fetch, or register a new one built by `start`.
    ///
    /// `start` receives the registration id and runs under the table lock. It
    /// comes back unused with [`Claim::Load`].
    pub(crate) fn claim<F>(&self, key: &str, now: OffsetDateTime, start: F) -> Claim<F>
    where
        F: FnOnce(u64) -> SharedFetch,
    {
        self.with_state("claim", |state| {
            match state.lookup(key, now) {
                Lookup::Hit(entry) => return Claim::Hit(entry.value),
                Lookup::Load(pending) => return Claim::Load(pending, start),
                Lookup::Miss => {}
            }
            if let Some(pending) = state.in_flight.get(key) {
                return Claim::Wait(pending.fetch.clone());
            }

            state.next_fetch_id += 1;
            let id = state.next_fetch_id;
            let fetch = start(id);
            state.in_flight.insert(
                key.to_string(),
                InFlight {
                    id,
                    fetch: fetch.clone(),
                },
            );
            Claim::Lead(fetch)
        })
    }

    pub(crate) fn release_in_flight(&self, key: &str, id: u64) {
        let mut state = mutex_lock(&*self.state, SOURCE, "release_in_flight");
        if state.in_flight.get(key).is_some_and(|pending| pending.id == id) {
            state.in_flight.remove(key);
        }
    }

    pub fn in_flight_len(&self) -> usize {
        mutex_lock(&*self.state, SOURCE, "in_flight_len").in_flight.len()
    }

    /// Run `op` under the table lock, then hand any queued storage work to the worker.
    fn with_state<R>(&self, op: &'static str, op_fn: impl FnOnce(&mut TableState) -> R) -> R {
        let mut state = mutex_lock(&*self.state, SOURCE, op);
        let result = op_fn(&mut state);
        let jobs = std::mem::take(&mut state.jobs);
        drop(state);

        if let Some(worker) = self.worker.as_ref() {
            worker.submit(jobs);
        }
        result
    }
}

/// Forget a persistent entry whose file could not be written.
fn drop_failed_writes(state: Weak<Mutex<TableState>>) -> WriteFailed {
    Box::new(move |key: &str, meta: EntryMeta| {
        let Some(state) = state.upgrade() else {
            return Vec::new();
        };
        let mut state = mutex_lock(&*state, SOURCE, "write_failed");
        if state.is_current(Tier::Persistent, key, &meta) {
            state.discard(key);
        }
        std::mem::take(&mut state.jobs)
    })
}

impl TableState {
    fn backend(&self, tier: Tier) -> Option<&(dyn TierBackend + 'static)> {
        match tier {
            Tier::Memory => Some(&self.memory as &(dyn TierBackend + 'static)),
            Tier::Persistent => self.persistent.as_deref(),
        }
    }

    fn backend_mut(&mut self, tier: Tier) -> Option<&mut (dyn TierBackend + 'static)> {
        match tier {
            Tier::Memory => Some(&mut self.memory as &mut (dyn TierBackend + 'static)),
            Tier::Persistent => self.persistent.as_deref_mut(),
        }
    }

    fn tier_of(&self, key: &str) -> Option<Tier> {
        [Tier::Memory, Tier::Persistent]
            .into_iter()
            .find(|tier| {
                self.backend(*tier)
                    .is_some_and(|backend| backend.peek_meta(key).is_some())
            })
    }

    fn is_current(&self, tier: Tier, key: &str, meta: &EntryMeta) -> bool {
        self.backend(tier)
            .and_then(|backend| backend.peek_meta(key))
            .is_some_and(|stored| stored.same_version(meta))
    }

    fn lookup(&mut self, key: &str, now: OffsetDateTime) -> Lookup {
        let Some(tier) = self.tier_of(key) else {
            return Lookup::Miss;
        };
        let Some(meta) = self.backend(tier).and_then(|backend| backend.peek_meta(key)) else {
            return Lookup::Miss;
        };
        if meta.is_expired(now) {
            self.expire(key);
            return Lookup::Miss;
        }

        let promote = tier == Tier::Persistent && meta.size_bytes <= self.memory.capacity_bytes();
        let Some(stored) = self.backend_mut(tier).and_then(|backend| backend.get(key)) else {
            return Lookup::Miss;
        };
        match stored.payload {
            Payload::Resident(value) => {
                let entry = CacheEntry::from_stored(key, value, stored.meta, tier);
                if promote {
                    Lookup::Hit(self.promote(entry, now))
                } else {
                    Lookup::Hit(entry)
                }
            }
            Payload::Deferred(read) => Lookup::Load(PendingLoad {
                target: LoadTarget {
                    key: key.to_string(),
                    tier,
                    meta: stored.meta,
                    promote,
                },
                read,
            }),
        }
    }

    fn finish_load(
        &mut self,
        target: &LoadTarget,
        result: Result<Bytes, TierError>,
        now: OffsetDateTime,
    ) -> Option<CacheEntry> {
        let current = self.is_current(target.tier, &target.key, &target.meta);
        match result {
            Ok(value) => {
                let entry = CacheEntry::from_stored(&*target.key, value, target.meta, target.tier);
                if target.promote && current {
                    Some(self.promote(entry, now))
                } else {
                    Some(entry)
                }
            }
            Err(err) => {
                warn!(key = %target.key, tier = %target.tier, error = %err, "Cache read failed");
                if current {
                    self.discard(&target.key);
                }
                None
            }
        }
    }

    fn promote(&mut self, entry: CacheEntry, now: OffsetDateTime) -> CacheEntry {
        counter!(METRIC_PROMOTE).increment(1);
        debug!(key = %entry.key, size_bytes = entry.size_bytes, "Promoted entry to memory tier");
        let entry = CacheEntry {
            tier: Tier::Memory,
            ..entry
        };
        self.place(entry.clone(), now);
        entry
    }

    /// Insert into the memory tier, evicting least-recently-used entries until it fits.
    fn place(&mut self, mut entry: CacheEntry, now: OffsetDateTime) {
        entry.tier = Tier::Memory;
        self.discard(&entry.key);

        while self.memory.size_bytes() + entry.size_bytes > self.memory.capacity_bytes() {
            let Some(victim) = self.memory.pop_lru() else {
                break;
            };
            self.expiry.remove(&(victim.expires_at, victim.key.clone()));
            counter!(METRIC_EVICT).increment(1);
            if victim.is_expired(now) {
                counter!(METRIC_EXPIRED).increment(1);
                continue;
            }
            self.demote(victim);
        }

        let indexed = (entry.expires_at, entry.key.clone());
        match self.memory.insert(entry) {
            Ok(jobs) => {
                self.jobs.extend(jobs);
                self.expiry.insert(indexed);
            }
            Err(err) => warn!(key = %indexed.1, error = %err, "Cache write failed"),
        }
    }

    fn demote(&mut self, victim: CacheEntry) {
        let Some(tier) = self.persistent.as_mut() else {
            debug!(key = %victim.key, "Evicted entry dropped, no persistent tier");
            return;
        };
        if victim.size_bytes > tier.free_bytes() {
            debug!(
                key = %victim.key,
                size_bytes = victim.size_bytes,
                free_bytes = tier.free_bytes(),
                "Evicted entry dropped, persistent tier full"
            );
            return;
        }

        let indexed = (victim.expires_at, victim.key.clone());
        match tier.insert(victim) {
            Ok(jobs) => {
                self.jobs.extend(jobs);
                self.expiry.insert(indexed);
                counter!(METRIC_DEMOTE).increment(1);
            }
            Err(err) => warn!(
                key = %indexed.1,
                tier = tier.name(),
                error = %err,
                "Evicted entry dropped, persistent tier refused it"
            ),
        }
    }

    fn expire(&mut self, key: &str) {
        if self.discard(key) {
            counter!(METRIC_EXPIRED).increment(1);
        }
    }

    /// Remove `key` from both tiers and the expiry index.
    fn discard(&mut self, key: &str) -> bool {
        let mut removed = false;
        for tier in [Tier::Memory, Tier::Persistent] {
            let Some(gone) = self.backend_mut(tier).and_then(|backend| backend.remove(key)) else {
                continue;
            };
            self.expiry.remove(&(gone.meta.expires_at, key.to_string()));
            self.jobs.extend(gone.cleanup);
            removed = true;
        }
        removed
    }

    fn sweep_due(&mut self, now: OffsetDateTime, limit: usize) -> SweepBatch {
        let mut batch = SweepBatch::default();
        while batch.scanned < limit {
            let due = self
                .expiry
                .first()
                .is_some_and(|(expires_at, _)| *expires_at <= now);
            if !due {
                break;
            }
            let Some((_, key)) = self.expiry.pop_first() else {
                break;
            };
            batch.scanned += 1;
            if self.discard(&key) {
                batch.removed += 1;
            }
        }
        batch
    }

    fn live_totals(&self, now: OffsetDateTime) -> TierTotals {
        let mut totals = TierTotals::default();
        for tier in [Tier::Memory, Tier::Persistent] {
            if let Some(backend) = self.backend(tier) {
                let (entries, bytes) = totals.tier_mut(tier);
                *entries = backend.len();
                *bytes = backend.size_bytes();
            }
        }

        let due = self
            .expiry
            .iter()
            .take_while(|(expires_at, _)| *expires_at <= now);
        for (expires_at, key) in due {
            let Some(tier) = self.tier_of(key) else {
                continue;
            };
            let Some(meta) = self.backend(tier).and_then(|backend| backend.peek_meta(key)) else {
                continue;
            };
            if meta.expires_at != *expires_at {
                continue;
            }
            let (entries, bytes) = totals.tier_mut(tier);
            *entries = entries.saturating_sub(1);
            *bytes = bytes.saturating_sub(meta.size_bytes);
        }
        totals
    }

    fn clear(&mut self) {
        let jobs = self.memory.clear();
        self.jobs.extend(jobs);
        if let Some(tier) = self.persistent.as_mut() {
            self.jobs.extend(tier.clear());
        }
        self.expiry.clear();
    }
}
