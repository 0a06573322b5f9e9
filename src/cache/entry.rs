//! Cache entry model.

use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use time::OffsetDateTime;

use super::error::CacheError;

/// Storage tier currently holding an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    Memory,
    Persistent,
}

impl Tier {
    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Memory => "memory",
            Tier::Persistent => "persistent",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bookkeeping for an entry, without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryMeta {
    pub created_at: OffsetDateTime,
    pub expires_at: OffsetDateTime,
    pub size_bytes: u64,
    pub access_count: u64,
}

impl EntryMeta {
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        self.expires_at <= now
    }

    /// Whether both describe the same stored write, ignoring access counts.
    pub fn same_version(&self, other: &EntryMeta) -> bool {
        self.created_at == other.created_at
            && self.expires_at == other.expires_at
            && self.size_bytes == other.size_bytes
    }
}

/// A cached payload together with its lifetime and access bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub key: String,
    pub value: Bytes,
    pub tier: Tier,
    pub created_at: OffsetDateTime,
    pub expires_at: OffsetDateTime,
    pub size_bytes: u64,
    pub access_count: u64,
}

impl CacheEntry {
    /// Build a fresh memory-tier entry living for `ttl` from `now`.
    pub fn new(
        key: impl Into<String>,
        value: Bytes,
        now: OffsetDateTime,
        ttl: Duration,
    ) -> Result<Self, CacheError> {
        let expires_at = expiry_for(now, ttl)?;
        let size_bytes = value.len() as u64;
        Ok(Self {
            key: key.into(),
            value,
            tier: Tier::Memory,
            created_at: now,
            expires_at,
            size_bytes,
            access_count: 0,
        })
    }

    /// Reassemble an entry from a tier's metadata and payload.
    pub fn from_stored(key: impl Into<String>, value: Bytes, meta: EntryMeta, tier: Tier) -> Self {
        Self {
            key: key.into(),
            value,
            tier,
            created_at: meta.created_at,
            expires_at: meta.expires_at,
            size_bytes: meta.size_bytes,
            access_count: meta.access_count,
        }
    }

    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        self.expires_at <= now
    }

    pub fn meta(&self) -> EntryMeta {
        EntryMeta {
            created_at: self.created_at,
            expires_at: self.expires_at,
            size_bytes: self.size_bytes,
            access_count: self.access_count,
        }
    }
}

/// `now + ttl`, rejecting zero and out-of-range durations.
pub(crate) fn expiry_for(now: OffsetDateTime, ttl: Duration) -> Result<OffsetDateTime, CacheError> {
    if ttl.is_zero() {
        return Err(CacheError::InvalidTtl(ttl));
    }
    time::Duration::try_from(ttl)
        .ok()
        .and_then(|ttl| now.checked_add(ttl))
        .ok_or(CacheError::InvalidTtl(ttl))
}
