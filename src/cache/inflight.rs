use std::sync::Arc;

use bytes::Bytes;
use futures::future::{BoxFuture, Shared};

use super::error::CacheError;
use super::tiered::{PendingLoad, TieredCache};

/// Completion handle shared by every caller waiting on one upstream fetch.
pub(crate) type SharedFetch = Shared<BoxFuture<'static, Result<Bytes, CacheError>>>;

pub(crate) struct InFlight {
    pub(crate) id: u64,
    pub(crate) fetch: SharedFetch,
}

/// Result of looking a key up while holding the entry-table lock.
///
/// `F` is the fetch starter, handed back unused when the caller must first
/// read a stored payload and may still need to fetch afterwards.
pub(crate) enum Claim<F> {
    /// Live entry found.
    Hit(Bytes),
    /// Live entry found, but its payload has to be read from storage.
    Load(PendingLoad, F),
    /// Another caller is already fetching this key.
    Wait(SharedFetch),
    /// This caller started the fetch.
    Lead(SharedFetch),
}

/// Unregisters an in-flight fetch when the fetching task finishes or unwinds.
pub(crate) struct InFlightGuard {
    cache: Arc<TieredCache>,
    key: String,
    id: u64,
}

impl InFlightGuard {
    pub(crate) fn new(cache: Arc<TieredCache>, key: String, id: u64) -> Self {
        Self { cache, key, id }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.cache.release_in_flight(&self.key, self.id);
    }
}
