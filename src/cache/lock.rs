use std::sync::{Mutex, MutexGuard};

use metrics::counter;
use tracing::warn;

const METRIC_LOCK_POISONED: &str = "gazette_cache_lock_poisoned_total";

/// Acquire a cache mutex, recovering the guard if a previous holder panicked.
/// Cache state is rebuildable from upstream, so poisoning is never fatal.
pub(crate) fn mutex_lock<'a, T>(
    lock: &'a Mutex<T>,
    component: &'static str,
    op: &'static str,
) -> MutexGuard<'a, T> {
    match lock.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!(
                op,
                component,
                lock_kind = "mutex.lock",
                result = "poisoned_recovered",
                hint = "state may be stale after panic in another thread",
                "Recovered from poisoned cache lock"
            );
            counter!(METRIC_LOCK_POISONED, "component" => component).increment(1);
            poisoned.into_inner()
        }
    }
}
