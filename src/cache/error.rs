use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// Failure reported by an upstream fetch function.
///
/// The original error is kept behind an `Arc` so every caller waiting on a
/// shared in-flight fetch receives the same failure.
#[derive(Clone)]
pub struct FetchError(Arc<dyn StdError + Send + Sync + 'static>);

impl FetchError {
    pub fn new<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self(Arc::new(error))
    }

    pub fn msg(message: impl Into<String>) -> Self {
        Self::new(FetchMessage(message.into()))
    }

    /// Borrow the underlying error if it has type `E`.
    pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
        self.0.downcast_ref::<E>()
    }
}

impl fmt::Debug for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&*self.0, f)
    }
}

impl StdError for FetchError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.0.source()
    }
}

#[derive(Debug, Error)]
#[error("{0}")]
struct FetchMessage(String);

#[derive(Debug, Clone, Error)]
pub enum CacheError {
    #[error("ttl must be positive and representable, got {0:?}")]
    InvalidTtl(Duration),
    #[error("upstream fetch failed: {0}")]
    Fetch(#[source] FetchError),
    #[error("in-flight fetch for `{key}` ended without a result")]
    FetchAborted { key: String },
    #[error("cache service unavailable")]
    Unavailable,
}

impl CacheError {
    /// The upstream failure, if this error came from the fetch function.
    pub fn fetch_error(&self) -> Option<&FetchError> {
        match self {
            CacheError::Fetch(err) => Some(err),
            _ => None,
        }
    }
}

/// Storage backend failures. These never escape the cache: callers log them
/// and treat the entry as absent.
#[derive(Debug, Error)]
pub enum TierError {
    #[error("tier io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("stored entry is malformed: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("stored entry value is not valid base64: {0}")]
    Encoding(#[from] base64::DecodeError),
    #[error("stored entry belongs to another key `{found}`")]
    ForeignEntry { found: String },
    #[error("entry of {size} bytes does not fit ({free} bytes free)")]
    NoRoom { size: u64, free: u64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Error)]
    #[error("upstream returned 503")]
    struct Upstream;

    #[test]
    fn fetch_error_keeps_original() {
        let err = CacheError::Fetch(FetchError::new(Upstream));
        assert_eq!(err.to_string(), "upstream fetch failed: upstream returned 503");

        let inner = err.fetch_error().expect("fetch error");
        assert!(inner.downcast_ref::<Upstream>().is_some());
    }

    #[test]
    fn fetch_error_clones_share_source() {
        let err = FetchError::msg("timed out");
        let cloned = err.clone();
        assert_eq!(err.to_string(), cloned.to_string());
    }
}
