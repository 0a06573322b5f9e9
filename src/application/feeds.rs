//! Configured feed sources served through the cache.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::cache::{CacheError, CacheService, FetchError, Outcome, Served};
use crate::config::FeedsSettings;

/// Upstream source of raw feed documents.
#[async_trait]
pub trait FeedFetcher: Send + Sync {
    async fn fetch(&self, url: &Url) -> Result<Bytes, FetchError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedSource {
    pub name: String,
    pub url: Url,
    pub ttl: Duration,
}

impl FeedSource {
    /// Cache key: the full feed URL, query string included.
    pub fn cache_key(&self) -> &str {
        self.url.as_str()
    }
}

/// Feeds addressable by name.
#[derive(Debug, Clone, Default)]
pub struct FeedCatalog {
    sources: BTreeMap<String, FeedSource>,
}

impl FeedCatalog {
    pub fn new(sources: impl IntoIterator<Item = FeedSource>) -> Self {
        Self {
            sources: sources
                .into_iter()
                .map(|source| (source.name.clone(), source))
                .collect(),
        }
    }

    /// Build from settings, filling missing TTLs with `default_ttl`.
    pub fn from_settings(settings: &FeedsSettings, default_ttl: Duration) -> Self {
        Self::new(settings.sources.iter().map(|source| FeedSource {
            name: source.name.clone(),
            url: source.url.clone(),
            ttl: source.ttl.unwrap_or(default_ttl),
        }))
    }

    pub fn get(&self, name: &str) -> Option<&FeedSource> {
        self.sources.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.sources.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("unknown feed `{0}`")]
    UnknownFeed(String),
    #[error("feed `{name}` could not be fetched")]
    Upstream {
        name: String,
        #[source]
        source: FetchError,
    },
    #[error(transparent)]
    Cache(CacheError),
}

impl FeedError {
    fn from_cache(name: &str, error: CacheError) -> Self {
        match error {
            CacheError::Fetch(source) => FeedError::Upstream {
                name: name.to_string(),
                source,
            },
            other => FeedError::Cache(other),
        }
    }
}

/// Loads feeds by name, through the cache when one is configured.
#[derive(Clone)]
pub struct FeedService {
    catalog: Arc<FeedCatalog>,
    fetcher: Arc<dyn FeedFetcher>,
    cache: Option<Arc<CacheService>>,
}

impl FeedService {
    pub fn new(
        catalog: FeedCatalog,
        fetcher: Arc<dyn FeedFetcher>,
        cache: Option<Arc<CacheService>>,
    ) -> Self {
        Self {
            catalog: Arc::new(catalog),
            fetcher,
            cache,
        }
    }

    pub fn catalog(&self) -> &FeedCatalog {
        &self.catalog
    }

    pub async fn load(&self, name: &str) -> Result<Served, FeedError> {
        let source = self
            .catalog
            .get(name)
            .ok_or_else(|| FeedError::UnknownFeed(name.to_string()))?;

        let Some(cache) = self.cache.as_ref() else {
            debug!(feed = name, "Cache disabled, fetching feed directly");
            let value = self
                .fetcher
                .fetch(&source.url)
                .await
                .map_err(|source| FeedError::Upstream {
                    name: name.to_string(),
                    source,
                })?;
            return Ok(Served {
                value,
                outcome: Outcome::Bypass,
            });
        };

        let fetcher = Arc::clone(&self.fetcher);
        let url = source.url.clone();
        cache
            .fetch_with_cache(source.cache_key(), source.ttl, move || async move {
                fetcher.fetch(&url).await
            })
            .await
            .map_err(|err| FeedError::from_cache(name, err))
    }
}
