//! Upstream feed retrieval over HTTP.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use tracing::debug;
use url::Url;

use crate::{application::feeds::FeedFetcher, cache::FetchError};

use super::error::InfraError;

#[derive(Debug, Clone)]
pub struct HttpFeedFetcher {
    client: Client,
}

impl HttpFeedFetcher {
    pub fn new(timeout: Duration) -> Result<Self, InfraError> {
        let client = Client::builder()
            .user_agent(concat!("gazette/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|err| InfraError::http_client(err.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl FeedFetcher for HttpFeedFetcher {
    async fn fetch(&self, url: &Url) -> Result<Bytes, FetchError> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(FetchError::new)?
            .error_for_status()
            .map_err(FetchError::new)?;
        let body = response.bytes().await.map_err(FetchError::new)?;
        debug!(
            target = "gazette::feeds::fetch",
            url = %url,
            bytes = body.len(),
            "Fetched upstream feed"
        );
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use httpmock::MockServer;

    use super::*;

    fn fetcher() -> HttpFeedFetcher {
        HttpFeedFetcher::new(Duration::from_secs(5)).expect("client")
    }

    #[tokio::test]
    async fn returns_body_on_success() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method("GET").path("/world.rss");
            then.status(200)
                .header("content-type", "application/rss+xml")
                .body("<rss version=\"2.0\"/>");
        });

        let url = Url::parse(&server.url("/world.rss")).expect("url");
        let body = fetcher().fetch(&url).await.expect("body");
        assert_eq!(body.as_ref(), b"<rss version=\"2.0\"/>");
        mock.assert();
    }

    #[tokio::test]
    async fn error_status_is_a_fetch_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method("GET").path("/down.rss");
            then.status(503).body("maintenance");
        });

        let url = Url::parse(&server.url("/down.rss")).expect("url");
        let err = fetcher().fetch(&url).await.expect_err("503");
        let status = err
            .downcast_ref::<reqwest::Error>()
            .and_then(reqwest::Error::status);
        assert_eq!(status.map(|s| s.as_u16()), Some(503));
    }
}
