#![deny(clippy::all, clippy::pedantic)]

use gazette_api_types::{StatsEnvelope, SweepResponse};
use reqwest::{Client, Method, Response, StatusCode, Url};
use serde::Deserialize;
use thiserror::Error;

use crate::args::Cli;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("admin URL is required (use --admin-url or GAZETTE_ADMIN_URL)")]
    MissingAdminUrl,
    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server error: {0}")]
    Server(String),
    #[error("cache statistics are unavailable")]
    StatsUnavailable,
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

#[derive(Clone, Debug)]
pub struct Ctx {
    pub client: Client,
    pub base: Url,
}

impl Ctx {
    pub fn new(admin_url: &str) -> Result<Self, CliError> {
        let base = Url::parse(admin_url)?.join("/")?;
        let client = Client::builder().user_agent(Self::user_agent()).build()?;
        Ok(Self { client, base })
    }

    pub fn user_agent() -> &'static str {
        concat!("gazette-cli/", env!("CARGO_PKG_VERSION"))
    }

    pub fn url(&self, path: &str) -> Result<Url, CliError> {
        self.base.join(path).map_err(CliError::Url)
    }

    /// URL for a single cache entry; the key is encoded as one path segment.
    pub fn entry_url(&self, key: &str) -> Result<Url, CliError> {
        if key.is_empty() {
            return Err(CliError::InvalidInput("cache key must not be empty".into()));
        }
        let mut url = self.url("/cache/entries")?;
        url.path_segments_mut()
            .map_err(|()| CliError::InvalidInput("admin URL cannot be a base".into()))?
            .push(key);
        Ok(url)
    }

    pub async fn request<T: for<'de> Deserialize<'de>>(
        &self,
        method: Method,
        path: &str,
    ) -> Result<T, CliError> {
        let resp = self.client.request(method, self.url(path)?).send().await?;
        Self::handle(resp).await
    }

    pub async fn request_unit(&self, method: Method, url: Url) -> Result<(), CliError> {
        let resp = self.client.request(method, url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(CliError::Server(format!("status {status} body {text}")));
        }
        Ok(())
    }

    /// Fetch stats; a `503` with the fallback body is returned as data, not an error.
    pub async fn stats(&self) -> Result<StatsEnvelope, CliError> {
        let resp = self
            .client
            .get(self.url("/cache/stats")?)
            .send()
            .await?;
        if resp.status() == StatusCode::SERVICE_UNAVAILABLE {
            let bytes = resp.bytes().await?;
            return serde_json::from_slice(&bytes)
                .map_err(|e| CliError::Server(format!("failed to parse body: {e}")));
        }
        Self::handle(resp).await
    }

    pub async fn sweep(&self) -> Result<SweepResponse, CliError> {
        self.request(Method::POST, "/cache/sweep").await
    }

    async fn handle<T: for<'de> Deserialize<'de>>(resp: Response) -> Result<T, CliError> {
        let status = resp.status();
        let bytes = resp.bytes().await?;
        if !status.is_success() {
            let text = String::from_utf8_lossy(&bytes).into_owned();
            return Err(CliError::Server(format!("status {status} body {text}")));
        }
        let val = serde_json::from_slice(&bytes)
            .map_err(|e| CliError::Server(format!("failed to parse body: {e}")))?;
        Ok(val)
    }
}

pub fn build_ctx_from_cli(cli: &Cli) -> Result<Ctx, CliError> {
    let admin_url = cli.admin_url.as_deref().ok_or(CliError::MissingAdminUrl)?;
    Ctx::new(admin_url)
}
