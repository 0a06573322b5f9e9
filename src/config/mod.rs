//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{
    collections::HashSet,
    net::SocketAddr,
    num::{NonZeroU64, NonZeroUsize},
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

mod cli;

pub use cli::{CliArgs, Command, ServeArgs, ServeOverrides};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "gazette";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_ADMIN_HOST: &str = "127.0.0.1";
const DEFAULT_PUBLIC_PORT: u16 = 3000;
const DEFAULT_ADMIN_PORT: u16 = 3001;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_CACHE_MEMORY_CAPACITY_BYTES: u64 = 64 * 1024 * 1024;
const DEFAULT_CACHE_PERSISTENT_CAPACITY_BYTES: u64 = 256 * 1024 * 1024;
const DEFAULT_CACHE_PERSISTENT_DIR: &str = "var/cache/gazette";
const DEFAULT_CACHE_TTL_SECS: u64 = 300;
const DEFAULT_CACHE_SWEEP_INTERVAL_SECS: u64 = 60;
const DEFAULT_CACHE_SWEEP_BATCH_SIZE: u64 = 256;
const DEFAULT_CACHE_RESPONSE_TIME_WINDOW: u64 = 1000;
const DEFAULT_CACHE_TOP_KEYS_LIMIT: u64 = 10;
const DEFAULT_FEEDS_FETCH_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub cache: CacheSettings,
    pub feeds: FeedsSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub public_addr: SocketAddr,
    pub admin_addr: SocketAddr,
    pub graceful_shutdown: Duration,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistentTierSetting {
    None,
    Disk { directory: PathBuf },
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    /// When false the service runs without a cache and the stats endpoint degrades.
    pub enabled: bool,
    pub memory_capacity_bytes: NonZeroU64,
    pub persistent_tier: PersistentTierSetting,
    pub persistent_capacity_bytes: NonZeroU64,
    pub default_ttl: Duration,
    pub sweep_interval: Duration,
    pub sweep_batch_size: NonZeroUsize,
    pub response_time_window: NonZeroUsize,
    pub top_keys_limit: NonZeroUsize,
}

#[derive(Debug, Clone)]
pub struct FeedsSettings {
    pub fetch_timeout: Duration,
    pub sources: Vec<FeedSourceSettings>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedSourceSettings {
    pub name: String,
    pub url: Url,
    /// Falls back to `cache.default_ttl_seconds` when absent.
    pub ttl: Option<Duration>,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix("GAZETTE").separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::CheckConfig) | None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    cache: RawCacheSettings,
    feeds: RawFeedsSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(host) = overrides.server_admin_host.as_ref() {
            self.server.admin_host = Some(host.clone());
        }
        if let Some(port) = overrides.public_port {
            self.server.public_port = Some(port);
        }
        if let Some(port) = overrides.admin_port {
            self.server.admin_port = Some(port);
        }
        if let Some(seconds) = overrides.server_graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(enabled) = overrides.cache_enabled {
            self.cache.enabled = Some(enabled);
        }
        if let Some(bytes) = overrides.cache_memory_capacity_bytes {
            self.cache.memory_capacity_bytes = Some(bytes);
        }
        if let Some(kind) = overrides.cache_persistent_tier.as_ref() {
            self.cache.persistent_tier = Some(kind.clone());
        }
        if let Some(directory) = overrides.cache_persistent_directory.as_ref() {
            self.cache.persistent_directory = Some(directory.clone());
        }
        if let Some(seconds) = overrides.cache_default_ttl_seconds {
            self.cache.default_ttl_seconds = Some(seconds);
        }
        if let Some(seconds) = overrides.cache_sweep_interval_seconds {
            self.cache.sweep_interval_seconds = Some(seconds);
        }
        if let Some(seconds) = overrides.feeds_fetch_timeout_seconds {
            self.feeds.fetch_timeout_seconds = Some(seconds);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            cache,
            feeds,
        } = raw;

        let server = build_server_settings(server)?;
        let logging = build_logging_settings(logging)?;
        let cache = build_cache_settings(cache)?;
        let feeds = build_feeds_settings(feeds)?;

        Ok(Self {
            server,
            logging,
            cache,
            feeds,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());
    let admin_host = server
        .admin_host
        .unwrap_or_else(|| DEFAULT_ADMIN_HOST.to_string());

    let public_port = server.public_port.unwrap_or(DEFAULT_PUBLIC_PORT);
    if public_port == 0 {
        return Err(LoadError::invalid(
            "server.public_port",
            "port must be greater than zero",
        ));
    }

    let admin_port = server.admin_port.unwrap_or(DEFAULT_ADMIN_PORT);
    if admin_port == 0 {
        return Err(LoadError::invalid(
            "server.admin_port",
            "port must be greater than zero",
        ));
    }

    let public_addr = parse_socket_addr(&host, public_port)
        .map_err(|reason| LoadError::invalid("server.public_addr", reason))?;
    let admin_addr = parse_socket_addr(&admin_host, admin_port)
        .map_err(|reason| LoadError::invalid("server.admin_addr", reason))?;

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    let graceful_shutdown = seconds(graceful_secs, "server.graceful_shutdown_seconds")?;

    Ok(ServerSettings {
        public_addr,
        admin_addr,
        graceful_shutdown,
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let memory_capacity_bytes = non_zero_u64(
        cache
            .memory_capacity_bytes
            .unwrap_or(DEFAULT_CACHE_MEMORY_CAPACITY_BYTES),
        "cache.memory_capacity_bytes",
    )?;
    let persistent_capacity_bytes = non_zero_u64(
        cache
            .persistent_capacity_bytes
            .unwrap_or(DEFAULT_CACHE_PERSISTENT_CAPACITY_BYTES),
        "cache.persistent_capacity_bytes",
    )?;

    let persistent_tier = match cache
        .persistent_tier
        .as_deref()
        .map(str::trim)
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        None | Some("") | Some("none") => PersistentTierSetting::None,
        Some("disk") => {
            let directory = cache
                .persistent_directory
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CACHE_PERSISTENT_DIR));
            if directory.as_os_str().is_empty() {
                return Err(LoadError::invalid(
                    "cache.persistent_directory",
                    "path must not be empty",
                ));
            }
            PersistentTierSetting::Disk { directory }
        }
        Some(other) => {
            return Err(LoadError::invalid(
                "cache.persistent_tier",
                format!("unknown tier `{other}`, expected `none` or `disk`"),
            ));
        }
    };

    Ok(CacheSettings {
        enabled: cache.enabled.unwrap_or(true),
        memory_capacity_bytes,
        persistent_tier,
        persistent_capacity_bytes,
        default_ttl: seconds(
            cache.default_ttl_seconds.unwrap_or(DEFAULT_CACHE_TTL_SECS),
            "cache.default_ttl_seconds",
        )?,
        sweep_interval: seconds(
            cache
                .sweep_interval_seconds
                .unwrap_or(DEFAULT_CACHE_SWEEP_INTERVAL_SECS),
            "cache.sweep_interval_seconds",
        )?,
        sweep_batch_size: non_zero_usize(
            cache
                .sweep_batch_size
                .unwrap_or(DEFAULT_CACHE_SWEEP_BATCH_SIZE),
            "cache.sweep_batch_size",
        )?,
        response_time_window: non_zero_usize(
            cache
                .response_time_window
                .unwrap_or(DEFAULT_CACHE_RESPONSE_TIME_WINDOW),
            "cache.response_time_window",
        )?,
        top_keys_limit: non_zero_usize(
            cache.top_keys_limit.unwrap_or(DEFAULT_CACHE_TOP_KEYS_LIMIT),
            "cache.top_keys_limit",
        )?,
    })
}

fn build_feeds_settings(feeds: RawFeedsSettings) -> Result<FeedsSettings, LoadError> {
    let fetch_timeout = seconds(
        feeds
            .fetch_timeout_seconds
            .unwrap_or(DEFAULT_FEEDS_FETCH_TIMEOUT_SECS),
        "feeds.fetch_timeout_seconds",
    )?;

    let mut seen = HashSet::new();
    let mut sources = Vec::with_capacity(feeds.sources.len());
    for source in feeds.sources {
        let name = source.name.trim().to_string();
        if name.is_empty() {
            return Err(LoadError::invalid("feeds.sources.name", "must not be empty"));
        }
        if !seen.insert(name.clone()) {
            return Err(LoadError::invalid(
                "feeds.sources.name",
                format!("duplicate feed name `{name}`"),
            ));
        }

        let url = Url::parse(source.url.trim()).map_err(|err| {
            LoadError::invalid("feeds.sources.url", format!("feed `{name}`: {err}"))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(LoadError::invalid(
                "feeds.sources.url",
                format!("feed `{name}` must use http or https"),
            ));
        }

        let ttl = source
            .ttl_seconds
            .map(|value| seconds(value, "feeds.sources.ttl_seconds"))
            .transpose()?;

        sources.push(FeedSourceSettings { name, url, ttl });
    }

    Ok(FeedsSettings {
        fetch_timeout,
        sources,
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    admin_host: Option<String>,
    public_port: Option<u16>,
    admin_port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    enabled: Option<bool>,
    memory_capacity_bytes: Option<u64>,
    persistent_tier: Option<String>,
    persistent_directory: Option<PathBuf>,
    persistent_capacity_bytes: Option<u64>,
    default_ttl_seconds: Option<u64>,
    sweep_interval_seconds: Option<u64>,
    sweep_batch_size: Option<u64>,
    response_time_window: Option<u64>,
    top_keys_limit: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawFeedsSettings {
    fetch_timeout_seconds: Option<u64>,
    sources: Vec<RawFeedSource>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawFeedSource {
    name: String,
    url: String,
    #[serde(default)]
    ttl_seconds: Option<u64>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn seconds(value: u64, key: &'static str) -> Result<Duration, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    Ok(Duration::from_secs(value))
}

fn non_zero_u64(value: u64, key: &'static str) -> Result<NonZeroU64, LoadError> {
    NonZeroU64::new(value).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

fn non_zero_usize(value: u64, key: &'static str) -> Result<NonZeroUsize, LoadError> {
    let value: usize = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for usize"))?;
    NonZeroUsize::new(value).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

#[cfg(test)]
mod tests;
