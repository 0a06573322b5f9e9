use super::*;

fn raw_source(name: &str, url: &str, ttl_seconds: Option<u64>) -> RawFeedSource {
    RawFeedSource {
        name: name.to_string(),
        url: url.to_string(),
        ttl_seconds,
    }
}

#[test]
fn cli_overrides_take_highest_precedence() {
    let mut raw = RawSettings::default();
    raw.server.public_port = Some(4000);
    raw.logging.level = Some("info".to_string());

    let overrides = ServeOverrides {
        public_port: Some(4321),
        log_level: Some("debug".to_string()),
        ..Default::default()
    };

    raw.apply_serve_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(settings.server.public_addr.port(), 4321);
    assert_eq!(settings.logging.level, LevelFilter::DEBUG);
}

#[test]
fn cache_defaults() {
    let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");
    let cache = &settings.cache;

    assert!(cache.enabled);
    assert_eq!(cache.memory_capacity_bytes.get(), 64 * 1024 * 1024);
    assert_eq!(cache.persistent_tier, PersistentTierSetting::None);
    assert_eq!(cache.default_ttl, Duration::from_secs(300));
    assert_eq!(cache.sweep_interval, Duration::from_secs(60));
    assert_eq!(cache.sweep_batch_size.get(), 256);
    assert_eq!(cache.response_time_window.get(), 1000);
    assert_eq!(cache.top_keys_limit.get(), 10);
    assert_eq!(settings.feeds.fetch_timeout, Duration::from_secs(10));
    assert!(settings.feeds.sources.is_empty());
}

#[test]
fn disk_tier_uses_default_directory() {
    let mut raw = RawSettings::default();
    raw.cache.persistent_tier = Some("Disk".to_string());

    let settings = Settings::from_raw(raw).expect("valid settings");
    assert_eq!(
        settings.cache.persistent_tier,
        PersistentTierSetting::Disk {
            directory: PathBuf::from(DEFAULT_CACHE_PERSISTENT_DIR)
        }
    );
}

#[test]
fn unknown_persistent_tier_is_rejected() {
    let mut raw = RawSettings::default();
    raw.cache.persistent_tier = Some("redis".to_string());

    let err = Settings::from_raw(raw).expect_err("invalid tier");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "cache.persistent_tier",
            ..
        }
    ));
}

#[test]
fn zero_capacity_is_rejected() {
    let mut raw = RawSettings::default();
    raw.cache.memory_capacity_bytes = Some(0);

    let err = Settings::from_raw(raw).expect_err("zero capacity");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "cache.memory_capacity_bytes",
            ..
        }
    ));
}

#[test]
fn zero_sweep_interval_is_rejected() {
    let mut raw = RawSettings::default();
    let overrides = ServeOverrides {
        cache_sweep_interval_seconds: Some(0),
        ..Default::default()
    };
    raw.apply_serve_overrides(&overrides);

    assert!(Settings::from_raw(raw).is_err());
}

#[test]
fn feed_sources_are_validated() {
    let mut raw = RawSettings::default();
    raw.feeds.sources = vec![
        raw_source("world", "https://example.com/world.rss", Some(120)),
        raw_source("tech", "https://example.com/tech.rss", None),
    ];

    let settings = Settings::from_raw(raw).expect("valid settings");
    let sources = &settings.feeds.sources;
    assert_eq!(sources.len(), 2);
    assert_eq!(sources[0].ttl, Some(Duration::from_secs(120)));
    assert_eq!(sources[1].url.as_str(), "https://example.com/tech.rss");
}

#[test]
fn duplicate_feed_names_are_rejected() {
    let mut raw = RawSettings::default();
    raw.feeds.sources = vec![
        raw_source("world", "https://example.com/a.rss", None),
        raw_source("world", "https://example.com/b.rss", None),
    ];

    let err = Settings::from_raw(raw).expect_err("duplicate");
    assert!(err.to_string().contains("duplicate feed name"));
}

#[test]
fn non_http_feed_urls_are_rejected() {
    let mut raw = RawSettings::default();
    raw.feeds.sources = vec![raw_source("local", "file:///etc/passwd", None)];

    assert!(Settings::from_raw(raw).is_err());
}

#[test]
fn cli_json_logging_enforces_format() {
    let mut raw = RawSettings::default();
    let overrides = ServeOverrides {
        log_json: Some(true),
        ..Default::default()
    };

    raw.apply_serve_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert!(matches!(settings.logging.format, LogFormat::Json));
}

#[test]
fn default_to_serve_command() {
    let args = CliArgs::parse_from(["gazette"]);
    let command = args
        .command
        .unwrap_or(Command::Serve(Box::<ServeArgs>::default()));
    assert!(matches!(command, Command::Serve(_)));
}

#[test]
fn parse_serve_overrides() {
    let args = CliArgs::parse_from([
        "gazette",
        "serve",
        "--server-host",
        "0.0.0.0",
        "--cache-enabled",
        "false",
        "--cache-persistent-tier",
        "disk",
    ]);

    match args.command.expect("serve command") {
        Command::Serve(serve) => {
            assert_eq!(serve.overrides.server_host.as_deref(), Some("0.0.0.0"));
            assert_eq!(serve.overrides.cache_enabled, Some(false));
            assert_eq!(serve.overrides.cache_persistent_tier.as_deref(), Some("disk"));
        }
        _ => panic!("wrong command parsed"),
    }
}

#[test]
fn parse_check_config() {
    let args = CliArgs::parse_from(["gazette", "check-config"]);
    assert!(matches!(args.command, Some(Command::CheckConfig)));
}
