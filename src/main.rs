use std::{process, sync::Arc, time::Duration};

use gazette::{
    application::{
        error::AppError,
        feeds::{FeedCatalog, FeedService},
    },
    cache::{CacheConfig, CacheService},
    config,
    infra::{
        error::InfraError,
        fetcher::HttpFeedFetcher,
        http::{self, AdminState, HttpState},
        telemetry,
    },
};
use tokio::{sync::watch, try_join};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::CheckConfig => {
            run_check_config(&settings);
            Ok(())
        }
    }
}

fn run_check_config(settings: &config::Settings) {
    info!(
        target = "gazette::config",
        public_addr = %settings.server.public_addr,
        admin_addr = %settings.server.admin_addr,
        cache_enabled = settings.cache.enabled,
        feeds = settings.feeds.sources.len(),
        "Configuration is valid"
    );
    info!(target = "gazette::config", settings = ?settings, "Effective settings");
}

struct ApplicationContext {
    http_state: HttpState,
    admin_state: AdminState,
    cache: Option<Arc<CacheService>>,
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let app = build_application_context(&settings)?;

    let sweeper = app.cache.as_ref().map(CacheService::spawn_sweeper);

    let result = serve_http(&settings, app.http_state, app.admin_state).await;

    if let Some(handle) = sweeper {
        handle.abort();
        let _ = handle.await;
    }

    if let Some(cache) = app.cache
        && let Err(err) = tokio::task::spawn_blocking(move || cache.tiers().flush()).await
    {
        warn!(target = "gazette::cache", error = %err, "Persistent tier flush did not finish");
    }

    result
}

fn build_application_context(settings: &config::Settings) -> Result<ApplicationContext, AppError> {
    let cache = if settings.cache.enabled {
        let cache_config = CacheConfig::from(&settings.cache);
        let service = CacheService::from_config(cache_config)
            .map_err(|err| AppError::from(InfraError::from(err)))?;
        info!(
            target = "gazette::cache",
            memory_capacity_bytes = settings.cache.memory_capacity_bytes.get(),
            persistent_tier = ?settings.cache.persistent_tier,
            "Cache initialised"
        );
        Some(Arc::new(service))
    } else {
        warn!(
            target = "gazette::cache",
            "Cache disabled by configuration; feeds are fetched on every request"
        );
        None
    };

    let catalog = FeedCatalog::from_settings(&settings.feeds, settings.cache.default_ttl);
    if catalog.is_empty() {
        warn!(target = "gazette::feeds", "No feed sources configured");
    } else {
        info!(
            target = "gazette::feeds",
            feeds = ?catalog.names().collect::<Vec<_>>(),
            "Feed catalog loaded"
        );
    }

    let fetcher = HttpFeedFetcher::new(settings.feeds.fetch_timeout).map_err(AppError::from)?;
    let feeds = FeedService::new(catalog, Arc::new(fetcher), cache.clone());

    Ok(ApplicationContext {
        http_state: HttpState {
            feeds,
            cache: cache.clone(),
        },
        admin_state: AdminState {
            cache: cache.clone(),
        },
        cache,
    })
}

async fn serve_http(
    settings: &config::Settings,
    http_state: HttpState,
    admin_state: AdminState,
) -> Result<(), AppError> {
    let public_router = http::build_router(http_state);
    let admin_router = http::build_admin_router(admin_state);

    let public_listener = tokio::net::TcpListener::bind(settings.server.public_addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    let admin_listener = tokio::net::TcpListener::bind(settings.server.admin_addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    info!(
        target = "gazette::http",
        public_addr = %settings.server.public_addr,
        admin_addr = %settings.server.admin_addr,
        "Listening"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let signal_task = tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        info!(target = "gazette::http", "Shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    let public_server = axum::serve(public_listener, public_router.into_make_service())
        .with_graceful_shutdown(shutdown_requested(shutdown_rx.clone()));
    let admin_server = axum::serve(admin_listener, admin_router.into_make_service())
        .with_graceful_shutdown(shutdown_requested(shutdown_rx.clone()));

    let grace = settings.server.graceful_shutdown;
    let result = tokio::select! {
        served = async { try_join!(public_server, admin_server) } => served
            .map(|_| ())
            .map_err(|err| AppError::unexpected(format!("server error: {err}"))),
        () = shutdown_deadline(shutdown_rx, grace) => {
            warn!(
                target = "gazette::http",
                grace_seconds = grace.as_secs(),
                "Graceful shutdown timed out; dropping open connections"
            );
            Ok(())
        }
    };

    signal_task.abort();
    result
}

async fn shutdown_requested(mut rx: watch::Receiver<bool>) {
    let _ = rx.wait_for(|requested| *requested).await;
}

/// Resolves `grace` after shutdown was requested. Never resolves otherwise.
async fn shutdown_deadline(mut rx: watch::Receiver<bool>, grace: Duration) {
    if rx.wait_for(|requested| *requested).await.is_err() {
        std::future::pending::<()>().await;
    }
    tokio::time::sleep(grace).await;
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
