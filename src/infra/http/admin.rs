//! Operator endpoints. Bound to the admin listener only.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use gazette_api_types::SweepResponse;
use tracing::info;

use crate::{application::error::HttpError, cache::CacheService};

use super::{
    cache_not_configured,
    middleware::{log_responses, set_request_context},
    stats::stats_response,
};

#[derive(Clone)]
pub struct AdminState {
    pub cache: Option<Arc<CacheService>>,
}

impl AdminState {
    fn require_cache(&self, source: &'static str) -> Result<&CacheService, HttpError> {
        self.cache
            .as_deref()
            .ok_or_else(|| cache_not_configured(source))
    }
}

pub fn build_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/cache/stats", get(cache_stats))
        .route("/cache/stats/reset", post(reset_stats))
        .route("/cache/clear", post(clear))
        .route("/cache/sweep", post(sweep))
        .route("/cache/entries/{*key}", delete(invalidate))
        .route("/cache/disable", post(disable))
        .route("/cache/enable", post(enable))
        .route("/_health", get(health))
        .with_state(state)
        .layer(middleware::from_fn(log_responses))
        .layer(middleware::from_fn(set_request_context))
}

async fn cache_stats(State(state): State<AdminState>) -> Response {
    stats_response(state.cache.as_deref())
}

async fn reset_stats(State(state): State<AdminState>) -> Result<StatusCode, HttpError> {
    state
        .require_cache("infra::http::admin::reset_stats")?
        .reset_stats();
    info!(target = "gazette::admin", "Cache statistics reset");
    Ok(StatusCode::NO_CONTENT)
}

async fn clear(State(state): State<AdminState>) -> Result<StatusCode, HttpError> {
    let cache = state.require_cache("infra::http::admin::clear")?;
    cache.clear();
    cache.reset_stats();
    info!(target = "gazette::admin", "Cache cleared and statistics reset");
    Ok(StatusCode::NO_CONTENT)
}

async fn sweep(State(state): State<AdminState>) -> Result<Json<SweepResponse>, HttpError> {
    let removed = state.require_cache("infra::http::admin::sweep")?.sweep().await;
    Ok(Json(SweepResponse {
        removed: removed as u64,
    }))
}

async fn invalidate(
    State(state): State<AdminState>,
    Path(key): Path<String>,
) -> Result<StatusCode, HttpError> {
    let removed = state
        .require_cache("infra::http::admin::invalidate")?
        .invalidate(&key);
    info!(target = "gazette::admin", key = %key, removed, "Cache key invalidated");
    Ok(StatusCode::NO_CONTENT)
}

async fn disable(State(state): State<AdminState>) -> Result<StatusCode, HttpError> {
    state.require_cache("infra::http::admin::disable")?.disable();
    Ok(StatusCode::NO_CONTENT)
}

async fn enable(State(state): State<AdminState>) -> Result<StatusCode, HttpError> {
    state.require_cache("infra::http::admin::enable")?.enable();
    Ok(StatusCode::NO_CONTENT)
}

async fn health() -> Response {
    StatusCode::NO_CONTENT.into_response()
}
