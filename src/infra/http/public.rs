use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    extract::{Path, State},
    http::{
        HeaderValue, StatusCode,
        header::{CACHE_CONTROL, CONTENT_TYPE},
    },
    middleware,
    response::{IntoResponse, Response},
    routing::get,
};

use crate::{
    application::{error::HttpError, feeds::FeedService},
    cache::{CacheService, Served},
};

use super::{
    middleware::{CACHE_STATUS_HEADER, log_responses, set_request_context},
    stats::stats_response,
};

const FEED_CONTENT_TYPE: &str = "application/xml; charset=utf-8";

#[derive(Clone)]
pub struct HttpState {
    pub feeds: FeedService,
    pub cache: Option<Arc<CacheService>>,
}

pub fn build_router(state: HttpState) -> Router {
    Router::new()
        .route("/api/cache/stats", get(cache_stats))
        .route("/feeds/{name}", get(feed))
        .route("/_health", get(health))
        .fallback(fallback)
        .with_state(state)
        .layer(middleware::from_fn(log_responses))
        .layer(middleware::from_fn(set_request_context))
}

async fn cache_stats(State(state): State<HttpState>) -> Response {
    stats_response(state.cache.as_deref())
}

async fn feed(State(state): State<HttpState>, Path(name): Path<String>) -> Response {
    match state.feeds.load(&name).await {
        Ok(served) => feed_response(served),
        Err(err) => HttpError::from(err).into_response(),
    }
}

async fn health() -> StatusCode {
    StatusCode::NO_CONTENT
}

async fn fallback() -> Response {
    HttpError::new(
        "infra::http::public::fallback",
        StatusCode::NOT_FOUND,
        "Not found",
        "no route matched",
    )
    .into_response()
}

fn feed_response(served: Served) -> Response {
    let Served { value, outcome } = served;
    Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, FEED_CONTENT_TYPE)
        .header(CACHE_CONTROL, "no-cache")
        .header(CACHE_STATUS_HEADER, HeaderValue::from_static(outcome.as_str()))
        .body(Body::from(value))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}
