//! Cache statistics response shared by the public and admin listeners.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use gazette_api_types::{CacheStatsView, StatsFallbackResponse, StatsResponse};
use time::OffsetDateTime;

use crate::application::error::ErrorReport;
use crate::cache::CacheService;

const SOURCE: &str = "infra::http::stats";

/// `200` with live stats, or `503` with the zeroed fallback body.
pub(super) fn stats_response(cache: Option<&CacheService>) -> Response {
    let now = OffsetDateTime::now_utc();
    let Some(cache) = cache else {
        return fallback(
            now,
            ErrorReport::from_message(
                SOURCE,
                StatusCode::SERVICE_UNAVAILABLE,
                "cache is disabled in configuration",
            ),
        );
    };

    match cache.get_stats() {
        Ok(stats) => {
            let body = StatsResponse::new(CacheStatsView::from(stats), now);
            (StatusCode::OK, Json(body)).into_response()
        }
        Err(err) => fallback(
            now,
            ErrorReport::from_error(SOURCE, StatusCode::SERVICE_UNAVAILABLE, &err),
        ),
    }
}

fn fallback(now: OffsetDateTime, report: ErrorReport) -> Response {
    let mut response = (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(StatsFallbackResponse::unavailable(now)),
    )
        .into_response();
    report.attach(&mut response);
    response
}
