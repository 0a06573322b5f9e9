mod admin;
mod middleware;
mod public;
mod stats;

pub use admin::{AdminState, build_admin_router};
pub use middleware::RequestContext;
pub use public::{HttpState, build_router};

use axum::http::StatusCode;

use crate::application::error::HttpError;

/// Error returned by cache endpoints when the service runs without a cache.
fn cache_not_configured(source: &'static str) -> HttpError {
    HttpError::new(
        source,
        StatusCode::SERVICE_UNAVAILABLE,
        "Cache service unavailable",
        "cache is disabled in configuration",
    )
}
