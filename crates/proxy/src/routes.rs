//! Route configuration.

use crate::handlers;
use crate::state::ProxyState;
use axum::Router;
use axum::routing::get;
use tower_http::trace::TraceLayer;

/// Create the cache proxy router.
pub fn create_router(state: ProxyState) -> Router {
    Router::new()
        .route("/cache", get(handlers::serve_cache))
        .route("/checkcdn", get(handlers::check_cdn))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
