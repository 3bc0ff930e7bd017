//! Route configuration.

use crate::handlers;
use crate::middleware::cors;
use crate::state::AppState;
use axum::Router;
use axum::middleware;
use axum::routing::get;
use tower_http::trace::TraceLayer;

/// The public API router.
pub fn create_api_router(state: AppState) -> Router {
    Router::new()
        .route("/sites/stats", get(handlers::get_stats))
        .route("/sites/random", get(handlers::get_random_site))
        .route("/sites", get(handlers::get_sites))
        .layer(middleware::from_fn(cors))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// The gateway router: every path and method funnels into host dispatch.
pub fn create_gateway_router(state: AppState) -> Router {
    Router::new()
        .fallback(handlers::serve_gateway)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
