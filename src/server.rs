use axum::{middleware as axum_mw, routing::get, Router};
use std::sync::Arc;

use crate::handlers;
use crate::middleware::auth::{self, BasicAuth};
use crate::middleware::timing;
use crate::AppState;

/// Builds the full Axum `Router`. `/metrics` sits behind basic auth when
/// credentials are given.
pub fn create_router(state: Arc<AppState>, basic_auth: Option<BasicAuth>) -> Router {
    // ── Scrape endpoint ─────────────────────────────────────────
    let mut scrape = Router::new()
        .route("/metrics", get(handlers::scrape::metrics))
        .route("/metrics/", get(handlers::scrape::metrics));
    if let Some(credentials) = basic_auth {
        scrape = scrape.layer(axum_mw::from_fn_with_state(
            Arc::new(credentials),
            auth::require_basic_auth,
        ));
    }

    Router::new()
        .route("/", get(handlers::home))
        .route("/health", get(handlers::health))
        .merge(scrape)
        // ── Provide shared state to all routes above ────────────
        .with_state(state)
        // ── Global middleware ───────────────────────────────────
        .layer(axum_mw::from_fn(timing::timing_middleware))
}
