use axum::{extract::State, http::header, response::IntoResponse};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};

use crate::metrics::{exposition, SentryCollector};
use crate::AppState;

use super::AppError;

// ─── GET /metrics ────────────────────────────────────────────────

/// One scrape: render every enabled family and encode it as text.
///
/// A fresh collector is built for each request. If a family fails the whole
/// scrape fails; families rendered before it are only logged.
pub async fn metrics(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, AppError> {
    let t0 = Instant::now();
    info!(org = %state.settings.org, "exporter: scrape started");

    let collector = SentryCollector::new(&state.client, &state.settings, &state.cache);
    let mut families = Vec::new();

    if let Err(e) = collector.collect(&mut families).await {
        error!(
            error = %e,
            rendered = families.len(),
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "exporter: scrape failed"
        );
        return Err(e.into());
    }

    let body = exposition::encode(&families);
    info!(
        families = families.len(),
        elapsed_ms = t0.elapsed().as_millis() as u64,
        "exporter: scrape finished"
    );
    Ok(([(header::CONTENT_TYPE, exposition::CONTENT_TYPE)], body))
}
