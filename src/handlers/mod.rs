pub mod scrape;

use axum::{
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    Json,
};

use crate::error::ExporterError;

// ─── Unified error type ──────────────────────────────────────────

#[derive(Debug)]
pub enum AppError {
    /// Upstream or transport failure while scraping.
    Upstream(String),
    Internal(String),
    Unauthorized,
}

impl From<ExporterError> for AppError {
    fn from(err: ExporterError) -> Self {
        match err {
            ExporterError::Remote { .. }
            | ExporterError::NotFound { .. }
            | ExporterError::Transport(_) => Self::Upstream(err.to_string()),
            ExporterError::TypeMismatch { .. } | ExporterError::Config(_) => {
                Self::Internal(err.to_string())
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::Upstream(msg) => (StatusCode::BAD_GATEWAY, format!("Sentry: {msg}")),
            Self::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
            Self::Unauthorized => {
                let body = serde_json::json!({
                    "error":  "authentication required",
                    "status": StatusCode::UNAUTHORIZED.as_u16(),
                });
                return (
                    StatusCode::UNAUTHORIZED,
                    [(header::WWW_AUTHENTICATE, r#"Basic realm="sentry-exporter""#)],
                    Json(body),
                )
                    .into_response();
            }
        };

        let body = serde_json::json!({
            "error":  message,
            "status": status.as_u16(),
        });

        (status, Json(body)).into_response()
    }
}

// ─── GET / ───────────────────────────────────────────────────────

pub async fn home() -> Html<&'static str> {
    Html(
        "<h1>Sentry Issues & Events Exporter</h1>\
         <h3>Go to <a href=/metrics/>/metrics</a></h3>",
    )
}

// ─── GET /health ─────────────────────────────────────────────────

pub async fn health() -> &'static str {
    "ok"
}
