use reqwest::StatusCode;
use thiserror::Error;

/// Everything that can fail while configuring the exporter or serving a scrape.
#[derive(Debug, Error)]
pub enum ExporterError {
    #[error("configuration error: {0}")]
    Config(String),

    /// Non-2xx from the upstream API after retries were exhausted.
    #[error("upstream returned {status} for {path}")]
    Remote { status: StatusCode, path: String },

    #[error("resource not found: {path}")]
    NotFound { path: String },

    /// Connection, TLS or timeout failure. Never retried.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("unexpected payload for {resource}: {message}")]
    TypeMismatch { resource: String, message: String },
}

impl ExporterError {
    pub fn type_mismatch(resource: impl Into<String>, message: impl ToString) -> Self {
        Self::TypeMismatch {
            resource: resource.into(),
            message: message.to_string(),
        }
    }
}

pub type Result<T, E = ExporterError> = std::result::Result<T, E>;
