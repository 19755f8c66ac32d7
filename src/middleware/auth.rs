use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::{IntoResponse, Response},
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::sync::Arc;
use tracing::debug;

use crate::handlers::AppError;

/// Credentials accepted on the metrics endpoint.
#[derive(Debug, Clone)]
pub struct BasicAuth {
    user: String,
    pass: String,
}

impl BasicAuth {
    pub fn new(user: impl Into<String>, pass: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            pass: pass.into(),
        }
    }

    /// Check an `Authorization` header value.
    pub fn verify(&self, header: &str) -> bool {
        match decode_basic(header) {
            Some((user, pass)) => user == self.user && pass == self.pass,
            None => false,
        }
    }
}

/// `Basic <base64(user:pass)>` → `(user, pass)`.
fn decode_basic(header: &str) -> Option<(String, String)> {
    let (scheme, token) = header.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let raw = STANDARD.decode(token.trim()).ok()?;
    let raw = String::from_utf8(raw).ok()?;
    let (user, pass) = raw.split_once(':')?;
    Some((user.to_owned(), pass.to_owned()))
}

/// Rejects requests without matching basic-auth credentials.
pub async fn require_basic_auth(
    State(auth): State<Arc<BasicAuth>>,
    req: Request,
    next: Next,
) -> Response {
    let authorized = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(|v| auth.verify(v))
        .unwrap_or(false);

    if !authorized {
        debug!(path = %req.uri().path(), "auth: rejected request");
        return AppError::Unauthorized.into_response();
    }
    next.run(req).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_for(user: &str, pass: &str) -> String {
        format!("Basic {}", STANDARD.encode(format!("{user}:{pass}")))
    }

    #[test]
    fn accepts_matching_credentials() {
        let auth = BasicAuth::new("prometheus", "s3cr:et");
        assert!(auth.verify(&header_for("prometheus", "s3cr:et")));
        assert!(auth.verify(&header_for("prometheus", "s3cr:et").replace("Basic", "basic")));
    }

    #[test]
    fn rejects_everything_else() {
        let auth = BasicAuth::new("prometheus", "prometheus");
        assert!(!auth.verify(&header_for("prometheus", "wrong")));
        assert!(!auth.verify(&header_for("admin", "prometheus")));
        assert!(!auth.verify("Bearer abc"));
        assert!(!auth.verify("Basic !!!not-base64"));
        assert!(!auth.verify(""));
    }
}
