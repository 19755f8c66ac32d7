use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{debug, info};
use tracing_subscriber::{fmt, EnvFilter};

mod config;
mod error;
mod handlers;
mod metrics;
mod middleware;
mod sentry;
mod server;
mod snapshot;

use config::{Config, ScrapeSettings};
use middleware::auth::BasicAuth;
use sentry::SentryClient;
use snapshot::SnapshotCache;

/// Shared application state available to every handler via `State<Arc<AppState>>`.
pub struct AppState {
    /// Upstream API client; clones share one connection pool.
    pub client: SentryClient,

    /// Organization, project list and metric toggles for every scrape.
    pub settings: ScrapeSettings,

    /// Snapshot cache shared by all scrapes.
    pub cache: SnapshotCache,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = Config::parse();

    // ── 1. Logging ───────────────────────────────────────────────
    let filter = EnvFilter::try_new(&cfg.log_level)
        .with_context(|| format!("invalid log level: {}", cfg.log_level))?;
    fmt().with_env_filter(filter).with_target(true).init();

    // ── 2. Validate configuration ────────────────────────────────
    if let Err(e) = cfg.validate() {
        tracing::error!(error = %e, "exporter: refusing to start");
        return Err(e.into());
    }

    // ── 3. Build shared state ────────────────────────────────────
    let client = SentryClient::new(&cfg.base_url, &cfg.auth_token, cfg.retry)?;
    let state = Arc::new(AppState {
        client,
        settings: cfg.scrape_settings(),
        cache: SnapshotCache::new(&cfg.cache_file),
    });

    info!(basic_auth = cfg.basic_auth, "auth: basic authentication enabled");
    let basic_auth = if cfg.basic_auth {
        if cfg.uses_default_credentials() {
            info!("auth: using default username and password");
        } else {
            debug!(user = %cfg.basic_auth_user, "auth: using custom credentials");
        }
        Some(BasicAuth::new(&cfg.basic_auth_user, &cfg.basic_auth_pass))
    } else {
        None
    };

    // ── 4. Build Axum router ─────────────────────────────────────
    let app = server::create_router(state, basic_auth);

    // ── 5. Bind & serve ──────────────────────────────────────────
    let listener = tokio::net::TcpListener::bind(cfg.listen)
        .await
        .with_context(|| format!("failed to bind {}", cfg.listen))?;

    info!(
        listen = %cfg.listen,
        org = %cfg.org,
        cache = %cfg.cache_file.display(),
        version = env!("CARGO_PKG_VERSION"),
        "starting sentry exporter"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server exited with error")
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("received SIGINT, shutting down");
    }
}
