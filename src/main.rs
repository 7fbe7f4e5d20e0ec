//! Hashtag Feed Provider: binary entrypoint.
//! Boots the Axum HTTP server: notification intake, status, and metrics.

use std::sync::Arc;
use std::time::Duration;

use hashtag_feed_provider::{
    api::{self, AppState},
    config,
    ingest::providers::instagram::InstagramFetcher,
    metrics::Metrics,
    notify, FeedEngine,
};
use shuttle_axum::ShuttleAxum;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Compact logs by default, JSON when FEED_LOG_JSON=1.
/// The runtime may already have installed a subscriber; that one wins.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("hashtag_feed_provider=info,warn"));
    let json = std::env::var("FEED_LOG_JSON").ok().is_some_and(|v| v == "1");

    let res = if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().compact())
            .try_init()
    };
    if res.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = config::load_default()?;
    tracing::info!(
        source = %cfg.source_base_url,
        callback = cfg.callback_url.as_deref().unwrap_or("-"),
        "feed provider starting"
    );

    let metrics = Metrics::init()?;
    let fetcher = InstagramFetcher::new(cfg.source_base_url.clone())
        .with_timeout(cfg.request_timeout_secs);
    let engine = FeedEngine::new(Arc::new(fetcher), notify::sink_from_config(&cfg))
        .with_default_pacing(Duration::from_millis(cfg.default_pacing_ms));

    let router = api::router(AppState { engine }).merge(metrics.router());

    Ok(router.into())
}
