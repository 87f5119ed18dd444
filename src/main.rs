//! Market radar service: binary entrypoint.
//! Loads config, warms the embedding model, and serves the Axum router.

use anyhow::Context;
use shuttle_axum::ShuttleAxum;
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use market_radar::api::{self, AppState};
use market_radar::metrics::Metrics;
use market_radar::{
    Embedder, FastEmbedEncoder, HttpTransport, Pipeline, PipelineConfig, SourceRegistry,
};

/// Structured logs; `LOG_FORMAT=json` switches to JSON lines.
/// Safe to call when a subscriber is already installed.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("market_radar=info,warn"));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    let res = if json {
        registry.with(fmt::layer().json()).try_init()
    } else {
        registry.with(fmt::layer().compact()).try_init()
    };
    if res.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}

async fn build_router() -> anyhow::Result<shuttle_axum::axum::Router> {
    let cfg = PipelineConfig::load_default().context("loading pipeline config")?;
    let registry = SourceRegistry::load_default().context("loading source registry")?;
    tracing::info!(sources = registry.len(), model = %cfg.embedding.model, "config loaded");

    let emb_cfg = cfg.embedding.clone();
    let encoder = tokio::task::spawn_blocking(move || FastEmbedEncoder::new(&emb_cfg))
        .await
        .context("embedding model init task")?
        .context("initialising embedding model")?;
    let embedder = Arc::new(Embedder::new(Arc::new(encoder), cfg.embedding.clone()));

    let transport = Arc::new(HttpTransport::new(&cfg.fetch).context("building http client")?);

    let metrics = if cfg.api.metrics {
        match Metrics::init(&cfg) {
            Ok(m) => Some(m),
            Err(e) => {
                tracing::warn!(error = %e, "metrics recorder not installed");
                None
            }
        }
    } else {
        None
    };

    let state = AppState::new(Pipeline::new(cfg, registry, transport, embedder));
    Ok(match &metrics {
        Some(m) => api::router_with_metrics(state, m),
        None => api::router(state),
    })
}

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();

    init_tracing();

    let router = build_router().await.map_err(|e| {
        tracing::error!(error = %format!("{e:#}"), "startup failed");
        e
    })?;

    Ok(router.into())
}
