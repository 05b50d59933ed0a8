mod cache;
mod config;
mod deadline;
mod embedding;
mod errors;
mod keywords;
mod llm_client;
mod metrics;
mod pipeline;
mod pool;
mod providers;
mod retry;
mod routes;
mod state;
mod stats;
mod text;

#[cfg(test)]
mod testing;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;
use crate::metrics::TracingMetricsSink;
use crate::pipeline::MatchEngine;
use crate::providers::HttpHandleFactory;
use crate::routes::build_router;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_CRATE_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Matcher API v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Providers: embeddings {} ({}), narrative {}",
        config.provider.embedding_api_url,
        config.provider.embedding_model,
        llm_client::MODEL
    );

    // Build the engine (pre-warms the client pool)
    let factory = Arc::new(HttpHandleFactory::new(config.provider.clone()));
    let engine = Arc::new(
        MatchEngine::new(
            config.engine.clone(),
            factory,
            Arc::new(TracingMetricsSink),
        )
        .await,
    );
    info!(
        "Engine ready: cache {} entries / {}s TTL, partial results {}",
        config.engine.cache_max_size,
        config.engine.cache_ttl.as_secs(),
        if config.engine.partial_results_enabled { "on" } else { "off" }
    );

    let state = AppState {
        engine: Arc::clone(&engine),
    };

    // Build router
    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive()); // TODO: tighten CORS in production

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    engine.shutdown();
    info!("Matcher API stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received, draining requests");
}
