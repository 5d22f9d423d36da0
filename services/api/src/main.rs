mod config;
mod routes;
mod ws;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::routing::get;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;
use tracing_subscriber::EnvFilter;

use viva_core::collab::{
    OpenAiGenerator, OpenAiTranscriber, SharedGenerator, SharedOcr, SharedTranscriber, TesseractOcr,
};
use viva_core::registry::SessionRegistry;

use crate::config::Config;

/// Everything the websocket and HTTP handlers share.
#[derive(Clone)]
pub struct AppState {
    pub registry: SessionRegistry,
    pub ocr: SharedOcr,
    pub transcriber: SharedTranscriber,
    pub generator: SharedGenerator,
    pub session_linger: Duration,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Config first so dotenvy has loaded .env before the filter reads RUST_LOG.
    let config = Config::from_env().context("Failed to load application configuration")?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    info!("Configuration loaded successfully. Starting interviewer service...");

    let state = AppState {
        registry: SessionRegistry::new(),
        ocr: Arc::new(TesseractOcr::new(config.tesseract_bin.clone())),
        transcriber: Arc::new(OpenAiTranscriber::new(
            config.openai_api_key.clone(),
            config.transcribe_model.clone(),
        )),
        generator: Arc::new(OpenAiGenerator::new(
            config.openai_api_key.clone(),
            config.chat_model.clone(),
        )),
        session_linger: config.session_linger,
    };

    // Permissive CORS so a separately hosted frontend can connect.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/ws", get(ws::ws_handler))
        .route("/report/{session_id}", get(routes::generate_report))
        .route("/health", get(routes::health_check))
        .layer(cors)
        .with_state(state);

    info!("Listening on {}", config.bind_addr);
    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    axum::serve(listener, app).await?;

    Ok(())
}
