use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::net::TcpListener;
use tracing::{error, info};

mod api;
mod config;
mod engine;
mod error;
mod ingestion;
mod models;
mod ollama;
mod prompt;
mod service;
mod vision;

use crate::error::format_error_chain;
use crate::ollama::{OllamaClient, OllamaEngine};
use crate::service::MultimodalService;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    init_logging();

    info!("Starting mosaic service v{}", env!("CARGO_PKG_VERSION"));

    let config = config::load_config()?;
    info!(
        host = %config.server.host,
        port = config.server.port,
        engine = %config.engine.base_url,
        model = %config.engine.model,
        "Configuration loaded"
    );

    let metrics = PrometheusBuilder::new().install_recorder()?;

    // The engine is loaded exactly once; without it nothing can be served
    let engine = match OllamaEngine::load(&config.engine).await {
        Ok(engine) => engine,
        Err(e) => {
            error!(error = %format_error_chain(&e), "Failed to load generation engine");
            return Err(e.into());
        }
    };

    let caption_client = Arc::new(OllamaClient::new(&config.engine)?);
    let captioner = vision::captioning::from_config(&config.captioning, caption_client);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let service = Arc::new(MultimodalService::new(config, Box::new(engine), captioner));

    let app = api::router(service, Some(metrics));

    // Start the server
    let listener = TcpListener::bind(&addr).await?;
    info!("Listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let format = fmt::format()
        .with_target(true)
        .with_thread_ids(true)
        .compact();

    // Use RUST_LOG if set, otherwise default to info level for our crate
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("mosaic_service=info"));

    tracing_subscriber::registry()
        .with(fmt::layer().event_format(format))
        .with(filter)
        .init();
}
