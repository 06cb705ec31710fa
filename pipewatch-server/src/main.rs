// Pipewatch inspection server

use clap::Parser;
use pipewatch_server::{create_router, AppState, Cli, ServerConfig, Services};
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = ServerConfig::load(&cli)?;

    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .init();

    info!("Starting Pipewatch inspection server v{}", env!("CARGO_PKG_VERSION"));

    let services = Arc::new(Services::from_config(config)?);

    match services.load_model() {
        Ok(()) => info!("Detector ready: {:?}", services.engine.status().backend),
        Err(e) => warn!("Detector unavailable, streaming without detections: {}", e),
    }

    let probe_source = services.source.clone();
    let max_index = services.config.probe_max_index;
    let cameras = tokio::task::spawn_blocking(move || probe_source.probe(max_index)).await?;
    if cameras.is_empty() {
        info!("No USB cameras found");
    } else {
        info!("USB cameras available at indices {:?}", cameras);
    }

    let app = create_router(AppState::new(services.clone()));
    let addr = services.config.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("HTTP server listening on http://{}", addr);
    info!("Video stream available at ws://{}/ws/video", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(wait_for_shutdown())
        .await?;

    let source = services.source.clone();
    tokio::task::spawn_blocking(move || source.close()).await?;
    info!("Pipewatch stopped");
    Ok(())
}

async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
