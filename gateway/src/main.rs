use std::path::PathBuf;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use batchgate_gateway::{app, build_gateway, AppState, Config, MetricsRegistry};

/// Command line: `batchgate [--config <path>] [--version]`.
fn config_path() -> Result<Option<PathBuf>, String> {
    let mut args = std::env::args().skip(1);
    let mut path = None;
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("batchgate {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--config" | "-c" => {
                let value = args.next().ok_or("--config requires a path")?;
                path = Some(PathBuf::from(value));
            }
            other => return Err(format!("Unknown argument: {}", other)),
        }
    }
    Ok(path)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = match config_path()? {
        Some(path) => Config::from_file(&path)?,
        None => Config::load()?,
    };

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| config.logging.level.clone().into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting batchgate v{}", env!("CARGO_PKG_VERSION"));

    if config.models.is_empty() {
        tracing::warn!("No models configured; every inference request will be rejected");
    }

    let metrics = Arc::new(MetricsRegistry::new());
    let gateway = Arc::new(build_gateway(&config, metrics.clone())?);
    tracing::info!("Serving models: {:?}", gateway.models());

    let state = Arc::new(AppState {
        gateway: gateway.clone(),
        metrics,
    });

    // Start server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    tracing::info!("Listening on {}", addr);

    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Flush whatever is still queued before exiting.
    gateway.shutdown().await;
    tracing::info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
