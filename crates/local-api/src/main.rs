use anyhow::Result;

mod routes;
#[cfg(test)]
mod tests;

use amp_config::{ConfigLoader, ModelCatalog};
use amp_orchestrator::Orchestrator;
use amp_runtime::EngineProcessManager;
use routes::AppState;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => warn!("Failed to listen for shutdown signal: {}", e),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive(tracing::Level::INFO.into()))
        .init();

    info!("Starting AMP server");

    // Load configuration
    let config_path = std::env::var_os("AMP_CONFIG").map(PathBuf::from);
    let config = ConfigLoader::load(config_path.as_ref())?;

    let catalog = ModelCatalog::from_config(&config.models);
    let models = catalog.list_models()?;
    if models.is_empty() {
        warn!("No models found in {}", catalog.directory().display());
    } else {
        info!("Found {} models, default is {}", models.len(), models[0]);
    }

    // The engine starts lazily on first use
    let engine = EngineProcessManager::new(&config.engine, config.models.directory.clone())?;

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let orchestrator = Arc::new(Orchestrator::builder(config, catalog, engine).build());

    let app = routes::router(AppState::new(orchestrator.clone()))
        .layer(TraceLayer::new_for_http());

    info!("Listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    orchestrator.shutdown().await;
    info!("Server stopped");

    Ok(())
}
