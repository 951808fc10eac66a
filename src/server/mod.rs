pub mod api;
pub mod registry;

use anyhow::{Context, Result};
use colored::*;

use crate::config::ServerConfig;

pub use api::{admit_candidate, router, AppState};
pub use registry::{Broadcast, ClientKind, ClientRegistry};

/// Open the configured store and serve the endpoint until ctrl-c.
pub async fn start(config: ServerConfig) -> Result<()> {
    let store = config
        .open_store()
        .with_context(|| format!("opening {} store", config.persistence))?;
    let state = AppState::new(store, config.environment.clone());
    serve(config, state).await
}

/// Serve `state` with the routes and bind address from `config`.
pub async fn serve(config: ServerConfig, state: AppState) -> Result<()> {
    let app = router(state.clone(), &config.base_path);
    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;

    println!(
        "{} Endpoint running at {}",
        "✓".green(),
        format!("http://{}{}", addr, config.base_path).bright_blue()
    );
    tracing::info!(
        %addr,
        base_path = %config.base_path,
        store = state.store.name(),
        environment = %config.environment,
        "endpoint listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("endpoint stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!("failed to listen for ctrl-c: {err}");
        std::future::pending::<()>().await;
    }
}
