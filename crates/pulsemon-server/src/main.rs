use anyhow::Result;
use std::net::SocketAddr;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use pulsemon_server::app;
use pulsemon_server::config::ServerConfig;
use pulsemon_server::state::AppState;
use pulsemon_storage::select_backend;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("pulsemon=info".parse()?))
        .init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config/server.toml".to_string());
    let config = ServerConfig::load(&config_path)?;

    let selected = select_backend(&config.storage.options()).await;
    let shutdown = CancellationToken::new();
    let flusher = selected.spawn_flusher(shutdown.clone());

    let state = AppState::new(selected.store.clone(), selected.kind, config.secret());
    let app = app::build_http_app(state);

    let http_addr: SocketAddr = config.listen_addr().parse()?;
    let listener = tokio::net::TcpListener::bind(http_addr).await?;
    tracing::info!(
        http = %http_addr,
        backend = %selected.kind,
        signed = config.secret().is_some(),
        "Server started"
    );

    let result = axum::serve(listener, app)
        .with_graceful_shutdown(async {
            signal::ctrl_c().await.ok();
            tracing::info!("Shutting down gracefully");
        })
        .await;
    if let Err(e) = &result {
        tracing::error!(error = %e, "HTTP server error");
    }

    shutdown.cancel();
    if let Some(handle) = flusher {
        if let Err(e) = handle.await {
            tracing::error!(error = %e, "Snapshot flusher failed");
        }
    }
    let store = selected.store.clone();
    match tokio::task::spawn_blocking(move || store.close()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!(error = %e, "Failed to close metric store"),
        Err(e) => tracing::error!(error = %e, "Close task failed"),
    }
    tracing::info!("Server stopped");

    result.map_err(Into::into)
}
