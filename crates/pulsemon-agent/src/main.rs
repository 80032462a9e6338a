use anyhow::Result;
use pulsemon_agent::agent;
use pulsemon_agent::config::AgentConfig;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("pulsemon=info".parse()?))
        .init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config/agent.toml".to_string());

    let config = AgentConfig::load(&config_path)?;
    tracing::info!(
        server = %config.server_url(),
        signed = config.secret().is_some(),
        "pulsemon-agent starting"
    );

    let shutdown = CancellationToken::new();
    let mut tasks = agent::spawn(
        &config,
        pulsemon_collector::default_collectors(),
        shutdown.clone(),
    )?;

    signal::ctrl_c().await?;
    tracing::info!("Shutting down gracefully");
    shutdown.cancel();

    while let Some(result) = tasks.join_next().await {
        if let Err(e) = result {
            tracing::error!(error = %e, "Agent task failed");
        }
    }
    tracing::info!("Agent stopped");
    Ok(())
}
