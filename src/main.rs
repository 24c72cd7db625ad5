use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cam_relay::{RegistryConfig, RelayServer, ServerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env is fine
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cam_relay=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServerConfig::from_env().context("invalid server configuration")?;
    let registry_config = RegistryConfig::from_env().context("invalid registry configuration")?;

    tracing::info!(
        addr = %config.bind_addr,
        transcoder = %registry_config.command.program.display(),
        frame_mode = ?config.frame_mode,
        "Starting camera relay"
    );

    let server = RelayServer::with_registry_config(config, registry_config);

    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
        })
        .await?;

    tracing::info!("Camera relay stopped");
    Ok(())
}
