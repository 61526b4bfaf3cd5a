use media_relay::api::{ApiServer, ApiServerConfig, AppState};
use media_relay::config::AppConfig;
use media_relay::logging;
use media_relay::utils::http_client;
use tracing::{info, warn};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = AppConfig::from_env();
    // Keep the guard alive so buffered file logs are flushed on exit.
    let _log_guard = logging::init_logging(config.log_dir.as_deref())?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting media-relay");

    config.prepare().await?;
    config.log_tool_versions().await;
    http_client::install_rustls_provider();

    let state = AppState::new(&config)?;
    let server = ApiServer::new(ApiServerConfig::from_env_or_default(), state);

    let shutdown = server.cancel_token();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C, shutting down"),
            Err(e) => warn!(error = %e, "Failed to listen for Ctrl+C, shutting down"),
        }
        shutdown.cancel();
    });

    server.run().await?;
    info!("media-relay stopped");
    Ok(())
}
