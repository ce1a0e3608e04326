// ABOUTME: Entry point for the hearth binary.
// ABOUTME: Loads configuration, initializes tracing, and runs the hub until ctrl-c.

use anyhow::Context;
use hearth::Session;
use hearth_recorder::HubConfig;

const DEFAULT_LOG_FILTER: &str = "hearth=info,hearth_recorder=debug,hearth_store=info";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .init();

    let config = HubConfig::load().context("failed to load configuration")?;
    tracing::info!(
        home = %config.home.display(),
        db = %config.recorder.db_path.display(),
        "hearth starting up"
    );

    let session = Session::start(&config)?;

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    tracing::info!("shutdown requested");

    session.stop().await
}
