use anyhow::Result;
use tracing_subscriber::EnvFilter;

use tether_signaling_gateway::ApplicationBootstrap;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("TETHER_LOG").unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    ApplicationBootstrap::run().await
}
