use anyhow::Result;
use beam_core::config::RelayConfig;
use beam_core::server;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file (for BEAM_AUTH_TOKEN etc.)
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = RelayConfig::from_env();
    server::start_relay_server(config, None).await
}
