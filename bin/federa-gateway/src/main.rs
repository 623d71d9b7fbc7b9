//! Federa Gateway - identity broker HTTP front door

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use federa_gateway::{router, state::AppState};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "federa-gateway")]
#[command(about = "Federa identity federation gateway")]
#[command(version)]
struct Args {
    /// Configuration file path (TOML)
    #[arg(short, long, env = "FEDERA_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address, overrides `server.listen`
    #[arg(short, long, env = "FEDERA_LISTEN")]
    listen: Option<SocketAddr>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| args.log_level.clone().into());
    let registry = tracing_subscriber::registry().with(filter);
    match args.log_format {
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
    }

    info!("Starting Federa Gateway");

    let config = federa_gateway::load_config(args.config.as_deref())
        .context("failed to load configuration")?;
    let listen = args.listen.unwrap_or(config.server.listen);

    let state = AppState::build(&config)
        .await
        .context("failed to initialize gateway")?;
    let app = router(
        state,
        Duration::from_millis(config.server.request_timeout_ms),
    );

    let listener = TcpListener::bind(listen)
        .await
        .with_context(|| format!("failed to bind {listen}"))?;
    info!("Gateway listening on {}", listen);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for shutdown signal: {}", e);
    }
}
