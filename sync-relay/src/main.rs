//! sync-relay binary entry point.
//!
//! Usage:
//! ```bash
//! sync-relay --config relay.toml
//! sync-relay --listen 127.0.0.1:9000
//! ```

use brainplus_sync_relay::cleanup::spawn_cleanup_task;
use brainplus_sync_relay::config::Config;
use brainplus_sync_relay::http::{build_router, health};
use brainplus_sync_relay::server::SyncRelay;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sync-relay", version, about = "BrainPlus sync room relay")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "relay.toml")]
    config: PathBuf,

    /// Listen address override
    #[arg(short, long)]
    listen: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let cli = Cli::parse();

    let mut config = if cli.config.exists() {
        Config::from_file(&cli.config)?
    } else {
        tracing::info!("No config file found, using defaults");
        Config::default()
    };

    if let Some(listen) = cli.listen {
        config.server.bind_address = listen;
    }

    health::init_start_time();
    let relay = Arc::new(SyncRelay::new(config));
    let _cleanup = spawn_cleanup_task(relay.clone(), relay.config().rooms.clone());

    let listener = tokio::net::TcpListener::bind(&relay.config().server.bind_address).await?;
    tracing::info!("sync-relay v{} listening on {}", env!("CARGO_PKG_VERSION"), listener.local_addr()?);

    axum::serve(listener, build_router(relay))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("sync-relay stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
