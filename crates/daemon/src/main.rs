//! wgui Daemon
//!
//! Serves the peer management API for one WireGuard interface.

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use wgui_daemon::{AppState, DaemonConfig};

#[derive(Parser)]
#[command(name = "wguid")]
#[command(about = "wgui daemon - WireGuard peer management API")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "WGUI_CONFIG", default_value = "/etc/wgui/config.toml")]
    config: PathBuf,

    /// Data directory
    #[arg(short = 'D', long, env = "WGUI_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// HTTP listen address
    #[arg(short, long, env = "WGUI_LISTEN")]
    listen: Option<String>,

    /// WireGuard interface
    #[arg(short, long, env = "WGUI_INTERFACE")]
    interface: Option<String>,

    /// Directory with the web UI
    #[arg(long)]
    static_dir: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Log as JSON lines
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    if cli.json_logs {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .init();
    }

    info!("wgui daemon v{}", wgui_common::VERSION);

    let mut config = DaemonConfig::load(&cli.config)?;
    if let Some(dir) = cli.data_dir {
        config.data_dir = dir;
    }
    if let Some(listen) = cli.listen {
        config.listen = listen;
    }
    if let Some(interface) = cli.interface {
        config.wireguard.interface = interface;
    }
    if cli.static_dir.is_some() {
        config.static_dir = cli.static_dir;
    }

    // Ensure data directory exists
    tokio::fs::create_dir_all(&config.data_dir).await?;

    info!(
        "Managing {} with registry {}",
        config.wireguard.interface,
        config.registry_path().display()
    );

    let (state, generated) = AppState::from_config(config)?;
    if let Some(password) = generated {
        warn!(
            "Generated administrator password: {} (set {} to choose one)",
            password,
            wgui_daemon::auth::ADMIN_PASSWORD_ENV
        );
    }

    let server = tokio::spawn(wgui_daemon::serve(Arc::new(state)));

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = server => {
            match result {
                Ok(Err(e)) => tracing::error!("API server error: {}", e),
                Err(e) => tracing::error!("API server task failed: {}", e),
                Ok(Ok(())) => {}
            }
        }
    }

    info!("Daemon shutdown complete");
    Ok(())
}
