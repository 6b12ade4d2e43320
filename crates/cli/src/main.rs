//! wgui CLI - Main Entry Point
//!
//! Talks to the wgui daemon over its HTTP API, plus a local `import`
//! for seeding the registry on the WireGuard host itself.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use wgui_cli::client::{self, DaemonClient};
use wgui_cli::commands::{auth, backup, import, peer, server};
use wgui_cli::output::{self, print_error};

/// wgui CLI - WireGuard peer management
#[derive(Parser)]
#[command(name = "wgui")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Daemon address
    #[arg(long, env = "WGUI_SERVER", default_value = "http://127.0.0.1:8080", global = true)]
    server: String,

    /// Session token; defaults to the one saved by `wgui login`
    #[arg(long, env = "WGUI_TOKEN", hide_env_values = true, global = true)]
    token: Option<String>,

    /// Where the session token is stored
    #[arg(long, global = true)]
    token_file: Option<PathBuf>,

    /// Output format
    #[arg(long, default_value = "table", global = true)]
    format: output::OutputFormat,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage peers
    #[command(subcommand)]
    Peer(peer::PeerCommands),

    /// Manage the WireGuard server
    #[command(subcommand)]
    Server(server::ServerCommands),

    /// Export and restore the peer registry
    #[command(subcommand)]
    Backup(backup::BackupCommands),

    /// Log in, log out, change password
    #[command(flatten)]
    Auth(auth::AuthCommands),

    /// Seed the registry from the live interface, without a daemon
    Import(import::ImportArgs),

    /// Check daemon status
    Status,

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(cli).await {
        print_error(&format!("{:#}", e));
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let token_file = cli.token_file.unwrap_or_else(client::token_path);
    let token = cli.token.or_else(|| client::load_token(&token_file));
    let client = DaemonClient::new(&cli.server, token)?;

    match cli.command {
        Commands::Peer(cmd) => peer::execute(cmd, client, cli.format).await?,
        Commands::Server(cmd) => server::execute(cmd, client, cli.format).await?,
        Commands::Backup(cmd) => backup::execute(cmd, client, cli.format).await?,
        Commands::Auth(cmd) => auth::execute(cmd, client, &token_file).await?,
        Commands::Import(args) => import::execute(args, cli.format).await?,
        Commands::Status => {
            if client.health_check().await {
                println!("✅ Daemon is running at {}", cli.server);
            } else {
                anyhow::bail!("daemon is not responding at {}", cli.server);
            }
        }
        Commands::Version => {
            println!("wgui CLI v{}", wgui_common::VERSION);
        }
    }

    Ok(())
}
