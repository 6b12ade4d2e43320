//! Server Commands

use anyhow::Result;
use clap::Subcommand;
use colored::Colorize;

use crate::client::{DaemonClient, ServerStatus};
use crate::output::{print_item, print_success, print_warning, OutputFormat, TableDisplay};

#[derive(Subcommand)]
pub enum ServerCommands {
    /// Show interface and service status
    Status,

    /// Rotate the server keypair, or install a given private key
    Keys {
        /// Private key to install instead of generating one
        #[arg(long)]
        private_key: Option<String>,
    },

    /// Change the listen port
    Port {
        /// New port
        port: u16,
    },

    /// Restart the WireGuard service
    Restart,
}

impl TableDisplay for ServerStatus {
    fn headers() -> Vec<&'static str> {
        vec!["Interface", "Service", "State", "Public Key", "Port", "Peers"]
    }

    fn row(&self) -> Vec<String> {
        let state = if self.active {
            self.service_state.green().to_string()
        } else {
            self.service_state.red().to_string()
        };
        vec![
            self.interface.clone(),
            self.service.clone(),
            state,
            self.public_key.clone().unwrap_or_else(|| "-".to_string()),
            self.listen_port.map_or_else(|| "-".to_string(), |p| p.to_string()),
            self.peer_count.to_string(),
        ]
    }
}

pub async fn execute(cmd: ServerCommands, client: DaemonClient, format: OutputFormat) -> Result<()> {
    match cmd {
        ServerCommands::Status => {
            let status = client.server_status().await?;
            print_item(&status, format);
        }

        ServerCommands::Keys { private_key } => {
            let public_key = client.set_server_key(private_key.as_deref()).await?;
            print_success(&format!("Server public key is now {}", public_key));
            print_warning("Existing client configs must be updated with the new key");
        }

        ServerCommands::Port { port } => {
            client.set_port(port).await?;
            print_success(&format!("Listen port set to {}", port));
        }

        ServerCommands::Restart => {
            client.restart().await?;
            print_success("WireGuard service restarted");
        }
    }

    Ok(())
}
