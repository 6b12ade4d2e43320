//! Backup Commands

use anyhow::{Context, Result};
use clap::Subcommand;
use std::path::PathBuf;

use crate::client::DaemonClient;
use crate::output::{print_message, print_success, OutputFormat};

#[derive(Subcommand)]
pub enum BackupCommands {
    /// Download the peer registry
    Export {
        /// Output file; defaults to the name suggested by the daemon
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Replace registry and interface peers from a backup file
    Restore {
        /// Backup file
        file: PathBuf,
    },
}

pub async fn execute(cmd: BackupCommands, client: DaemonClient, format: OutputFormat) -> Result<()> {
    match cmd {
        BackupCommands::Export { output } => {
            let payload = client.export().await?;
            let path = output.unwrap_or_else(|| PathBuf::from(payload.file_name()));
            let mut content = serde_json::to_vec_pretty(&payload)?;
            content.push(b'\n');
            std::fs::write(&path, content)
                .with_context(|| format!("failed to write {}", path.display()))?;
            print_success(&format!(
                "Exported {} peers to {}",
                payload.peers.len(),
                path.display()
            ));
        }

        BackupCommands::Restore { file } => {
            let data = std::fs::read(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let name = file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "backup.json".to_string());
            let reply = client.restore(&name, data).await?;
            print_message(
                &format!(
                    "Restored {} peers ({} enabled)",
                    reply["peers"], reply["enabled"]
                ),
                format,
            );
        }
    }

    Ok(())
}
