//! Peer Commands

use anyhow::Result;
use clap::Subcommand;
use colored::Colorize;
use serde::Serialize;
use std::path::PathBuf;
use wgui_common::{DriftKind, DriftReport, MergedPeerView, PeerPatch, PeerRecord, RuntimePeerView};

use crate::client::DaemonClient;
use crate::output::{print_item, print_list, print_success, OutputFormat, TableDisplay};

#[derive(Subcommand)]
pub enum PeerCommands {
    /// List peers with their live status
    List,

    /// Create a peer with a fresh keypair
    Create {
        /// Peer name
        name: String,

        /// Allowed IPs (repeat or comma-separate)
        #[arg(short, long = "ip", required = true, value_delimiter = ',')]
        ips: Vec<String>,
    },

    /// Change a peer's name, IPs or keys
    Update {
        /// Current peer name
        name: String,

        /// New name
        #[arg(long)]
        rename: Option<String>,

        /// Replacement allowed IPs
        #[arg(short, long = "ip", value_delimiter = ',')]
        ips: Option<Vec<String>>,

        /// Generate a new keypair
        #[arg(long)]
        rotate_keys: bool,

        /// Explicit public key (requires --private-key)
        #[arg(long, requires = "private_key")]
        public_key: Option<String>,

        /// Explicit private key (requires --public-key)
        #[arg(long, requires = "public_key")]
        private_key: Option<String>,
    },

    /// Delete a peer
    Delete {
        /// Peer name
        name: String,
    },

    /// Put a disabled peer back on the interface
    Enable {
        /// Peer name
        name: String,
    },

    /// Take a peer off the interface, keeping its record
    Disable {
        /// Peer name
        name: String,
    },

    /// Print or save a peer's client configuration
    Config {
        /// Peer name
        name: String,

        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show every peer present on the interface
    Status,

    /// Report differences between registry and interface
    Drift,

    /// Replace the registry with the peers currently on the interface
    Import,
}

/// Registry peer joined with runtime facts
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerDisplay {
    pub name: String,
    pub ips: Vec<String>,
    pub public_key: String,
    pub disabled: bool,
    pub endpoint: Option<String>,
    pub last_handshake: Option<String>,
    pub transfer: Option<String>,
    pub online: bool,
}

impl From<MergedPeerView> for PeerDisplay {
    fn from(view: MergedPeerView) -> Self {
        let status = view.status;
        Self {
            name: view.peer.name,
            ips: view.peer.ips,
            public_key: view.peer.public_key,
            disabled: view.peer.disabled,
            endpoint: status.as_ref().and_then(|s| s.endpoint.clone()),
            last_handshake: status.as_ref().map(|s| s.last_handshake.clone()),
            transfer: status.as_ref().map(|s| format!("↓ {} ↑ {}", s.rx, s.tx)),
            online: status.map_or(false, |s| s.online),
        }
    }
}

impl TableDisplay for PeerDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["Name", "IPs", "Public Key", "State", "Endpoint", "Handshake", "Transfer"]
    }

    fn row(&self) -> Vec<String> {
        let state = if self.disabled {
            "disabled".dimmed().to_string()
        } else if self.online {
            "online".green().to_string()
        } else if self.last_handshake.is_none() {
            "missing".red().to_string()
        } else {
            "offline".yellow().to_string()
        };
        vec![
            self.name.clone(),
            self.ips.join(", "),
            short_key(&self.public_key),
            state,
            self.endpoint.clone().unwrap_or_else(|| "-".to_string()),
            self.last_handshake.clone().unwrap_or_else(|| "-".to_string()),
            self.transfer.clone().unwrap_or_else(|| "-".to_string()),
        ]
    }
}

/// Registry record without runtime facts
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordDisplay {
    pub name: String,
    pub ips: Vec<String>,
    pub public_key: String,
    pub disabled: bool,
    pub created_at: String,
}

impl From<PeerRecord> for RecordDisplay {
    fn from(peer: PeerRecord) -> Self {
        Self {
            name: peer.name,
            ips: peer.ips,
            public_key: peer.public_key,
            disabled: peer.disabled,
            created_at: peer.created_at.format("%Y-%m-%d %H:%M").to_string(),
        }
    }
}

impl TableDisplay for RecordDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["Name", "IPs", "Public Key", "Disabled", "Created"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.name.clone(),
            self.ips.join(", "),
            self.public_key.clone(),
            self.disabled.to_string(),
            self.created_at.clone(),
        ]
    }
}

impl TableDisplay for RuntimePeerView {
    fn headers() -> Vec<&'static str> {
        vec!["Name", "Public Key", "Allowed IPs", "Endpoint", "Handshake", "RX", "TX"]
    }

    fn row(&self) -> Vec<String> {
        let name = if self.name == "unknown" {
            self.name.yellow().to_string()
        } else {
            self.name.clone()
        };
        vec![
            name,
            short_key(&self.public_key),
            self.allowed_ips.join(", "),
            self.endpoint.clone().unwrap_or_else(|| "-".to_string()),
            self.last_handshake.clone(),
            self.rx.clone(),
            self.tx.clone(),
        ]
    }
}

impl TableDisplay for DriftReport {
    fn headers() -> Vec<&'static str> {
        vec!["Peer", "Public Key", "Drift", "Detail"]
    }

    fn row(&self) -> Vec<String> {
        let kind = match self.kind {
            DriftKind::MissingFromRuntime => "missing from runtime".red(),
            DriftKind::UnexpectedInRuntime => "unexpected in runtime".red(),
            DriftKind::Unmanaged => "unmanaged".yellow(),
            DriftKind::AllowedIpsMismatch => "allowed-ips mismatch".yellow(),
        };
        vec![
            self.name.clone().unwrap_or_else(|| "-".to_string()),
            short_key(&self.public_key),
            kind.to_string(),
            self.message.clone(),
        ]
    }
}

fn short_key(key: &str) -> String {
    if key.chars().count() > 12 {
        format!("{}…", key.chars().take(12).collect::<String>())
    } else {
        key.to_string()
    }
}

pub async fn execute(cmd: PeerCommands, client: DaemonClient, format: OutputFormat) -> Result<()> {
    match cmd {
        PeerCommands::List => {
            let peers = client.list_peers().await?;
            let displays: Vec<PeerDisplay> = peers.into_iter().map(PeerDisplay::from).collect();
            print_list(&displays, format);
        }

        PeerCommands::Create { name, ips } => {
            let peer = client.create_peer(&name, &ips).await?;
            print_success(&format!("Created peer {}", peer.name));
            print_item(&RecordDisplay::from(peer), format);
        }

        PeerCommands::Update {
            name,
            rename,
            ips,
            rotate_keys,
            public_key,
            private_key,
        } => {
            let patch = PeerPatch {
                name: rename,
                ips,
                rotate_keys,
                public_key,
                private_key,
            };
            let peer = client.update_peer(&name, &patch).await?;
            print_success(&format!("Updated peer {}", peer.name));
            print_item(&RecordDisplay::from(peer), format);
        }

        PeerCommands::Delete { name } => {
            client.delete_peer(&name).await?;
            print_success(&format!("Deleted peer {}", name));
        }

        PeerCommands::Enable { name } => {
            let outcome = client.set_enabled(&name, true).await?;
            if outcome == "unchanged" {
                print_success(&format!("Peer {} was already enabled", name));
            } else {
                print_success(&format!("Enabled peer {}", name));
            }
        }

        PeerCommands::Disable { name } => {
            let outcome = client.set_enabled(&name, false).await?;
            if outcome == "unchanged" {
                print_success(&format!("Peer {} was already disabled", name));
            } else {
                print_success(&format!("Disabled peer {}", name));
            }
        }

        PeerCommands::Config { name, output } => {
            let config = client.peer_config(&name).await?;
            match output {
                Some(path) => {
                    std::fs::write(&path, config)?;
                    print_success(&format!("Wrote {}", path.display()));
                }
                None => print!("{}", config),
            }
        }

        PeerCommands::Status => {
            let views = client.runtime_status().await?;
            print_list(&views, format);
        }

        PeerCommands::Drift => {
            let reports = client.drift().await?;
            if reports.is_empty() {
                print_success("Registry and interface agree");
            } else {
                print_list(&reports, format);
            }
        }

        PeerCommands::Import => {
            let peers = client.import_from_runtime().await?;
            print_success(&format!("Imported {} peers", peers.len()));
            let displays: Vec<RecordDisplay> = peers.into_iter().map(RecordDisplay::from).collect();
            print_list(&displays, format);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wgui_common::{KeyPair, RuntimePeerFact};

    fn view(status: Option<RuntimePeerFact>, disabled: bool) -> MergedPeerView {
        let mut peer = PeerRecord::new(
            "alice".to_string(),
            KeyPair {
                private_key: "priv".to_string(),
                public_key: "AAAAAAAAAAAAAAAAAAAA=".to_string(),
            },
            vec!["10.0.0.2/32".to_string()],
        );
        peer.disabled = disabled;
        MergedPeerView { peer, status }
    }

    #[test]
    fn test_peer_display_from_view() {
        let mut fact = RuntimePeerFact::new("AAAAAAAAAAAAAAAAAAAA=");
        fact.online = true;
        fact.last_handshake = "1 minute ago".to_string();
        let display = PeerDisplay::from(view(Some(fact), false));

        assert!(display.online);
        assert_eq!(display.transfer.as_deref(), Some("↓ 0 B ↑ 0 B"));
        let row = display.row();
        assert_eq!(row[2], "AAAAAAAAAAAA…");
        assert!(row[3].contains("online"));
    }

    #[test]
    fn test_missing_peer_state() {
        let display = PeerDisplay::from(view(None, false));
        assert!(display.row()[3].contains("missing"));
        let display = PeerDisplay::from(view(None, true));
        assert!(display.row()[3].contains("disabled"));
    }
}
