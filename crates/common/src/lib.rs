//! wgui Common Library
//!
//! Peer registry, runtime control and reconciliation for a WireGuard
//! interface, shared by the daemon and the CLI.

pub mod backup;
pub mod client_config;
pub mod error;
pub mod reconciler;
pub mod runtime;
pub mod status;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use backup::BackupPayload;
pub use client_config::{render_client_config, ClientSettings};
pub use error::{Error, ErrorKind, Result};
pub use reconciler::Reconciler;
pub use runtime::{CommandExecutor, ProcessExecutor, RuntimeController, WgController};
pub use store::{JsonFileStore, MemoryStore, PeerStore};
pub use types::*;

/// wgui version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default WireGuard interface
pub const DEFAULT_INTERFACE: &str = "wg0";

/// Default data directory
pub fn default_data_dir() -> std::path::PathBuf {
    std::path::PathBuf::from("/var/lib/wgui")
}

/// Registry file inside a data directory
pub fn registry_path(data_dir: &std::path::Path) -> std::path::PathBuf {
    data_dir.join("peers.json")
}
