//! Runtime interface control
//!
//! The live WireGuard interface is reached only through [`RuntimeController`].
//! [`WgController`] binds it to the `wg` / `wg-quick` tools via a
//! [`CommandExecutor`]; [`mock::MockRuntime`] keeps an in-memory peer table
//! for tests.

pub mod mock;
mod wg;

pub use wg::{ProcessExecutor, WgController};

use crate::types::{DumpPeer, KeyPair, RuntimePeerFact};
use crate::Result;
use async_trait::async_trait;

/// Runs external programs and returns their trimmed stdout
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Run `program` with `args`, feeding `stdin` when given.
    ///
    /// A non-zero exit becomes [`crate::Error::ExternalTool`] carrying the
    /// tool's stderr.
    async fn run(&self, program: &str, args: &[&str], stdin: Option<&str>) -> Result<String>;
}

/// Operations on the live interface
#[async_trait]
pub trait RuntimeController: Send + Sync {
    /// Generate a fresh private/public keypair
    async fn generate_keypair(&self) -> Result<KeyPair>;

    /// Derive the public key for a private key
    async fn public_key(&self, private_key: &str) -> Result<String>;

    /// Install a peer, or replace its allowed IPs if already present
    async fn install_peer(&self, public_key: &str, allowed_ips: &[String]) -> Result<()>;

    /// Remove a peer; removing an absent peer is not an error
    async fn remove_peer(&self, public_key: &str) -> Result<()>;

    /// Persist the running configuration to durable storage
    async fn save(&self) -> Result<()>;

    /// Machine-readable listing of every runtime peer
    async fn dump(&self) -> Result<Vec<DumpPeer>>;

    /// Parsed human-readable status of every runtime peer
    async fn show(&self) -> Result<Vec<RuntimePeerFact>>;
}
