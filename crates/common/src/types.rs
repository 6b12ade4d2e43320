//! Core types for wgui

use chrono::{DateTime, Utc};
use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Handshake value reported by `wg show` before the first handshake
pub const NEVER: &str = "never";

/// A peer as persisted in the registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerRecord {
    pub name: String,
    pub public_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key: Option<String>,
    #[serde(default)]
    pub ips: Vec<String>,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl PeerRecord {
    pub fn new(name: String, keys: KeyPair, ips: Vec<String>) -> Self {
        Self {
            name,
            public_key: keys.public_key,
            private_key: Some(keys.private_key),
            ips,
            disabled: false,
            created_at: Utc::now(),
        }
    }

    /// Assign a fresh keypair, replacing both halves
    pub fn set_keys(&mut self, keys: KeyPair) {
        self.public_key = keys.public_key;
        self.private_key = Some(keys.private_key);
    }
}

/// Partial update for a peer
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerPatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub ips: Option<Vec<String>>,
    #[serde(default)]
    pub rotate_keys: bool,
    #[serde(default)]
    pub public_key: Option<String>,
    #[serde(default)]
    pub private_key: Option<String>,
}

/// WireGuard keypair, both halves base64 encoded
#[derive(Clone, PartialEq, Eq)]
pub struct KeyPair {
    pub private_key: String,
    pub public_key: String,
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &self.public_key)
            .finish()
    }
}

/// Live facts about one peer, parsed from `wg show`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimePeerFact {
    pub public_key: String,
    pub endpoint: Option<String>,
    pub allowed_ips: Vec<String>,
    pub last_handshake: String,
    pub rx: String,
    pub tx: String,
    pub online: bool,
}

impl RuntimePeerFact {
    pub fn new(public_key: impl Into<String>) -> Self {
        Self {
            public_key: public_key.into(),
            endpoint: None,
            allowed_ips: Vec::new(),
            last_handshake: NEVER.to_string(),
            rx: "0 B".to_string(),
            tx: "0 B".to_string(),
            online: false,
        }
    }
}

/// One peer line of `wg show <iface> dump`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DumpPeer {
    pub public_key: String,
    pub preshared_key: Option<String>,
    pub endpoint: Option<String>,
    pub allowed_ips: Vec<String>,
    /// Unix seconds, 0 when no handshake has happened
    pub latest_handshake: i64,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
    pub persistent_keepalive: Option<u16>,
}

/// Registry record joined with its runtime status
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergedPeerView {
    #[serde(flatten)]
    pub peer: PeerRecord,
    pub status: Option<RuntimePeerFact>,
}

/// Runtime peer joined with whatever the registry knows about it
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimePeerView {
    pub name: String,
    pub ips: Vec<String>,
    pub public_key: String,
    pub endpoint: Option<String>,
    pub allowed_ips: Vec<String>,
    pub last_handshake: String,
    pub rx: String,
    pub tx: String,
    pub online: bool,
    pub disabled: bool,
}

/// Result of an idempotent state change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Changed,
    Unchanged,
}

/// Types of drift between registry and runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftKind {
    /// Enabled in the registry, absent from the runtime
    MissingFromRuntime,
    /// Disabled in the registry, present in the runtime
    UnexpectedInRuntime,
    /// Present in the runtime, unknown to the registry
    Unmanaged,
    AllowedIpsMismatch,
}

/// Drift report
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriftReport {
    pub name: Option<String>,
    pub public_key: String,
    pub kind: DriftKind,
    pub message: String,
}

/// Validate a peer name: non-blank, no surrounding whitespace, no path separators
pub fn validate_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(Error::Validation("Missing fields: name".to_string()));
    }
    if name.trim() != name {
        return Err(Error::Validation(
            "Peer name cannot start or end with whitespace".to_string(),
        ));
    }
    if name.contains('/') || name.chars().any(char::is_control) {
        return Err(Error::Validation(format!("Invalid peer name '{}'", name)));
    }
    Ok(())
}

/// Validate an allowed-ips list: non-empty, every entry an IP or CIDR, no repeats
pub fn validate_ips(ips: &[String]) -> Result<()> {
    if ips.is_empty() {
        return Err(Error::Validation("Missing fields: ips".to_string()));
    }
    for (idx, ip) in ips.iter().enumerate() {
        if ip.parse::<IpNetwork>().is_err() {
            return Err(Error::Validation(format!("Invalid IP or CIDR '{}'", ip)));
        }
        if ips[..idx].contains(ip) {
            return Err(Error::Validation(format!("Duplicate IP '{}'", ip)));
        }
    }
    Ok(())
}

/// True when any record other than `exclude` holds one of `ips`
pub fn ip_conflict(peers: &[PeerRecord], ips: &[String], exclude: Option<&str>) -> bool {
    peers.iter().any(|p| {
        Some(p.name.as_str()) != exclude && p.ips.iter().any(|ip| ips.contains(ip))
    })
}
