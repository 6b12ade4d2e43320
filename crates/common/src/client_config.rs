//! Client-side `wg-quick` configuration rendering

use crate::types::PeerRecord;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Server-wide values written into every client config
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSettings {
    /// `host:port` clients dial; omitted from the config when unset
    pub endpoint: Option<String>,

    /// DNS servers pushed to clients
    pub dns: Vec<String>,

    /// Traffic the client routes through the tunnel
    pub allowed_ips: Vec<String>,

    pub persistent_keepalive: Option<u16>,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            endpoint: None,
            dns: Vec::new(),
            allowed_ips: vec!["0.0.0.0/0".to_string(), "::/0".to_string()],
            persistent_keepalive: Some(25),
        }
    }
}

/// Render the config a client imports to connect as `peer`
pub fn render_client_config(
    peer: &PeerRecord,
    server_public_key: &str,
    settings: &ClientSettings,
) -> Result<String> {
    let private_key = peer.private_key.as_deref().ok_or_else(|| {
        Error::Validation(format!("Private key not available for peer '{}'", peer.name))
    })?;

    let mut out = String::new();
    out.push_str(&format!("# WireGuard configuration for {}\n\n", peer.name));
    out.push_str("[Interface]\n");
    out.push_str(&format!("PrivateKey = {}\n", private_key));
    out.push_str(&format!("Address = {}\n", peer.ips.join(", ")));
    if !settings.dns.is_empty() {
        out.push_str(&format!("DNS = {}\n", settings.dns.join(", ")));
    }

    out.push_str("\n[Peer]\n");
    out.push_str(&format!("PublicKey = {}\n", server_public_key));
    out.push_str(&format!("AllowedIPs = {}\n", settings.allowed_ips.join(", ")));
    if let Some(endpoint) = &settings.endpoint {
        out.push_str(&format!("Endpoint = {}\n", endpoint));
    }
    if let Some(keepalive) = settings.persistent_keepalive.filter(|k| *k > 0) {
        out.push_str(&format!("PersistentKeepalive = {}\n", keepalive));
    }

    Ok(out)
}
