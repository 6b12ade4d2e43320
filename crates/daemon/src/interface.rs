//! Server-level interface control
//!
//! Status, key rotation, listen port and restart of the WireGuard service.
//! Key and port changes edit the `[Interface]` section of the `wg-quick`
//! config file and then restart the service to apply it.

use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use wgui_common::{CommandExecutor, Error, Result};

use crate::config::WireGuardConfig;

/// Snapshot of the server side of the interface
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerStatus {
    pub interface: String,
    pub service: String,
    pub service_state: String,
    pub active: bool,
    pub public_key: Option<String>,
    pub listen_port: Option<u16>,
    pub peer_count: usize,
}

/// Controls the interface as a whole
pub struct InterfaceControl {
    interface: String,
    service: String,
    conf_path: PathBuf,
    exec: Arc<dyn CommandExecutor>,
}

impl InterfaceControl {
    pub fn new(config: &WireGuardConfig, exec: Arc<dyn CommandExecutor>) -> Self {
        Self {
            interface: config.interface.clone(),
            service: config.service(),
            conf_path: config.conf_path(),
            exec,
        }
    }

    pub async fn status(&self) -> Result<ServerStatus> {
        let service_state = match self.exec.run("systemctl", &["is-active", self.service.as_str()], None).await {
            Ok(state) => state,
            Err(e) if e.is_retryable() => return Err(e),
            Err(_) => "inactive".to_string(),
        };

        let public_key = self.show("public-key").await.filter(|k| !k.is_empty() && k != "(none)");
        let listen_port = self.show("listen-port").await.and_then(|p| p.parse().ok());
        let peer_count = self
            .show("peers")
            .await
            .map(|out| out.lines().filter(|l| !l.trim().is_empty()).count())
            .unwrap_or(0);

        Ok(ServerStatus {
            interface: self.interface.clone(),
            service: self.service.clone(),
            active: service_state == "active",
            service_state,
            public_key,
            listen_port,
            peer_count,
        })
    }

    /// Public key of the running interface
    pub async fn public_key(&self) -> Result<String> {
        let key = self
            .exec
            .run("wg", &["show", self.interface.as_str(), "public-key"], None)
            .await?;
        if key.is_empty() || key == "(none)" {
            return Err(Error::tool("wg show public-key", "interface has no private key"));
        }
        Ok(key)
    }

    /// Install a new server private key and restart; returns the public key.
    ///
    /// With no key given a fresh one is generated.
    pub async fn set_private_key(&self, private_key: Option<String>) -> Result<String> {
        let private_key = match private_key {
            Some(key) => {
                let key = key.trim().to_string();
                validate_key(&key)?;
                key
            }
            None => self.exec.run("wg", &["genkey"], None).await?,
        };
        let public_key = self.exec.run("wg", &["pubkey"], Some(&private_key)).await?;

        self.edit_conf("PrivateKey", &private_key).await?;
        self.restart().await?;
        info!("Server key changed, public key {}", public_key);
        Ok(public_key)
    }

    /// Change the listen port and restart
    pub async fn set_port(&self, port: i64) -> Result<u16> {
        let port = u16::try_from(port)
            .ok()
            .filter(|p| *p > 0)
            .ok_or_else(|| Error::Validation("Port must be between 1 and 65535".to_string()))?;

        self.edit_conf("ListenPort", &port.to_string()).await?;
        self.restart().await?;
        info!("Listen port changed to {}", port);
        Ok(port)
    }

    pub async fn restart(&self) -> Result<()> {
        self.exec.run("systemctl", &["restart", self.service.as_str()], None).await?;
        info!("Restarted {}", self.service);
        Ok(())
    }

    async fn show(&self, field: &str) -> Option<String> {
        match self.exec.run("wg", &["show", self.interface.as_str(), field], None).await {
            Ok(out) => Some(out),
            Err(e) => {
                warn!("wg show {} {}: {}", self.interface, field, e);
                None
            }
        }
    }

    async fn edit_conf(&self, key: &str, value: &str) -> Result<()> {
        let current = tokio::fs::read_to_string(&self.conf_path).await.map_err(|e| {
            Error::Storage(format!("failed to read {}: {}", self.conf_path.display(), e))
        })?;
        let updated = set_interface_value(&current, key, value);

        let path = self.conf_path.clone();
        tokio::task::spawn_blocking(move || wgui_common::store::write_atomic(&path, updated.as_bytes()))
            .await
            .map_err(|e| Error::Internal(format!("config writer panicked: {}", e)))?
    }
}

/// Base64 of 32 bytes: 43 significant characters and one `=`
fn validate_key(key: &str) -> Result<()> {
    let valid = key.len() == 44
        && key.ends_with('=')
        && key[..43]
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '/');
    if valid {
        Ok(())
    } else {
        Err(Error::Validation("Invalid WireGuard private key".to_string()))
    }
}

/// Set `key = value` inside `[Interface]`, replacing an existing line or
/// appending one at the end of the section.
fn set_interface_value(conf: &str, key: &str, value: &str) -> String {
    let mut out: Vec<String> = Vec::new();
    let mut in_interface = false;
    let mut written = false;

    for line in conf.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with('[') {
            if in_interface && !written {
                insert_before_blank_tail(&mut out, format!("{} = {}", key, value));
                written = true;
            }
            in_interface = trimmed.eq_ignore_ascii_case("[interface]");
        } else if in_interface {
            let name = trimmed.split('=').next().unwrap_or("").trim();
            if name.eq_ignore_ascii_case(key) {
                if !written {
                    out.push(format!("{} = {}", key, value));
                    written = true;
                }
                continue;
            }
        }
        out.push(line.to_string());
    }

    if !written {
        if !in_interface {
            if out.last().map_or(false, |l| !l.trim().is_empty()) {
                out.push(String::new());
            }
            out.push("[Interface]".to_string());
        }
        insert_before_blank_tail(&mut out, format!("{} = {}", key, value));
    }

    let mut text = out.join("\n");
    text.push('\n');
    text
}

fn insert_before_blank_tail(out: &mut Vec<String>, line: String) {
    let pos = out
        .iter()
        .rposition(|l| !l.trim().is_empty())
        .map_or(0, |i| i + 1);
    out.insert(pos, line);
}
