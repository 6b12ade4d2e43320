//! Daemon configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use wgui_common::ClientSettings;

/// Daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Data directory holding the registry and credentials
    pub data_dir: PathBuf,

    /// HTTP listen address
    pub listen: String,

    /// Directory with the web UI, served at `/`
    pub static_dir: Option<PathBuf>,

    /// WireGuard configuration
    pub wireguard: WireGuardConfig,

    /// Authentication configuration
    pub auth: AuthConfig,

    /// Backup upload limits
    pub backup: BackupConfig,

    /// Values written into rendered client configs
    pub client: ClientSettings,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            data_dir: wgui_common::default_data_dir(),
            listen: "127.0.0.1:8080".to_string(),
            static_dir: None,
            wireguard: WireGuardConfig::default(),
            auth: AuthConfig::default(),
            backup: BackupConfig::default(),
            client: ClientSettings::default(),
        }
    }
}

/// WireGuard-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WireGuardConfig {
    /// Interface name
    pub interface: String,

    /// `wg-quick` config file; defaults to `/etc/wireguard/<interface>.conf`
    pub conf_path: Option<PathBuf>,

    /// Upper bound on any single `wg` / `systemctl` invocation
    pub command_timeout_secs: u64,

    /// systemd unit; defaults to `wg-quick@<interface>`
    pub service: Option<String>,
}

impl Default for WireGuardConfig {
    fn default() -> Self {
        Self {
            interface: wgui_common::DEFAULT_INTERFACE.to_string(),
            conf_path: None,
            command_timeout_secs: 10,
            service: None,
        }
    }
}

impl WireGuardConfig {
    pub fn conf_path(&self) -> PathBuf {
        self.conf_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(format!("/etc/wireguard/{}.conf", self.interface)))
    }

    pub fn service(&self) -> String {
        self.service
            .clone()
            .unwrap_or_else(|| format!("wg-quick@{}", self.interface))
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs.max(1))
    }
}

/// Authentication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Session lifetime
    pub session_ttl_secs: u64,

    /// Password hash file; defaults to `<data_dir>/credentials.json`
    pub credentials_path: Option<PathBuf>,

    /// Failed logins before lockout
    pub max_failed_attempts: u32,

    pub lockout_secs: u64,

    /// Mark the session cookie `Secure`
    pub secure_cookie: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            session_ttl_secs: 12 * 60 * 60,
            credentials_path: None,
            max_failed_attempts: 10,
            lockout_secs: 300,
            secure_cookie: false,
        }
    }
}

/// Backup configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupConfig {
    /// Largest accepted restore upload
    pub max_upload_bytes: usize,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            max_upload_bytes: 1024 * 1024,
        }
    }
}

impl DaemonConfig {
    /// Load configuration from file
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: &std::path::Path) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the peer registry path
    pub fn registry_path(&self) -> PathBuf {
        wgui_common::registry_path(&self.data_dir)
    }

    /// Get the credentials path
    pub fn credentials_path(&self) -> PathBuf {
        self.auth
            .credentials_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join("credentials.json"))
    }
}
