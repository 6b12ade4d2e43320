//! Daemon HTTP Client

use anyhow::{bail, Context, Result};
use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::PathBuf;
use tracing::debug;
use wgui_common::{BackupPayload, DriftReport, MergedPeerView, PeerPatch, PeerRecord, RuntimePeerView};

/// Server status as reported by the daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
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

/// Session returned by login
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub token: String,
    pub expires_at: i64,
}

/// Client for the wgui daemon API
pub struct DaemonClient {
    http: reqwest::Client,
    base: String,
    token: Option<String>,
}

impl DaemonClient {
    /// Create a new daemon client
    pub fn new(addr: &str, token: Option<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            base: addr.trim_end_matches('/').to_string(),
            token,
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self.http.request(method, format!("{}{}", self.base, path));
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response> {
        let response = builder
            .send()
            .await
            .with_context(|| format!("cannot reach daemon at {}", self.base))?;
        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status();
        debug!("{}{} -> {}", self.base, response.url().path(), status);
        let body: Value = response.json().await.unwrap_or(Value::Null);
        let message = body["error"].as_str().unwrap_or("request failed");
        if status == reqwest::StatusCode::UNAUTHORIZED {
            bail!("{} (run `wgui login` first)", message);
        }
        bail!("{} ({})", message, status)
    }

    async fn json<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T> {
        Ok(self.send(builder).await?.json().await?)
    }

    /// Check if the daemon is healthy
    pub async fn health_check(&self) -> bool {
        self.send(self.request(Method::GET, "/api/health")).await.is_ok()
    }

    // Auth

    pub async fn login(&self, password: &str) -> Result<Session> {
        self.json(
            self.request(Method::POST, "/api/auth/login")
                .json(&json!({ "password": password })),
        )
        .await
    }

    pub async fn logout(&self) -> Result<()> {
        self.send(self.request(Method::POST, "/api/auth/logout")).await?;
        Ok(())
    }

    pub async fn change_password(&self, current: &str, new: &str) -> Result<()> {
        self.send(
            self.request(Method::PUT, "/api/auth/password")
                .json(&json!({ "currentPassword": current, "newPassword": new })),
        )
        .await?;
        Ok(())
    }

    // Server

    pub async fn server_status(&self) -> Result<ServerStatus> {
        self.json(self.request(Method::GET, "/api/server/status")).await
    }

    /// Rotate the server key, or install `private_key`; returns the new public key
    pub async fn set_server_key(&self, private_key: Option<&str>) -> Result<String> {
        let body = match private_key {
            Some(key) => json!({ "privateKey": key }),
            None => json!({ "rotate": true }),
        };
        let reply: Value = self
            .json(self.request(Method::PUT, "/api/server/keys").json(&body))
            .await?;
        Ok(reply["publicKey"].as_str().unwrap_or_default().to_string())
    }

    pub async fn set_port(&self, port: u16) -> Result<()> {
        self.send(
            self.request(Method::PUT, "/api/server/port")
                .json(&json!({ "port": port })),
        )
        .await?;
        Ok(())
    }

    pub async fn restart(&self) -> Result<()> {
        self.send(self.request(Method::POST, "/api/server/restart")).await?;
        Ok(())
    }

    // Peers

    pub async fn list_peers(&self) -> Result<Vec<MergedPeerView>> {
        self.json(self.request(Method::GET, "/api/peers")).await
    }

    pub async fn create_peer(&self, name: &str, ips: &[String]) -> Result<PeerRecord> {
        self.json(
            self.request(Method::POST, "/api/peers")
                .json(&json!({ "name": name, "ips": ips })),
        )
        .await
    }

    pub async fn update_peer(&self, name: &str, patch: &PeerPatch) -> Result<PeerRecord> {
        self.json(self.request(Method::PUT, &peer_path(name, "")).json(patch))
            .await
    }

    pub async fn delete_peer(&self, name: &str) -> Result<()> {
        self.send(self.request(Method::DELETE, &peer_path(name, ""))).await?;
        Ok(())
    }

    /// Enable or disable; returns the outcome reported by the daemon
    pub async fn set_enabled(&self, name: &str, enabled: bool) -> Result<String> {
        let action = if enabled { "/enable" } else { "/disable" };
        let reply: Value = self
            .json(self.request(Method::POST, &peer_path(name, action)))
            .await?;
        Ok(reply["outcome"].as_str().unwrap_or_default().to_string())
    }

    pub async fn peer_config(&self, name: &str) -> Result<String> {
        Ok(self
            .send(self.request(Method::GET, &peer_path(name, "/config")))
            .await?
            .text()
            .await?)
    }

    pub async fn runtime_status(&self) -> Result<Vec<RuntimePeerView>> {
        self.json(self.request(Method::GET, "/api/peers/status")).await
    }

    pub async fn drift(&self) -> Result<Vec<DriftReport>> {
        self.json(self.request(Method::GET, "/api/peers/drift")).await
    }

    pub async fn import_from_runtime(&self) -> Result<Vec<PeerRecord>> {
        self.json(self.request(Method::POST, "/api/peers/import")).await
    }

    // Backup

    pub async fn export(&self) -> Result<BackupPayload> {
        self.json(self.request(Method::GET, "/api/backup")).await
    }

    pub async fn restore(&self, file_name: &str, data: Vec<u8>) -> Result<Value> {
        let part = reqwest::multipart::Part::bytes(data)
            .file_name(file_name.to_string())
            .mime_str("application/json")?;
        let form = reqwest::multipart::Form::new().part("file", part);
        self.json(self.request(Method::POST, "/api/backup/restore").multipart(form))
            .await
    }
}

/// `/api/peers/<name><suffix>` with the name percent-encoded
fn peer_path(name: &str, suffix: &str) -> String {
    let mut encoded = String::new();
    for b in name.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                encoded.push(b as char)
            }
            _ => encoded.push_str(&format!("%{:02X}", b)),
        }
    }
    format!("/api/peers/{}{}", encoded, suffix)
}

/// Where `wgui login` keeps the session token
pub fn token_path() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".wgui")
        .join("token")
}

pub fn load_token(path: &std::path::Path) -> Option<String> {
    std::fs::read_to_string(path)
        .ok()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

pub fn save_token(path: &std::path::Path, token: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, format!("{}\n", token))
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_path_encodes_name() {
        assert_eq!(peer_path("alice", ""), "/api/peers/alice");
        assert_eq!(peer_path("alice phone", "/config"), "/api/peers/alice%20phone/config");
    }

    #[test]
    fn test_token_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("token");
        assert!(load_token(&path).is_none());
        save_token(&path, "abc123").unwrap();
        assert_eq!(load_token(&path).as_deref(), Some("abc123"));
    }
}
