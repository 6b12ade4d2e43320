//! `wg` / `wg-quick` backed runtime controller

use super::{CommandExecutor, RuntimeController};
use crate::status::{parse_dump, parse_show};
use crate::types::{DumpPeer, KeyPair, RuntimePeerFact};
use crate::{Error, Result};
use async_trait::async_trait;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

/// Executes commands as child processes with a bounded run time
#[derive(Debug, Clone)]
pub struct ProcessExecutor {
    timeout: Duration,
}

impl ProcessExecutor {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for ProcessExecutor {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

#[async_trait]
impl CommandExecutor for ProcessExecutor {
    async fn run(&self, program: &str, args: &[&str], stdin: Option<&str>) -> Result<String> {
        let cmdline = std::iter::once(program)
            .chain(args.iter().copied())
            .collect::<Vec<_>>()
            .join(" ");
        debug!("exec: {}", cmdline);

        let mut child = Command::new(program)
            .args(args)
            .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::tool(&cmdline, e.to_string()))?;

        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(input.as_bytes())
                .await
                .map_err(|e| Error::tool(&cmdline, e.to_string()))?;
            pipe.write_all(b"\n")
                .await
                .map_err(|e| Error::tool(&cmdline, e.to_string()))?;
        }

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|e| Error::tool(&cmdline, e.to_string()))?,
            Err(_) => {
                warn!("`{}` timed out after {:?}", cmdline, self.timeout);
                return Err(Error::tool_timeout(&cmdline, self.timeout.as_secs()));
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let message = if stderr.is_empty() {
                format!("exited with {}", output.status)
            } else {
                stderr
            };
            return Err(Error::tool(&cmdline, message));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

/// Runtime controller for one WireGuard interface
#[derive(Clone)]
pub struct WgController {
    interface: String,
    exec: Arc<dyn CommandExecutor>,
}

impl WgController {
    pub fn new(interface: impl Into<String>, exec: Arc<dyn CommandExecutor>) -> Self {
        Self {
            interface: interface.into(),
            exec,
        }
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }
}

#[async_trait]
impl RuntimeController for WgController {
    async fn generate_keypair(&self) -> Result<KeyPair> {
        let private_key = self.exec.run("wg", &["genkey"], None).await?;
        let public_key = self.public_key(&private_key).await?;
        Ok(KeyPair {
            private_key,
            public_key,
        })
    }

    async fn public_key(&self, private_key: &str) -> Result<String> {
        self.exec.run("wg", &["pubkey"], Some(private_key)).await
    }

    async fn install_peer(&self, public_key: &str, allowed_ips: &[String]) -> Result<()> {
        let ips = allowed_ips.join(",");
        self.exec
            .run(
                "wg",
                &["set", self.interface.as_str(), "peer", public_key, "allowed-ips", ips.as_str()],
                None,
            )
            .await?;
        Ok(())
    }

    async fn remove_peer(&self, public_key: &str) -> Result<()> {
        self.exec
            .run("wg", &["set", self.interface.as_str(), "peer", public_key, "remove"], None)
            .await?;
        Ok(())
    }

    async fn save(&self) -> Result<()> {
        self.exec.run("wg-quick", &["save", self.interface.as_str()], None).await?;
        Ok(())
    }

    async fn dump(&self) -> Result<Vec<DumpPeer>> {
        let output = self.exec.run("wg", &["show", self.interface.as_str(), "dump"], None).await?;
        Ok(parse_dump(&output))
    }

    async fn show(&self) -> Result<Vec<RuntimePeerFact>> {
        let output = self.exec.run("wg", &["show", self.interface.as_str()], None).await?;
        Ok(parse_show(&output))
    }
}
