//! Backup payload format
//!
//! ```json
//! { "type": "wgui-peer-backup", "version": 1, "timestamp": "...", "peers": [ ... ] }
//! ```

use crate::types::{ip_conflict, validate_ips, PeerRecord};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Type tag carried by every backup
pub const BACKUP_TYPE: &str = "wgui-peer-backup";

/// Highest payload version this build understands
pub const BACKUP_VERSION: u32 = 1;

/// Exported registry snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupPayload {
    #[serde(rename = "type")]
    pub kind: String,
    pub version: u32,
    pub timestamp: DateTime<Utc>,
    pub peers: Vec<PeerRecord>,
}

impl BackupPayload {
    pub fn new(peers: Vec<PeerRecord>) -> Self {
        Self {
            kind: BACKUP_TYPE.to_string(),
            version: BACKUP_VERSION,
            timestamp: Utc::now(),
            peers,
        }
    }

    /// Suggested download file name
    pub fn file_name(&self) -> String {
        format!("wgui-backup-{}.json", self.timestamp.format("%Y%m%d-%H%M%S"))
    }

    /// Validate raw bytes and extract the peer list
    pub fn parse(data: &[u8]) -> Result<Vec<PeerRecord>> {
        let value: serde_json::Value = serde_json::from_slice(data)
            .map_err(|e| Error::Format(format!("not valid JSON: {}", e)))?;

        let obj = value
            .as_object()
            .ok_or_else(|| Error::Format("expected a JSON object".to_string()))?;

        match obj.get("type").and_then(|v| v.as_str()) {
            Some(BACKUP_TYPE) => {}
            Some(other) => {
                return Err(Error::Format(format!("unrecognized backup type '{}'", other)))
            }
            None => return Err(Error::Format("missing backup type".to_string())),
        }

        let version = match obj.get("version") {
            None | Some(serde_json::Value::Null) => BACKUP_VERSION as u64,
            Some(v) => v
                .as_u64()
                .ok_or_else(|| Error::Format("version must be a positive integer".to_string()))?,
        };
        if version == 0 || version > BACKUP_VERSION as u64 {
            return Err(Error::Format(format!("unsupported backup version {}", version)));
        }

        let peers = match obj.get("peers") {
            Some(serde_json::Value::Array(items)) => items,
            _ => return Err(Error::Format("peers must be an array".to_string())),
        };

        let mut records = Vec::with_capacity(peers.len());
        let mut names = HashSet::new();
        let mut keys = HashSet::new();
        for (idx, item) in peers.iter().enumerate() {
            let record: PeerRecord = serde_json::from_value(item.clone())
                .map_err(|e| Error::Format(format!("peer #{}: {}", idx, e)))?;
            if record.name.trim().is_empty() || record.public_key.trim().is_empty() {
                return Err(Error::Format(format!("peer #{}: name and publicKey are required", idx)));
            }
            if !names.insert(record.name.clone()) {
                return Err(Error::Format(format!("duplicate peer name '{}'", record.name)));
            }
            if !keys.insert(record.public_key.clone()) {
                return Err(Error::Format(format!(
                    "peer '{}' reuses public key {}",
                    record.name, record.public_key
                )));
            }
            // disabled records may carry no IPs, but whatever they carry must parse
            if !record.disabled || !record.ips.is_empty() {
                validate_ips(&record.ips)
                    .map_err(|e| Error::Format(format!("peer '{}': {}", record.name, e)))?;
            }
            if ip_conflict(&records, &record.ips, None) {
                return Err(Error::Format(format!(
                    "peer '{}' shares an IP with an earlier peer",
                    record.name
                )));
            }
            records.push(record);
        }

        Ok(records)
    }
}
