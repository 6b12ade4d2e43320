//! Parsers for `wg show` output
//!
//! Two formats are understood:
//! - the human-readable `wg show <iface>` listing, one blank-line separated
//!   block per peer, parsed into [`RuntimePeerFact`]s
//! - the tab-separated `wg show <iface> dump`, parsed into [`DumpPeer`]s
//!
//! Both parsers are lenient: unknown lines are skipped so newer `wg`
//! releases do not break status reads.

use crate::types::{DumpPeer, RuntimePeerFact, NEVER};
use tracing::debug;

const NONE: &str = "(none)";

/// Parse `wg show <iface>` output into per-peer facts
///
/// Blocks without a `peer:` line (such as the leading `interface:` block)
/// are dropped.
pub fn parse_show(output: &str) -> Vec<RuntimePeerFact> {
    let mut peers = Vec::new();

    for block in output.split("\n\n") {
        let block = block.trim();
        if block.is_empty() {
            continue;
        }

        let mut public_key = None;
        let mut fact = RuntimePeerFact::new(String::new());

        for line in block.lines().map(str::trim) {
            if let Some(v) = line.strip_prefix("peer:") {
                public_key = Some(v.trim().to_string());
            } else if let Some(v) = line.strip_prefix("endpoint:") {
                fact.endpoint = Some(v.trim().to_string());
            } else if let Some(v) = line.strip_prefix("allowed ips:") {
                fact.allowed_ips = split_list(v);
            } else if let Some(v) = line.strip_prefix("latest handshake:") {
                let hs = v.trim().to_string();
                fact.online = !hs.contains(NEVER);
                fact.last_handshake = hs;
            } else if let Some(v) = line.strip_prefix("transfer:") {
                let (rx, tx) = parse_transfer(v);
                if let Some(rx) = rx {
                    fact.rx = rx;
                }
                if let Some(tx) = tx {
                    fact.tx = tx;
                }
            }
        }

        match public_key {
            Some(key) if !key.is_empty() => {
                fact.public_key = key;
                peers.push(fact);
            }
            _ => debug!("Skipping wg show block without peer identity"),
        }
    }

    peers
}

/// Parse `wg show <iface> dump` output
///
/// The first line describes the interface itself and is skipped. Peer lines
/// carry eight tab-separated fields; shorter lines are ignored.
pub fn parse_dump(output: &str) -> Vec<DumpPeer> {
    output
        .lines()
        .skip(1)
        .filter_map(|line| {
            let parts: Vec<&str> = line.split('\t').collect();
            if parts.len() < 8 || parts[0].trim().is_empty() {
                if !line.trim().is_empty() {
                    debug!("Skipping malformed dump line");
                }
                return None;
            }
            Some(DumpPeer {
                public_key: parts[0].trim().to_string(),
                preshared_key: optional(parts[1]),
                endpoint: optional(parts[2]),
                allowed_ips: split_list(parts[3]),
                latest_handshake: parts[4].trim().parse().unwrap_or(0),
                rx_bytes: parts[5].trim().parse().unwrap_or(0),
                tx_bytes: parts[6].trim().parse().unwrap_or(0),
                persistent_keepalive: parts[7].trim().parse().ok(),
            })
        })
        .collect()
}

fn split_list(value: &str) -> Vec<String> {
    let value = value.trim();
    if value.is_empty() || value == NONE {
        return Vec::new();
    }
    value
        .split(',')
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .collect()
}

fn optional(value: &str) -> Option<String> {
    let value = value.trim();
    if value.is_empty() || value == NONE || value == "off" {
        None
    } else {
        Some(value.to_string())
    }
}

/// `1.21 KiB received, 3.5 KiB sent` -> ("1.21 KiB", "3.5 KiB")
fn parse_transfer(value: &str) -> (Option<String>, Option<String>) {
    let mut parts = value.trim().splitn(2, ',');
    let rx = parts
        .next()
        .map(|v| v.trim().trim_end_matches("received").trim().to_string())
        .filter(|v| !v.is_empty());
    let tx = parts
        .next()
        .map(|v| v.trim().trim_end_matches("sent").trim().to_string())
        .filter(|v| !v.is_empty());
    (rx, tx)
}
