//! In-memory runtime controller for tests
//!
//! [`MockRuntime`] behaves like a WireGuard interface that only exists in
//! memory: installed peers are kept in a table, every call is recorded, and
//! individual operations can be scripted to fail.

use super::RuntimeController;
use crate::types::{DumpPeer, KeyPair, RuntimePeerFact};
use crate::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap, HashSet};

/// A recorded controller call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeCall {
    GenerateKeypair,
    PublicKey,
    Install { public_key: String, allowed_ips: Vec<String> },
    Remove { public_key: String },
    Save,
    Dump,
    Show,
}

/// Operation selector for scripted failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOp {
    GenerateKeypair,
    Install,
    Remove,
    Save,
    Dump,
    Show,
}

#[derive(Debug, Default)]
struct MockState {
    peers: BTreeMap<String, Vec<String>>,
    handshakes: HashMap<String, String>,
    calls: Vec<RuntimeCall>,
    failing: HashSet<MockOp>,
    next_key: u64,
    saves: usize,
}

/// Mock interface
#[derive(Debug, Default)]
pub struct MockRuntime {
    state: Mutex<MockState>,
}

/// Deterministic stand-in for `wg pubkey`
pub fn mock_public_key(private_key: &str) -> String {
    let digest = Sha256::digest(format!("pub:{}", private_key).as_bytes());
    hex::encode(&digest[..16])
}

impl MockRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with peers already present, as after a manual `wg set`
    pub fn with_peers(peers: &[(&str, &[&str])]) -> Self {
        let mock = Self::new();
        {
            let mut state = mock.state.lock();
            for (key, ips) in peers {
                state
                    .peers
                    .insert(key.to_string(), ips.iter().map(|s| s.to_string()).collect());
            }
        }
        mock
    }

    /// Make every subsequent call of `op` fail until cleared
    pub fn fail(&self, op: MockOp) {
        self.state.lock().failing.insert(op);
    }

    pub fn clear_failures(&self) {
        self.state.lock().failing.clear();
    }

    /// Record a handshake so `show` reports the peer online
    pub fn set_handshake(&self, public_key: &str, handshake: &str) {
        self.state
            .lock()
            .handshakes
            .insert(public_key.to_string(), handshake.to_string());
    }

    /// Installed peers: public key -> allowed IPs
    pub fn peers(&self) -> BTreeMap<String, Vec<String>> {
        self.state.lock().peers.clone()
    }

    pub fn contains(&self, public_key: &str) -> bool {
        self.state.lock().peers.contains_key(public_key)
    }

    pub fn calls(&self) -> Vec<RuntimeCall> {
        self.state.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    pub fn save_count(&self) -> usize {
        self.state.lock().saves
    }

    fn enter(&self, op: MockOp, call: RuntimeCall) -> Result<parking_lot::MutexGuard<'_, MockState>> {
        let mut state = self.state.lock();
        state.calls.push(call);
        if state.failing.contains(&op) {
            return Err(Error::tool(format!("mock {:?}", op), "scripted failure"));
        }
        Ok(state)
    }
}

#[async_trait]
impl RuntimeController for MockRuntime {
    async fn generate_keypair(&self) -> Result<KeyPair> {
        let mut state = self.enter(MockOp::GenerateKeypair, RuntimeCall::GenerateKeypair)?;
        state.next_key += 1;
        let private_key = hex::encode(Sha256::digest(format!("priv:{}", state.next_key).as_bytes()));
        Ok(KeyPair {
            public_key: mock_public_key(&private_key),
            private_key,
        })
    }

    async fn public_key(&self, private_key: &str) -> Result<String> {
        self.state.lock().calls.push(RuntimeCall::PublicKey);
        Ok(mock_public_key(private_key))
    }

    async fn install_peer(&self, public_key: &str, allowed_ips: &[String]) -> Result<()> {
        let mut state = self.enter(
            MockOp::Install,
            RuntimeCall::Install {
                public_key: public_key.to_string(),
                allowed_ips: allowed_ips.to_vec(),
            },
        )?;
        state.peers.insert(public_key.to_string(), allowed_ips.to_vec());
        Ok(())
    }

    async fn remove_peer(&self, public_key: &str) -> Result<()> {
        let mut state = self.enter(
            MockOp::Remove,
            RuntimeCall::Remove {
                public_key: public_key.to_string(),
            },
        )?;
        state.peers.remove(public_key);
        Ok(())
    }

    async fn save(&self) -> Result<()> {
        let mut state = self.enter(MockOp::Save, RuntimeCall::Save)?;
        state.saves += 1;
        Ok(())
    }

    async fn dump(&self) -> Result<Vec<DumpPeer>> {
        let state = self.enter(MockOp::Dump, RuntimeCall::Dump)?;
        Ok(state
            .peers
            .iter()
            .map(|(key, ips)| DumpPeer {
                public_key: key.clone(),
                preshared_key: None,
                endpoint: None,
                allowed_ips: ips.clone(),
                latest_handshake: 0,
                rx_bytes: 0,
                tx_bytes: 0,
                persistent_keepalive: None,
            })
            .collect())
    }

    async fn show(&self) -> Result<Vec<RuntimePeerFact>> {
        let state = self.enter(MockOp::Show, RuntimeCall::Show)?;
        Ok(state
            .peers
            .iter()
            .map(|(key, ips)| {
                let mut fact = RuntimePeerFact::new(key.clone());
                fact.allowed_ips = ips.clone();
                if let Some(hs) = state.handshakes.get(key) {
                    fact.online = !hs.contains(crate::types::NEVER);
                    fact.last_handshake = hs.clone();
                }
                fact
            })
            .collect())
    }
}
