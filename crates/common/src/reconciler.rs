//! Peer reconciliation engine
//!
//! Keeps the persisted registry and the live interface in agreement. Every
//! mutating operation holds the engine gate for its whole
//! load-validate-apply-save sequence.

use crate::backup::BackupPayload;
use crate::runtime::RuntimeController;
use crate::store::PeerStore;
use crate::types::*;
use crate::{Error, Result};
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Name prefix for peers synthesized from a runtime dump
pub const IMPORT_PREFIX: &str = "imported-";

/// Key characters used in an imported peer name before disambiguation
const IMPORT_KEY_CHARS: usize = 6;

/// Reconciles the peer registry with the runtime interface
pub struct Reconciler {
    store: Arc<dyn PeerStore>,
    runtime: Arc<dyn RuntimeController>,
    gate: Mutex<()>,
}

impl Reconciler {
    pub fn new(store: Arc<dyn PeerStore>, runtime: Arc<dyn RuntimeController>) -> Self {
        Self {
            store,
            runtime,
            gate: Mutex::new(()),
        }
    }

    pub fn runtime(&self) -> &Arc<dyn RuntimeController> {
        &self.runtime
    }

    /// Raw registry contents
    pub async fn records(&self) -> Result<Vec<PeerRecord>> {
        self.store.load().await
    }

    /// Look up one record by exact name
    pub async fn get(&self, name: &str) -> Result<PeerRecord> {
        self.store
            .load()
            .await?
            .into_iter()
            .find(|p| p.name == name)
            .ok_or_else(|| Error::peer_not_found(name))
    }

    /// Create a peer with a fresh keypair and install it
    pub async fn create(&self, name: &str, ips: Vec<String>) -> Result<PeerRecord> {
        validate_name(name)?;
        validate_ips(&ips)?;

        let _gate = self.gate.lock().await;
        let mut peers = self.store.load().await?;

        if peers.iter().any(|p| p.name == name) {
            return Err(Error::Conflict(format!("Peer '{}' already exists", name)));
        }
        if ip_conflict(&peers, &ips, None) {
            return Err(Error::Conflict("IP conflict".to_string()));
        }

        let keys = self.runtime.generate_keypair().await?;
        self.runtime.install_peer(&keys.public_key, &ips).await?;
        if let Err(e) = self.runtime.save().await {
            partial("create", name, "installed peer", "runtime save", &e);
            return Err(e);
        }

        let record = PeerRecord::new(name.to_string(), keys, ips);
        peers.push(record.clone());
        if let Err(e) = self.store.save(&peers).await {
            partial("create", name, "installed and saved runtime", "registry save", &e);
            return Err(e);
        }

        info!("Created peer {} ({})", record.name, record.public_key);
        Ok(record)
    }

    /// Apply a partial update
    ///
    /// An empty `name` in the patch leaves the name unchanged.
    pub async fn update(&self, name: &str, mut patch: PeerPatch) -> Result<PeerRecord> {
        patch.name = patch.name.filter(|n| !n.is_empty());

        let _gate = self.gate.lock().await;
        let mut peers = self.store.load().await?;
        let idx = position(&peers, name)?;

        if let Some(new_name) = &patch.name {
            validate_name(new_name)?;
            if new_name != name && peers.iter().any(|p| &p.name == new_name) {
                return Err(Error::Conflict(format!("Peer '{}' already exists", new_name)));
            }
        }
        if let Some(ips) = &patch.ips {
            validate_ips(ips)?;
            if ip_conflict(&peers, ips, Some(name)) {
                return Err(Error::Conflict("IP conflict".to_string()));
            }
        }
        let explicit_keys = match (patch.public_key, patch.private_key) {
            (Some(public_key), Some(private_key)) => Some(KeyPair {
                private_key,
                public_key,
            }),
            (None, None) => None,
            _ => {
                return Err(Error::Validation(
                    "publicKey and privateKey must be supplied together".to_string(),
                ))
            }
        };
        if let Some(keys) = &explicit_keys {
            if keys.public_key.trim().is_empty() {
                return Err(Error::Validation("publicKey cannot be blank".to_string()));
            }
            if let Some(holder) = peers
                .iter()
                .find(|p| p.name != name && p.public_key == keys.public_key)
            {
                return Err(Error::Conflict(format!(
                    "Public key already belongs to peer '{}'",
                    holder.name
                )));
            }
        }

        let old_key = peers[idx].public_key.clone();
        self.runtime.remove_peer(&old_key).await?;

        let peer = &mut peers[idx];
        if let Some(new_name) = patch.name {
            peer.name = new_name;
        }
        if let Some(ips) = patch.ips {
            peer.ips = ips;
        }
        if patch.rotate_keys {
            match self.runtime.generate_keypair().await {
                Ok(keys) => peer.set_keys(keys),
                Err(e) => {
                    partial("update", name, "removed peer", "key generation", &e);
                    return Err(e);
                }
            }
        }
        if let Some(keys) = explicit_keys {
            peer.set_keys(keys);
        }

        if !peer.disabled {
            if let Err(e) = self.runtime.install_peer(&peer.public_key, &peer.ips).await {
                partial("update", name, "removed peer", "reinstall", &e);
                return Err(e);
            }
        }
        if let Err(e) = self.runtime.save().await {
            partial("update", name, "reinstalled peer", "runtime save", &e);
            return Err(e);
        }

        let updated = peer.clone();
        if let Err(e) = self.store.save(&peers).await {
            partial("update", name, "updated runtime", "registry save", &e);
            return Err(e);
        }

        if updated.name != name {
            info!("Renamed peer {} to {}", name, updated.name);
        }
        if updated.public_key != old_key {
            info!("Peer {} now uses key {}", updated.name, updated.public_key);
        }
        debug!("Updated peer {}", updated.name);
        Ok(updated)
    }

    /// Take a peer out of the runtime, keeping its record
    pub async fn disable(&self, name: &str) -> Result<Outcome> {
        let _gate = self.gate.lock().await;
        let mut peers = self.store.load().await?;
        let idx = position(&peers, name)?;

        if peers[idx].disabled {
            debug!("Peer {} already disabled", name);
            return Ok(Outcome::Unchanged);
        }

        self.runtime.remove_peer(&peers[idx].public_key).await?;
        peers[idx].disabled = true;
        if let Err(e) = self.runtime.save().await {
            partial("disable", name, "removed peer", "runtime save", &e);
            return Err(e);
        }
        if let Err(e) = self.store.save(&peers).await {
            partial("disable", name, "removed peer", "registry save", &e);
            return Err(e);
        }

        info!("Disabled peer {}", name);
        Ok(Outcome::Changed)
    }

    /// Put a peer back into the runtime
    pub async fn enable(&self, name: &str) -> Result<Outcome> {
        let _gate = self.gate.lock().await;
        let mut peers = self.store.load().await?;
        let idx = position(&peers, name)?;

        let was_disabled = peers[idx].disabled;
        self.runtime
            .install_peer(&peers[idx].public_key, &peers[idx].ips)
            .await?;
        peers[idx].disabled = false;
        if let Err(e) = self.runtime.save().await {
            partial("enable", name, "installed peer", "runtime save", &e);
            return Err(e);
        }
        if let Err(e) = self.store.save(&peers).await {
            partial("enable", name, "installed peer", "registry save", &e);
            return Err(e);
        }

        if was_disabled {
            info!("Enabled peer {}", name);
            Ok(Outcome::Changed)
        } else {
            debug!("Peer {} already enabled, runtime entry refreshed", name);
            Ok(Outcome::Unchanged)
        }
    }

    /// Remove a peer from runtime and registry
    pub async fn delete(&self, name: &str) -> Result<()> {
        let _gate = self.gate.lock().await;
        let mut peers = self.store.load().await?;
        let idx = position(&peers, name)?;

        let peer = peers.remove(idx);
        if let Err(e) = self.runtime.remove_peer(&peer.public_key).await {
            warn!("Failed to remove peer {} from runtime: {}", name, e);
        }
        if let Err(e) = self.runtime.save().await {
            partial("delete", name, "removed peer", "runtime save", &e);
            return Err(e);
        }
        if let Err(e) = self.store.save(&peers).await {
            partial("delete", name, "removed peer", "registry save", &e);
            return Err(e);
        }

        info!("Deleted peer {}", name);
        Ok(())
    }

    /// Registry records joined with live status
    pub async fn list(&self) -> Result<Vec<MergedPeerView>> {
        let peers = self.store.load().await?;
        let facts = self.runtime.show().await?;
        let mut by_key: HashMap<String, RuntimePeerFact> = facts
            .into_iter()
            .map(|f| (f.public_key.clone(), f))
            .collect();

        Ok(peers
            .into_iter()
            .map(|peer| MergedPeerView {
                status: by_key.remove(&peer.public_key),
                peer,
            })
            .collect())
    }

    /// Replace the registry with records synthesized from dump peers
    pub async fn import(&self, dump: &[DumpPeer]) -> Result<Vec<PeerRecord>> {
        let _gate = self.gate.lock().await;

        let keys: Vec<&str> = dump.iter().map(|d| d.public_key.as_str()).collect();
        let names = imported_names(&keys);
        let now = Utc::now();
        let peers: Vec<PeerRecord> = dump
            .iter()
            .zip(names)
            .map(|(d, name)| PeerRecord {
                name,
                public_key: d.public_key.clone(),
                private_key: None,
                ips: d.allowed_ips.clone(),
                disabled: false,
                created_at: now,
            })
            .collect();

        self.store.save(&peers).await?;
        info!("Imported {} peers from runtime", peers.len());
        Ok(peers)
    }

    /// Read the runtime dump and import it
    pub async fn import_from_runtime(&self) -> Result<Vec<PeerRecord>> {
        let dump = self.runtime.dump().await?;
        self.import(&dump).await
    }

    /// Replace registry and runtime from a backup payload
    pub async fn restore(&self, data: &[u8]) -> Result<Vec<PeerRecord>> {
        let peers = BackupPayload::parse(data)?;

        let _gate = self.gate.lock().await;
        self.store.save(&peers).await?;

        let steps = async {
            for existing in self.runtime.dump().await? {
                self.runtime.remove_peer(&existing.public_key).await?;
            }
            for peer in peers.iter().filter(|p| !p.disabled) {
                self.runtime.install_peer(&peer.public_key, &peer.ips).await?;
            }
            self.runtime.save().await
        };
        if let Err(e) = steps.await {
            partial("restore", "registry", "replaced registry", "runtime sync", &e);
            return Err(e);
        }

        info!(
            "Restored {} peers ({} enabled)",
            peers.len(),
            peers.iter().filter(|p| !p.disabled).count()
        );
        Ok(peers)
    }

    /// Snapshot the registry as a backup payload
    pub async fn export(&self) -> Result<BackupPayload> {
        Ok(BackupPayload::new(self.store.load().await?))
    }

    /// One entry per runtime peer, named from the registry where known
    pub async fn runtime_status(&self) -> Result<Vec<RuntimePeerView>> {
        let facts = self.runtime.show().await?;
        let peers = self.store.load().await?;
        let by_key: HashMap<&str, &PeerRecord> =
            peers.iter().map(|p| (p.public_key.as_str(), p)).collect();

        Ok(facts
            .into_iter()
            .map(|fact| {
                let known = by_key.get(fact.public_key.as_str());
                RuntimePeerView {
                    name: known.map_or_else(|| "unknown".to_string(), |p| p.name.clone()),
                    ips: known.map_or_else(|| fact.allowed_ips.clone(), |p| p.ips.clone()),
                    disabled: known.map_or(false, |p| p.disabled),
                    public_key: fact.public_key,
                    endpoint: fact.endpoint,
                    allowed_ips: fact.allowed_ips,
                    last_handshake: fact.last_handshake,
                    rx: fact.rx,
                    tx: fact.tx,
                    online: fact.online,
                }
            })
            .collect())
    }

    /// Compare desired and live state without changing either
    pub async fn detect_drift(&self) -> Result<Vec<DriftReport>> {
        let peers = self.store.load().await?;
        let dump = self.runtime.dump().await?;
        let live: HashMap<&str, &DumpPeer> =
            dump.iter().map(|d| (d.public_key.as_str(), d)).collect();

        let mut reports = Vec::new();
        for peer in &peers {
            let entry = live.get(peer.public_key.as_str());
            let report = |kind, message: String| DriftReport {
                name: Some(peer.name.clone()),
                public_key: peer.public_key.clone(),
                kind,
                message,
            };
            match (peer.disabled, entry) {
                (false, None) => reports.push(report(
                    DriftKind::MissingFromRuntime,
                    format!("Peer '{}' is enabled but not present in the runtime", peer.name),
                )),
                (true, Some(_)) => reports.push(report(
                    DriftKind::UnexpectedInRuntime,
                    format!("Peer '{}' is disabled but present in the runtime", peer.name),
                )),
                (false, Some(d)) if !same_ips(&peer.ips, &d.allowed_ips) => {
                    reports.push(report(
                        DriftKind::AllowedIpsMismatch,
                        format!(
                            "Peer '{}' expects [{}] but the runtime allows [{}]",
                            peer.name,
                            peer.ips.join(", "),
                            d.allowed_ips.join(", ")
                        ),
                    ))
                }
                _ => {}
            }
        }

        let known: HashSet<&str> = peers.iter().map(|p| p.public_key.as_str()).collect();
        for d in dump.iter().filter(|d| !known.contains(d.public_key.as_str())) {
            reports.push(DriftReport {
                name: None,
                public_key: d.public_key.clone(),
                kind: DriftKind::Unmanaged,
                message: format!("Runtime peer {} is not in the registry", d.public_key),
            });
        }

        if !reports.is_empty() {
            debug!("Detected {} drift entries", reports.len());
        }
        Ok(reports)
    }
}

fn position(peers: &[PeerRecord], name: &str) -> Result<usize> {
    peers
        .iter()
        .position(|p| p.name == name)
        .ok_or_else(|| Error::peer_not_found(name))
}

fn partial(op: &str, name: &str, applied: &str, failed: &str, err: &Error) {
    error!(
        "partial {} of '{}': {} succeeded, {} failed: {}",
        op, name, applied, failed, err
    );
}

fn same_ips(a: &[String], b: &[String]) -> bool {
    let a: HashSet<&String> = a.iter().collect();
    let b: HashSet<&String> = b.iter().collect();
    a == b
}

/// `imported-<key prefix>`, lengthening the prefix until no other key shares it
fn imported_names(keys: &[&str]) -> Vec<String> {
    let mut used = HashSet::new();
    keys.iter()
        .enumerate()
        .map(|(i, key)| {
            let total = key.chars().count();
            let prefix = |n: usize| key.chars().take(n).collect::<String>();
            let mut len = IMPORT_KEY_CHARS.min(total);
            while len < total
                && keys
                    .iter()
                    .enumerate()
                    .any(|(j, other)| j != i && other.starts_with(prefix(len).as_str()))
            {
                len += 1;
            }

            // base64 `/` and `+` are not usable in names or file names
            let stem: String = prefix(len)
                .chars()
                .map(|c| match c {
                    '/' => '_',
                    '+' => '-',
                    c => c,
                })
                .collect();
            let base = format!("{}{}", IMPORT_PREFIX, stem);
            let mut name = base.clone();
            let mut n = 2;
            while !used.insert(name.clone()) {
                name = format!("{}-{}", base, n);
                n += 1;
            }
            name
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::mock::{MockOp, MockRuntime, RuntimeCall};
    use crate::store::MemoryStore;
    use crate::ErrorKind;

    fn engine() -> (Reconciler, Arc<MemoryStore>, Arc<MockRuntime>) {
        let store = Arc::new(MemoryStore::new());
        let runtime = Arc::new(MockRuntime::new());
        (Reconciler::new(store.clone(), runtime.clone()), store, runtime)
    }

    fn ips(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn dump_peer(key: &str, allowed: &[&str]) -> DumpPeer {
        DumpPeer {
            public_key: key.to_string(),
            preshared_key: None,
            endpoint: None,
            allowed_ips: ips(allowed),
            latest_handshake: 0,
            rx_bytes: 0,
            tx_bytes: 0,
            persistent_keepalive: None,
        }
    }

    #[tokio::test]
    async fn test_create_and_ip_conflict() {
        let (engine, store, runtime) = engine();

        let alice = engine.create("alice", ips(&["10.0.0.2/32"])).await.unwrap();
        assert!(!alice.disabled);
        assert!(alice.private_key.is_some());
        assert_eq!(runtime.peers().get(&alice.public_key), Some(&ips(&["10.0.0.2/32"])));
        assert_eq!(runtime.save_count(), 1);

        let err = engine.create("bob", ips(&["10.0.0.2/32"])).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(store.snapshot().len(), 1);
        assert_eq!(runtime.peers().len(), 1);

        engine.create("bob", ips(&["10.0.0.3/32"])).await.unwrap();
        assert_eq!(store.snapshot().len(), 2);
    }

    #[tokio::test]
    async fn test_create_duplicate_name() {
        let (engine, _, _) = engine();
        engine.create("alice", ips(&["10.0.0.2/32"])).await.unwrap();
        let err = engine.create("alice", ips(&["10.0.0.9/32"])).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn test_create_validation_runs_before_runtime() {
        let (engine, store, runtime) = engine();

        for (name, list) in [("", ips(&["10.0.0.2/32"])), ("alice", vec![]), ("alice", ips(&["nope"]))] {
            let err = engine.create(name, list).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Validation);
        }
        assert!(runtime.calls().is_empty());
        assert_eq!(store.save_count(), 0);
    }

    #[tokio::test]
    async fn test_create_install_failure_adds_nothing() {
        let (engine, store, runtime) = engine();
        runtime.fail(MockOp::Install);

        let err = engine.create("alice", ips(&["10.0.0.2/32"])).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ExternalTool);
        assert!(store.snapshot().is_empty());
        assert_eq!(store.save_count(), 0);
    }

    #[tokio::test]
    async fn test_conflicting_update_leaves_ips_unchanged() {
        let (engine, store, runtime) = engine();
        engine.create("alice", ips(&["10.0.0.2/32"])).await.unwrap();
        engine.create("bob", ips(&["10.0.0.3/32"])).await.unwrap();
        runtime.clear_calls();

        let patch = PeerPatch {
            ips: Some(ips(&["10.0.0.2/32"])),
            ..Default::default()
        };
        let err = engine.update("bob", patch).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);

        let bob = store.snapshot().into_iter().find(|p| p.name == "bob").unwrap();
        assert_eq!(bob.ips, ips(&["10.0.0.3/32"]));
        assert!(runtime.calls().is_empty());
    }

    #[tokio::test]
    async fn test_update_own_ips_is_not_a_conflict() {
        let (engine, _, runtime) = engine();
        engine.create("alice", ips(&["10.0.0.2/32"])).await.unwrap();

        let patch = PeerPatch {
            ips: Some(ips(&["10.0.0.2/32", "10.0.1.0/24"])),
            ..Default::default()
        };
        let alice = engine.update("alice", patch).await.unwrap();
        assert_eq!(runtime.peers().get(&alice.public_key), Some(&alice.ips));
    }

    #[tokio::test]
    async fn test_rename_removes_then_reinstalls() {
        let (engine, store, runtime) = engine();
        let alice = engine.create("alice", ips(&["10.0.0.2/32"])).await.unwrap();
        runtime.clear_calls();

        let patch = PeerPatch {
            name: Some("alice-laptop".to_string()),
            ..Default::default()
        };
        let renamed = engine.update("alice", patch).await.unwrap();
        assert_eq!(renamed.name, "alice-laptop");
        assert_eq!(renamed.public_key, alice.public_key);

        assert_eq!(
            runtime.calls(),
            vec![
                RuntimeCall::Remove {
                    public_key: alice.public_key.clone()
                },
                RuntimeCall::Install {
                    public_key: alice.public_key.clone(),
                    allowed_ips: ips(&["10.0.0.2/32"]),
                },
                RuntimeCall::Save,
            ]
        );
        assert_eq!(store.snapshot()[0].name, "alice-laptop");
    }

    #[tokio::test]
    async fn test_rename_to_taken_name() {
        let (engine, _, _) = engine();
        engine.create("alice", ips(&["10.0.0.2/32"])).await.unwrap();
        engine.create("bob", ips(&["10.0.0.3/32"])).await.unwrap();

        let patch = PeerPatch {
            name: Some("alice".to_string()),
            ..Default::default()
        };
        let err = engine.update("bob", patch).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn test_update_rotate_keys() {
        let (engine, _, runtime) = engine();
        let alice = engine.create("alice", ips(&["10.0.0.2/32"])).await.unwrap();

        let patch = PeerPatch {
            rotate_keys: true,
            ..Default::default()
        };
        let rotated = engine.update("alice", patch).await.unwrap();
        assert_ne!(rotated.public_key, alice.public_key);
        assert_ne!(rotated.private_key, alice.private_key);
        assert!(!runtime.contains(&alice.public_key));
        assert!(runtime.contains(&rotated.public_key));
    }

    #[tokio::test]
    async fn test_update_explicit_keys() {
        let (engine, _, runtime) = engine();
        engine.create("alice", ips(&["10.0.0.2/32"])).await.unwrap();

        let half = PeerPatch {
            public_key: Some("PUB=".to_string()),
            ..Default::default()
        };
        let err = engine.update("alice", half).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let both = PeerPatch {
            public_key: Some("PUB=".to_string()),
            private_key: Some("PRIV=".to_string()),
            ..Default::default()
        };
        let updated = engine.update("alice", both).await.unwrap();
        assert_eq!(updated.public_key, "PUB=");
        assert_eq!(updated.private_key.as_deref(), Some("PRIV="));
        assert!(runtime.contains("PUB="));
    }

    #[tokio::test]
    async fn test_update_missing_peer() {
        let (engine, _, _) = engine();
        let err = engine.update("ghost", PeerPatch::default()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_update_disabled_peer_stays_out_of_runtime() {
        let (engine, _, runtime) = engine();
        let alice = engine.create("alice", ips(&["10.0.0.2/32"])).await.unwrap();
        engine.disable("alice").await.unwrap();

        let patch = PeerPatch {
            ips: Some(ips(&["10.0.0.9/32"])),
            ..Default::default()
        };
        let updated = engine.update("alice", patch).await.unwrap();
        assert!(updated.disabled);
        assert!(!runtime.contains(&alice.public_key));
    }

    #[tokio::test]
    async fn test_disable_then_enable() {
        let (engine, store, runtime) = engine();
        let alice = engine.create("alice", ips(&["10.0.0.2/32"])).await.unwrap();

        assert_eq!(engine.disable("alice").await.unwrap(), Outcome::Changed);
        assert!(!runtime.contains(&alice.public_key));
        assert!(store.snapshot()[0].disabled);

        runtime.clear_calls();
        let saves = store.save_count();
        assert_eq!(engine.disable("alice").await.unwrap(), Outcome::Unchanged);
        assert!(runtime.calls().is_empty());
        assert_eq!(store.save_count(), saves);

        assert_eq!(engine.enable("alice").await.unwrap(), Outcome::Changed);
        assert_eq!(runtime.peers().get(&alice.public_key), Some(&alice.ips));
        assert!(!store.snapshot()[0].disabled);

        runtime.clear_calls();
        assert_eq!(engine.enable("alice").await.unwrap(), Outcome::Unchanged);
        assert!(runtime.calls().iter().any(|c| matches!(c, RuntimeCall::Install { .. })));
    }

    #[tokio::test]
    async fn test_disable_missing_peer() {
        let (engine, _, _) = engine();
        assert_eq!(engine.disable("ghost").await.unwrap_err().kind(), ErrorKind::NotFound);
        assert_eq!(engine.enable("ghost").await.unwrap_err().kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_delete_twice() {
        let (engine, _, runtime) = engine();
        let alice = engine.create("alice", ips(&["10.0.0.2/32"])).await.unwrap();

        engine.delete("alice").await.unwrap();
        assert!(!runtime.contains(&alice.public_key));
        assert!(engine.list().await.unwrap().is_empty());

        let err = engine.delete("alice").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_delete_tolerates_remove_failure() {
        let (engine, store, runtime) = engine();
        engine.create("alice", ips(&["10.0.0.2/32"])).await.unwrap();
        runtime.fail(MockOp::Remove);

        engine.delete("alice").await.unwrap();
        assert!(store.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_list_merges_runtime_status() {
        let (engine, store, runtime) = engine();
        let alice = engine.create("alice", ips(&["10.0.0.2/32"])).await.unwrap();
        engine.create("bob", ips(&["10.0.0.3/32"])).await.unwrap();
        engine.disable("bob").await.unwrap();
        runtime.set_handshake(&alice.public_key, "42 seconds ago");

        let saves = store.save_count();
        let views = engine.list().await.unwrap();
        assert_eq!(views.len(), 2);

        let alice_view = views.iter().find(|v| v.peer.name == "alice").unwrap();
        let status = alice_view.status.as_ref().unwrap();
        assert!(status.online);
        assert_eq!(status.last_handshake, "42 seconds ago");

        let bob_view = views.iter().find(|v| v.peer.name == "bob").unwrap();
        assert!(bob_view.status.is_none());
        assert_eq!(store.save_count(), saves);
    }

    #[tokio::test]
    async fn test_list_runtime_failure_is_error() {
        let (engine, _, runtime) = engine();
        engine.create("alice", ips(&["10.0.0.2/32"])).await.unwrap();
        runtime.fail(MockOp::Show);
        assert_eq!(engine.list().await.unwrap_err().kind(), ErrorKind::ExternalTool);
    }

    #[tokio::test]
    async fn test_import_names_and_replaces_registry() {
        let (engine, store, runtime) = engine();
        engine.create("alice", ips(&["10.0.0.2/32"])).await.unwrap();
        runtime.clear_calls();

        let dump = vec![
            dump_peer("abcdef111=", &["10.0.0.5/32"]),
            dump_peer("abcdef222=", &["10.0.0.6/32"]),
            dump_peer("zyxwvu999=", &["10.0.0.7/32", "fd00::7/128"]),
        ];
        let peers = engine.import(&dump).await.unwrap();

        let names: Vec<&str> = peers.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["imported-abcdef1", "imported-abcdef2", "imported-zyxwvu"]);
        assert!(peers.iter().all(|p| p.private_key.is_none() && !p.disabled));
        assert_eq!(peers[2].ips, ips(&["10.0.0.7/32", "fd00::7/128"]));

        assert_eq!(store.snapshot(), peers);
        assert!(runtime.calls().is_empty());
    }

    #[tokio::test]
    async fn test_import_from_runtime() {
        let store = Arc::new(MemoryStore::new());
        let runtime = Arc::new(MockRuntime::with_peers(&[("Kq1Xy2Z=", &["10.0.0.2/32"])]));
        let engine = Reconciler::new(store.clone(), runtime);

        let peers = engine.import_from_runtime().await.unwrap();
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].name, "imported-Kq1Xy2");
        assert_eq!(store.snapshot().len(), 1);
    }

    #[tokio::test]
    async fn test_update_with_empty_name_keeps_name() {
        let (engine, store, _) = engine();
        engine.create("alice", ips(&["10.0.0.2/32"])).await.unwrap();

        let patch = PeerPatch {
            name: Some(String::new()),
            ips: Some(ips(&["10.0.0.9/32"])),
            ..Default::default()
        };
        let updated = engine.update("alice", patch).await.unwrap();
        assert_eq!(updated.name, "alice");
        assert_eq!(store.snapshot()[0].ips, ips(&["10.0.0.9/32"]));

        let blank = PeerPatch {
            name: Some("   ".to_string()),
            ..Default::default()
        };
        let err = engine.update("alice", blank).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_creates_on_one_ip() {
        let (engine, store, runtime) = engine();
        let engine = Arc::new(engine);

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let engine = engine.clone();
                tokio::spawn(async move {
                    engine
                        .create(&format!("peer-{}", i), ips(&["10.0.0.2/32"]))
                        .await
                })
            })
            .collect();

        let mut created = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => created += 1,
                Err(e) => assert_eq!(e.kind(), ErrorKind::Conflict),
            }
        }
        assert_eq!(created, 1);
        assert_eq!(store.snapshot().len(), 1);
        assert_eq!(runtime.peers().len(), 1);
    }

    #[tokio::test]
    async fn test_update_rejects_key_held_by_another_peer() {
        let (engine, store, runtime) = engine();
        let alice = engine.create("alice", ips(&["10.0.0.2/32"])).await.unwrap();
        let bob = engine.create("bob", ips(&["10.0.0.3/32"])).await.unwrap();
        runtime.clear_calls();

        let patch = PeerPatch {
            public_key: Some(alice.public_key.clone()),
            private_key: Some("stolen".to_string()),
            ..Default::default()
        };
        let err = engine.update("bob", patch).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert!(runtime.calls().is_empty());
        assert_eq!(store.snapshot()[1].public_key, bob.public_key);
        assert_eq!(runtime.peers().get(&alice.public_key), Some(&ips(&["10.0.0.2/32"])));

        engine.delete("bob").await.unwrap();
        assert!(runtime.contains(&alice.public_key));
    }

    #[tokio::test]
    async fn test_update_may_resubmit_own_key() {
        let (engine, _, runtime) = engine();
        let alice = engine.create("alice", ips(&["10.0.0.2/32"])).await.unwrap();

        let patch = PeerPatch {
            public_key: Some(alice.public_key.clone()),
            private_key: alice.private_key.clone(),
            ..Default::default()
        };
        let updated = engine.update("alice", patch).await.unwrap();
        assert_eq!(updated.public_key, alice.public_key);
        assert!(runtime.contains(&alice.public_key));
    }

    #[test]
    fn test_imported_names_short_and_identical_keys() {
        assert_eq!(imported_names(&["abc"]), vec!["imported-abc"]);
        assert_eq!(imported_names(&["abc", "abc"]), vec!["imported-abc", "imported-abc-2"]);
    }

    #[test]
    fn test_imported_names_are_valid_peer_names() {
        let names = imported_names(&["ab/cd+ef==", "ab/cd+xy=="]);
        assert_eq!(names, vec!["imported-ab_cd-e", "imported-ab_cd-x"]);
        for name in &names {
            assert!(validate_name(name).is_ok(), "{}", name);
        }
    }

    #[tokio::test]
    async fn test_malformed_restore_changes_nothing() {
        let (engine, store, runtime) = engine();
        engine.create("alice", ips(&["10.0.0.2/32"])).await.unwrap();
        let before = store.snapshot();
        runtime.clear_calls();

        let cases: [&[u8]; 5] = [
            b"garbage",
            br#"{"type":"other","peers":[]}"#,
            br#"{"type":"wgui-peer-backup"}"#,
            br#"{"type":"wgui-peer-backup","peers":[
                {"name":"alice","publicKey":"A=","ips":["10.0.0.2/32"]},
                {"name":"bob","publicKey":"B=","ips":["10.0.0.2/32"]}]}"#,
            br#"{"type":"wgui-peer-backup","peers":[
                {"name":"carol","publicKey":"C=","ips":["not-an-ip"]}]}"#,
        ];
        for data in cases {
            let err = engine.restore(data).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Format);
        }
        assert_eq!(store.snapshot(), before);
        assert!(runtime.calls().is_empty());
    }

    #[tokio::test]
    async fn test_export_restore_round_trip() {
        let (source, _, _) = engine();
        source.create("alice", ips(&["10.0.0.2/32"])).await.unwrap();
        source.create("bob", ips(&["10.0.0.3/32"])).await.unwrap();
        source.create("carol", ips(&["10.0.0.4/32"])).await.unwrap();
        source.disable("bob").await.unwrap();

        let payload = source.export().await.unwrap();
        let data = serde_json::to_vec(&payload).unwrap();

        let store = Arc::new(MemoryStore::new());
        let runtime = Arc::new(MockRuntime::with_peers(&[("stray=", &["10.9.9.9/32"])]));
        let target = Reconciler::new(store.clone(), runtime.clone());
        let restored = target.restore(&data).await.unwrap();
        assert_eq!(restored.len(), 3);

        let originals = source.records().await.unwrap();
        let copies = store.snapshot();
        for (a, b) in originals.iter().zip(copies.iter()) {
            assert_eq!(a.name, b.name);
            assert_eq!(a.public_key, b.public_key);
            assert_eq!(a.private_key, b.private_key);
            assert_eq!(a.ips, b.ips);
            assert_eq!(a.disabled, b.disabled);
        }

        let live = runtime.peers();
        assert_eq!(live.len(), 2);
        assert!(!live.contains_key("stray="));
        for peer in copies.iter() {
            assert_eq!(live.contains_key(&peer.public_key), !peer.disabled);
        }
        assert_eq!(runtime.save_count(), 1);
    }

    #[tokio::test]
    async fn test_runtime_status_includes_unknown_peers() {
        let store = Arc::new(MemoryStore::new());
        let runtime = Arc::new(MockRuntime::with_peers(&[("stray=", &["10.9.9.9/32"])]));
        let engine = Reconciler::new(store, runtime);
        engine.create("alice", ips(&["10.0.0.2/32"])).await.unwrap();

        let views = engine.runtime_status().await.unwrap();
        assert_eq!(views.len(), 2);

        let stray = views.iter().find(|v| v.public_key == "stray=").unwrap();
        assert_eq!(stray.name, "unknown");
        assert_eq!(stray.ips, ips(&["10.9.9.9/32"]));
        assert!(!stray.disabled);
        assert_eq!(stray.last_handshake, NEVER);

        assert!(views.iter().any(|v| v.name == "alice"));
    }

    #[tokio::test]
    async fn test_detect_drift() {
        let store = Arc::new(MemoryStore::new());
        let runtime = Arc::new(MockRuntime::with_peers(&[("stray=", &["10.9.9.9/32"])]));
        let engine = Reconciler::new(store.clone(), runtime.clone());

        let alice = engine.create("alice", ips(&["10.0.0.2/32"])).await.unwrap();
        let bob = engine.create("bob", ips(&["10.0.0.3/32"])).await.unwrap();
        let carol = engine.create("carol", ips(&["10.0.0.4/32"])).await.unwrap();
        engine.create("dave", ips(&["10.0.0.5/32"])).await.unwrap();
        engine.disable("carol").await.unwrap();

        runtime.remove_peer(&alice.public_key).await.unwrap();
        runtime
            .install_peer(&bob.public_key, &ips(&["10.0.0.99/32"]))
            .await
            .unwrap();
        runtime.install_peer(&carol.public_key, &carol.ips).await.unwrap();

        let saves = store.save_count();
        let reports = engine.detect_drift().await.unwrap();
        let kind_of = |key: &str| reports.iter().find(|r| r.public_key == key).map(|r| r.kind);

        assert_eq!(reports.len(), 4);
        assert_eq!(kind_of(&alice.public_key), Some(DriftKind::MissingFromRuntime));
        assert_eq!(kind_of(&bob.public_key), Some(DriftKind::AllowedIpsMismatch));
        assert_eq!(kind_of(&carol.public_key), Some(DriftKind::UnexpectedInRuntime));
        assert_eq!(kind_of("stray="), Some(DriftKind::Unmanaged));
        assert_eq!(store.save_count(), saves);
    }
}
