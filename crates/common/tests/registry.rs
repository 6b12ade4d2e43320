//! Registry file shared across engine restarts

use std::sync::Arc;
use wgui_common::runtime::mock::MockRuntime;
use wgui_common::{registry_path, BackupPayload, JsonFileStore, Outcome, PeerPatch, Reconciler};

fn engine(dir: &std::path::Path, runtime: Arc<MockRuntime>) -> Reconciler {
    Reconciler::new(Arc::new(JsonFileStore::new(registry_path(dir))), runtime)
}

#[tokio::test]
async fn test_registry_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let runtime = Arc::new(MockRuntime::new());

    let first = engine(dir.path(), runtime.clone());
    let alice = first.create("alice", vec!["10.0.0.2/32".to_string()]).await.unwrap();
    first.create("bob", vec!["10.0.0.3/32".to_string()]).await.unwrap();
    assert_eq!(first.disable("bob").await.unwrap(), Outcome::Changed);
    drop(first);

    let second = engine(dir.path(), runtime.clone());
    let peers = second.list().await.unwrap();
    assert_eq!(peers.len(), 2);
    assert_eq!(peers[0].peer.public_key, alice.public_key);
    assert!(peers[0].status.is_some());
    assert!(peers[1].peer.disabled);
    assert!(peers[1].status.is_none());
    assert!(second.detect_drift().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_backup_moves_between_hosts() {
    let source_dir = tempfile::tempdir().unwrap();
    let source = engine(source_dir.path(), Arc::new(MockRuntime::new()));
    source.create("alice", vec!["10.0.0.2/32".to_string()]).await.unwrap();
    source
        .update(
            "alice",
            PeerPatch {
                name: Some("alice-laptop".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let payload = source.export().await.unwrap();
    let bytes = serde_json::to_vec(&payload).unwrap();

    let target_dir = tempfile::tempdir().unwrap();
    let target_runtime = Arc::new(MockRuntime::with_peers(&[("stale-key", &["10.9.9.9/32"])]));
    let target = engine(target_dir.path(), target_runtime.clone());
    let restored = target.restore(&bytes).await.unwrap();

    assert_eq!(restored.len(), 1);
    assert_eq!(restored[0].name, "alice-laptop");
    assert!(!target_runtime.contains("stale-key"));
    assert!(target_runtime.contains(&restored[0].public_key));

    let on_disk = std::fs::read(registry_path(target_dir.path())).unwrap();
    let reparsed: Vec<wgui_common::PeerRecord> = serde_json::from_slice(&on_disk).unwrap();
    assert_eq!(reparsed, restored);
    assert!(BackupPayload::parse(&bytes).is_ok());
}
