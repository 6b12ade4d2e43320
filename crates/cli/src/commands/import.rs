//! Local registry bootstrap
//!
//! Runs on the WireGuard host without a daemon: reads the live interface
//! through `wg` and writes the registry file directly.

use anyhow::{bail, Result};
use clap::Args;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use wgui_common::{
    registry_path, JsonFileStore, PeerRecord, PeerStore, ProcessExecutor, Reconciler,
    WgController, DEFAULT_INTERFACE,
};

use crate::commands::peer::RecordDisplay;
use crate::output::{print_list, print_success, OutputFormat};

#[derive(Args)]
pub struct ImportArgs {
    /// Daemon data directory holding peers.json
    #[arg(short = 'D', long, default_value = "/var/lib/wgui")]
    pub data_dir: PathBuf,

    /// WireGuard interface
    #[arg(short, long, default_value = DEFAULT_INTERFACE)]
    pub interface: String,

    /// Overwrite a registry that already has peers
    #[arg(long)]
    pub force: bool,
}

/// Replace the registry with the interface's peers, refusing to clobber
/// a populated registry unless `force` is set
pub async fn bootstrap(
    store: Arc<dyn PeerStore>,
    engine: &Reconciler,
    force: bool,
) -> Result<Vec<PeerRecord>> {
    let existing = store.load().await?;
    if !existing.is_empty() && !force {
        bail!(
            "registry already holds {} peers; pass --force to replace them",
            existing.len()
        );
    }
    Ok(engine.import_from_runtime().await?)
}

pub async fn execute(args: ImportArgs, format: OutputFormat) -> Result<()> {
    std::fs::create_dir_all(&args.data_dir)?;
    let path = registry_path(&args.data_dir);
    info!("Importing {} into {}", args.interface, path.display());

    let store: Arc<dyn PeerStore> = Arc::new(JsonFileStore::new(path.clone()));
    let exec = Arc::new(ProcessExecutor::new(Duration::from_secs(10)));
    let runtime = Arc::new(WgController::new(args.interface, exec));
    let engine = Reconciler::new(store.clone(), runtime);

    let peers = bootstrap(store, &engine, args.force).await?;
    print_success(&format!("Imported {} peers into {}", peers.len(), path.display()));
    let displays: Vec<RecordDisplay> = peers.into_iter().map(RecordDisplay::from).collect();
    print_list(&displays, format);
    Ok(())
}
