//! Dev command implementation

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use ws_cluster::Cluster;
use ws_core::config::CliConfig;
use ws_core::ssh_config::ConfigEntryStore;
use ws_sync::MutagenEngine;

use crate::orchestrator::{DevOptions, DevSessionOrchestrator};
use crate::output::print_success;

/// Run a development session against the workspace in `options`
pub async fn dev_command<C: Cluster + ?Sized>(
    cluster: Arc<C>,
    config: &CliConfig,
    options: DevOptions,
    cancel: &CancellationToken,
) -> Result<()> {
    let engine = Arc::new(MutagenEngine::new(
        config.sync.engine_path.clone(),
        config.sync.poll_interval,
    ));
    let orchestrator = DevSessionOrchestrator::new(
        cluster,
        engine,
        ConfigEntryStore::new(config.paths.ssh_config.clone()),
        config.paths.key_dir.clone(),
    );

    orchestrator
        .run(&options, cancel)
        .await
        .with_context(|| format!("Development session for {} failed", options.name))?;

    print_success("Session closed");
    Ok(())
}
