//! Live development session
//!
//! ```text
//! validate ─► resolve instance ─► key + ssh entry ─► tunnel ─► sync? ─► shell | block
//!                                                      │         │
//!                  teardown on every path:  tunnel.close ◄── sync.stop
//! ```
//!
//! The tunnel opens before synchronization starts because the engine reaches
//! the workspace through the SSH alias, which points at the tunnel's local
//! port.

use std::collections::BTreeMap;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use ws_cluster::readiness::{wait_for_pod_ready, POD_READY_TIMEOUT};
use ws_cluster::{Cluster, ExecRequest, PortPair, Tunnel, TunnelManager};
use ws_core::config::CliConfig;
use ws_core::keys::{write_private_key, PRIVATE_KEY_SECRET_KEY};
use ws_core::ssh_config::{ConfigEntryStore, TrustEntry};
use ws_core::types::{host_alias, WORKSPACE_CONTAINER, WORKSPACE_SSH_PORT, WORKSPACE_USER};
use ws_core::{ConfigError, WorkspaceHandle, WsError};
use ws_sync::{FolderSpec, LineSink, SyncEngine, SyncMode, SyncOptions, SyncSessionController, SyncTarget};

use crate::output::{print_info, print_raw_line, print_warning};
use crate::terminal::run_interactive;

/// Settings for one `dev` invocation
#[derive(Debug, Clone)]
pub struct DevOptions {
    pub name: String,
    pub namespace: String,
    /// Local end of the SSH tunnel
    pub ssh_port: u16,
    /// Block until interrupted instead of attaching a shell
    pub disable_terminal: bool,
    /// `SRC:DST` folder pair, synchronization is skipped when absent
    pub sync_folder: Option<String>,
    pub sync_ignores: Vec<String>,
    pub sync_labels: BTreeMap<String, String>,
    pub sync_watch: bool,
    pub sync_mode: SyncMode,
    pub shell: Vec<String>,
    pub container: String,
    pub pod_ready_timeout: Duration,
}

impl DevOptions {
    /// Options for `name` in `namespace` with every other field defaulted
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            ssh_port: WORKSPACE_SSH_PORT,
            disable_terminal: false,
            sync_folder: None,
            sync_ignores: Vec::new(),
            sync_labels: BTreeMap::new(),
            sync_watch: false,
            sync_mode: SyncMode::default(),
            shell: vec!["bash".to_string(), "--login".to_string()],
            container: WORKSPACE_CONTAINER.to_string(),
            pod_ready_timeout: POD_READY_TIMEOUT,
        }
    }

    /// Fill the defaults that come from the configuration file
    pub fn with_config(mut self, config: &CliConfig) -> Self {
        self.ssh_port = config.dev.ssh_port;
        self.shell = config.dev.shell.clone();
        self.container = config.dev.container.clone();
        self.pod_ready_timeout = config.dev.pod_ready_timeout;
        self.sync_ignores = config.sync.default_ignores.clone();
        self.sync_mode = SyncMode::from_name_or_default(&config.sync.default_mode);
        self
    }

    /// Checks that need no cluster access.
    ///
    /// Returns the parsed sync folder, if one was requested.
    pub fn validate(&self) -> Result<Option<FolderSpec>, WsError> {
        if self.ssh_port == 0 {
            return Err(WsError::Validation(
                "ssh port must be a fixed non-zero port".to_string(),
            ));
        }
        self.sync_folder
            .as_deref()
            .map(FolderSpec::parse)
            .transpose()
    }

    fn sync_options(&self) -> SyncOptions {
        SyncOptions {
            ignores: self.sync_ignores.clone(),
            labels: self.sync_labels.clone(),
            watch: self.sync_watch,
            mode: self.sync_mode,
        }
    }
}

/// Coordinates the tunnel, file synchronization and terminal of one session
pub struct DevSessionOrchestrator<C: Cluster + ?Sized, E: SyncEngine + ?Sized> {
    cluster: Arc<C>,
    engine: Arc<E>,
    tunnels: TunnelManager<C>,
    ssh_config: ConfigEntryStore,
    key_dir: PathBuf,
}

impl<C: Cluster + ?Sized, E: SyncEngine + ?Sized> DevSessionOrchestrator<C, E> {
    pub fn new(
        cluster: Arc<C>,
        engine: Arc<E>,
        ssh_config: ConfigEntryStore,
        key_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            tunnels: TunnelManager::new(cluster.clone()),
            cluster,
            engine,
            ssh_config,
            key_dir: key_dir.into(),
        }
    }

    /// Run one session to completion.
    ///
    /// An interrupt via `cancel` while the session is being established
    /// yields [`WsError::Interrupted`]; once established it ends the session
    /// normally. Synchronization and the tunnel are torn down on every
    /// path, in that order.
    pub async fn run(&self, options: &DevOptions, cancel: &CancellationToken) -> Result<(), WsError> {
        let folder = options.validate()?;
        let session = cancel.child_token();

        let handle = self.resolve(options, &session).await?;
        self.provision_trust(&handle, options.ssh_port).await?;
        print_info(&format!("Connect via: ssh {}", handle.host_alias()));

        let tunnel = self
            .tunnels
            .open(
                &handle.instance,
                &[PortPair::new(options.ssh_port, WORKSPACE_SSH_PORT)],
                &session,
            )
            .await?;
        tracing::info!("Tunnel to {} is up", handle.instance);

        let mut sync = None;
        let result = self
            .attach(&handle, &tunnel, folder, options, &session, &mut sync)
            .await;

        if let Some(mut controller) = sync {
            controller.stop().await;
        }
        tunnel.close().await;
        session.cancel();

        result
    }

    async fn resolve(
        &self,
        options: &DevOptions,
        cancel: &CancellationToken,
    ) -> Result<WorkspaceHandle, WsError> {
        let instance = self
            .cluster
            .find_workspace_instance(&options.namespace, &options.name)
            .await?
            .ok_or_else(|| {
                WsError::NotFound(format!(
                    "no running instance of workspace {} in {}",
                    options.name, options.namespace
                ))
            })?;

        if !instance.ready {
            tracing::info!("Waiting for {} to become ready", instance);
            tokio::select! {
                _ = cancel.cancelled() => return Err(WsError::Interrupted),
                ready = wait_for_pod_ready(
                    self.cluster.as_ref(),
                    &instance.namespace,
                    &instance.name,
                    options.pod_ready_timeout,
                ) => ready?,
            }
        }

        Ok(WorkspaceHandle::new(&options.name, &options.namespace, instance))
    }

    /// Persist the private key and point the SSH alias at the local port
    async fn provision_trust(&self, handle: &WorkspaceHandle, port: u16) -> Result<(), WsError> {
        let secret = self
            .cluster
            .read_secret(&handle.namespace, &handle.name)
            .await?
            .ok_or_else(|| WsError::NotFound(format!("secret {}/{}", handle.namespace, handle.name)))?;
        let key = secret.get(PRIVATE_KEY_SECRET_KEY).ok_or_else(|| {
            WsError::NotFound(format!(
                "key {} in secret {}/{}",
                PRIVATE_KEY_SECRET_KEY, handle.namespace, handle.name
            ))
        })?;

        let key_path = write_private_key(&self.key_dir, &handle.name, &handle.namespace, key)?;

        match self.ssh_config.remove(&handle.name, &handle.namespace) {
            Ok(removed) => tracing::debug!("Removed {} stale ssh entries", removed),
            Err(ConfigError::NotFound(path)) => {
                tracing::debug!("{} does not exist yet", path.display())
            }
            Err(e) => return Err(e.into()),
        }
        self.ssh_config
            .upsert(&TrustEntry::new(&handle.name, &handle.namespace, port, key_path))?;

        Ok(())
    }

    async fn attach(
        &self,
        handle: &WorkspaceHandle,
        tunnel: &Tunnel,
        folder: Option<FolderSpec>,
        options: &DevOptions,
        session: &CancellationToken,
        sync: &mut Option<SyncSessionController<E>>,
    ) -> Result<(), WsError> {
        let interactive = !options.disable_terminal;

        if let Some(folder) = folder {
            let target = SyncTarget {
                hostname: host_alias(&handle.name, &handle.namespace),
                port: tunnel
                    .local_port(WORKSPACE_SSH_PORT)
                    .unwrap_or(options.ssh_port),
                folder: folder.target,
                username: WORKSPACE_USER.to_string(),
            };

            let mut controller = SyncSessionController::new(self.engine.clone(), session);
            if interactive {
                let sink: LineSink = Arc::new(|line: &str| print_raw_line(line));
                controller = controller.with_sink(sink, std::io::stdout().is_terminal());
            }

            let controller = sync.insert(controller);
            controller
                .start(&folder.source, target, options.sync_options())
                .await?;
            tracing::info!("Synchronizing {} to {}", folder.source, handle.host_alias());
        }

        if interactive {
            let exec = self
                .cluster
                .exec(
                    &handle.instance,
                    ExecRequest {
                        container: options.container.clone(),
                        command: options.shell.clone(),
                        tty: true,
                    },
                )
                .await?;
            return run_interactive(exec, session).await;
        }

        print_info("Press CTRL+C to stop");
        tokio::select! {
            _ = tunnel.stopped() => print_warning("Tunnel closed"),
            _ = session.cancelled() => tracing::info!("Stopping session"),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_rejects_zero_port() {
        let mut options = DevOptions::new("api", "team-a");
        options.ssh_port = 0;
        assert!(matches!(options.validate(), Err(WsError::Validation(_))));
    }

    #[test]
    fn test_validate_folder() {
        let mut options = DevOptions::new("api", "team-a");
        assert_eq!(options.validate().unwrap(), None);

        options.sync_folder = Some("./src:/home/workspace/src".to_string());
        let folder = options.validate().unwrap().unwrap();
        assert_eq!(folder.source, "./src");
        assert_eq!(folder.target, "/home/workspace/src");

        options.sync_folder = Some("abc".to_string());
        assert!(matches!(options.validate(), Err(WsError::Validation(_))));
    }

    #[test]
    fn test_options_from_config() {
        let mut config = CliConfig::default();
        config.dev.ssh_port = 2400;
        config.sync.default_mode = "ONE-WAY-REPLICA".to_string();

        let options = DevOptions::new("api", "team-a").with_config(&config);
        assert_eq!(options.ssh_port, 2400);
        assert_eq!(options.sync_mode, SyncMode::OneWayReplica);
        assert_eq!(options.sync_ignores, vec![".mutagen", ".git"]);
        assert_eq!(options.shell, vec!["bash", "--login"]);
    }
}
