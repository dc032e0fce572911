//! workspace CLI
//!
//! Connects to remote development workspaces running on a cluster:
//! - dev: tunnel, SSH trust, file synchronization and an interactive shell
//! - exec: run one command inside a workspace
//! - wait: block until a workspace (or a deployment) is ready

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ws_cli::commands;
use ws_cli::output::print_error;
use ws_cli::DevOptions;
use ws_cluster::KubeCluster;
use ws_core::config::{self, CliConfig};
use ws_sync::SyncMode;

#[derive(Parser)]
#[command(name = "workspace")]
#[command(author, version, about = "Remote development workspaces")]
#[command(propagate_version = true)]
struct Cli {
    /// Path to the kubeconfig file
    #[arg(long, global = true)]
    kube_config: Option<PathBuf>,

    /// Project (namespace) of the workspace, defaults to the kubeconfig context
    #[arg(short, long, global = true)]
    project: Option<String>,

    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a development session in a workspace
    Dev {
        /// Workspace name
        name: String,
        /// Local port for the SSH tunnel (overrides config)
        #[arg(long)]
        ssh_port: Option<u16>,
        /// Keep the tunnel open without attaching a shell
        #[arg(long)]
        disable_terminal: bool,
        /// Synchronize a local folder, as SRC:DST
        #[arg(long, value_name = "SRC:DST")]
        sync_folder: Option<String>,
        /// Ignore pattern for synchronization (repeatable)
        #[arg(long = "sync-ignore", value_name = "PATTERN")]
        sync_ignores: Vec<String>,
        /// Label for the synchronization session (repeatable)
        #[arg(long = "sync-label", value_name = "K=V", value_parser = parse_label)]
        sync_labels: Vec<(String, String)>,
        /// Keep synchronizing and report changes
        #[arg(long)]
        sync_watch: bool,
        /// two-way-safe, two-way-resolved, one-way-safe or one-way-replica
        #[arg(long, value_name = "MODE")]
        sync_mode: Option<String>,
    },

    /// Run a command inside a workspace
    Exec {
        /// Workspace name
        name: String,
        /// Allocate a terminal
        #[arg(short, long)]
        tty: bool,
        /// Command to run
        #[arg(trailing_var_arg = true, required = true)]
        command: Vec<String>,
    },

    /// Wait until a workspace has a ready replica
    Wait {
        /// Workspace name
        name: String,
        /// Seconds to wait for each phase (overrides config)
        #[arg(long)]
        timeout: Option<u64>,
        /// Only wait for a replica to exist
        #[arg(long, conflicts_with = "deployment")]
        no_ready: bool,
        /// Wait for a deployment of that name to have all replicas ready
        #[arg(long)]
        deployment: bool,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show,
    /// Show config file path
    Path,
    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
}

fn parse_label(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("invalid label '{}', expected K=V", raw)),
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    let log_level = match (cli.quiet, cli.verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, 2) => "debug",
        (false, _) => "trace",
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    if let Err(e) = run(cli).await {
        print_error(&format!("{:#}", e));
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.as_deref();

    if let Commands::Config { action } = &cli.command {
        match action {
            ConfigAction::Show => commands::config_show(config_path)?,
            ConfigAction::Path => commands::config_path(config_path),
            ConfigAction::Init { force } => commands::config_init(config_path, *force)?,
        }
        return Ok(());
    }

    let path = config_path
        .map(PathBuf::from)
        .unwrap_or_else(config::default_config_path);
    let config: CliConfig = config::load_or_default(&path)
        .with_context(|| format!("Failed to load config from {}", path.display()))?;

    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone());

    let kube_config = cli.kube_config.as_deref();
    let project = cli.project.as_deref();

    match cli.command {
        Commands::Dev {
            name,
            ssh_port,
            disable_terminal,
            sync_folder,
            sync_ignores,
            sync_labels,
            sync_watch,
            sync_mode,
        } => {
            let mut options = DevOptions::new(name, String::new()).with_config(&config);
            if let Some(port) = ssh_port {
                options.ssh_port = port;
            }
            if !sync_ignores.is_empty() {
                options.sync_ignores = sync_ignores;
            }
            if let Some(mode) = sync_mode {
                options.sync_mode = SyncMode::from_name_or_default(&mode);
            }
            options.disable_terminal = disable_terminal;
            options.sync_folder = sync_folder;
            options.sync_labels = sync_labels.into_iter().collect::<BTreeMap<_, _>>();
            options.sync_watch = sync_watch;

            // Bad arguments are reported before any cluster access
            options
                .validate()
                .with_context(|| format!("Development session for {} failed", options.name))?;

            let (cluster, namespace) = connect(kube_config, project).await?;
            options.namespace = namespace;
            commands::dev_command(cluster, &config, options, &cancel).await?;
        }

        Commands::Exec { name, tty, command } => {
            let (cluster, namespace) = connect(kube_config, project).await?;
            commands::exec_command(
                cluster.as_ref(),
                &namespace,
                &name,
                &config.dev.container,
                &command,
                tty,
                &cancel,
            )
            .await?;
        }

        Commands::Wait {
            name,
            timeout,
            no_ready,
            deployment,
        } => {
            let timeout = timeout
                .map(Duration::from_secs)
                .unwrap_or(config.wait.timeout);
            let target = wait_target(no_ready, deployment);
            let (cluster, namespace) = connect(kube_config, project).await?;
            tokio::select! {
                result = commands::wait_command(cluster.as_ref(), &namespace, &name, timeout, target) => result?,
                _ = cancel.cancelled() => anyhow::bail!("Interrupted"),
            }
        }

        Commands::Config { .. } => {}
    }

    Ok(())
}

/// Connect to the cluster and resolve the namespace to work in
async fn connect(
    kube_config: Option<&Path>,
    project: Option<&str>,
) -> Result<(Arc<KubeCluster>, String)> {
    let cluster = KubeCluster::connect(kube_config)
        .await
        .context("Failed to connect to the cluster")?;
    let namespace = project
        .map(str::to_string)
        .unwrap_or_else(|| cluster.default_namespace().to_string());
    Ok((Arc::new(cluster), namespace))
}

fn wait_target(no_ready: bool, deployment: bool) -> commands::WaitFor {
    match (deployment, no_ready) {
        (true, _) => commands::WaitFor::Deployment,
        (false, true) => commands::WaitFor::Replica,
        (false, false) => commands::WaitFor::ReadyReplica,
    }
}

/// Cancel `cancel` on Ctrl+C or SIGTERM
fn spawn_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    tracing::warn!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                tracing::info!("Received Ctrl+C, shutting down...");
            }
            _ = terminate => {
                tracing::info!("Received SIGTERM, shutting down...");
            }
        }

        cancel.cancel();
    });
}
