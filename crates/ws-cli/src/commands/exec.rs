//! Exec command implementation

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use ws_cluster::{Cluster, ExecRequest};
use ws_core::WsError;

use crate::terminal::{run_interactive, run_piped};

/// Run `command` through `bash -c` inside the workspace container
pub async fn exec_command<C: Cluster + ?Sized>(
    cluster: &C,
    namespace: &str,
    name: &str,
    container: &str,
    command: &[String],
    tty: bool,
    cancel: &CancellationToken,
) -> Result<()> {
    let instance = cluster
        .find_workspace_instance(namespace, name)
        .await?
        .ok_or_else(|| {
            WsError::NotFound(format!("no running instance of workspace {} in {}", name, namespace))
        })?;

    let request = ExecRequest {
        container: container.to_string(),
        command: vec!["bash".to_string(), "-c".to_string(), command.join(" ")],
        tty,
    };
    tracing::debug!("Executing {:?} in {}", request.command, instance);

    let session = cluster
        .exec(&instance, request)
        .await
        .with_context(|| format!("Failed to start command in {}", instance))?;

    if tty {
        run_interactive(session, cancel).await?;
    } else {
        run_piped(session, cancel).await?;
    }
    Ok(())
}
