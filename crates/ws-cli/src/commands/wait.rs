//! Wait command implementation

use std::time::Duration;

use anyhow::Result;

use ws_cluster::readiness::{wait_for_deployment, wait_for_replica, wait_for_replica_ready};
use ws_cluster::Cluster;

use crate::output::{print_info, print_success};

/// What `wait` blocks on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitFor {
    /// The workspace's stateful set has created a replica
    Replica,
    /// ...and that replica is ready
    ReadyReplica,
    /// Every replica of the deployment named after the workspace is ready
    Deployment,
}

/// Wait for the workspace's workload to reach `target`.
///
/// For [`WaitFor::ReadyReplica`] each phase gets the full `timeout`.
pub async fn wait_command<C: Cluster + ?Sized>(
    cluster: &C,
    namespace: &str,
    name: &str,
    timeout: Duration,
    target: WaitFor,
) -> Result<()> {
    match target {
        WaitFor::Deployment => {
            print_info(&format!("Waiting for deployment {} to become ready...", name));
            wait_for_deployment(cluster, namespace, name, timeout).await?;
            print_success(&format!("Deployment {} is ready", name));
        }
        WaitFor::Replica | WaitFor::ReadyReplica => {
            print_info(&format!("Waiting for a replica of {}...", name));
            wait_for_replica(cluster, namespace, name, timeout).await?;

            if target == WaitFor::ReadyReplica {
                print_info(&format!("Waiting for {} to become ready...", name));
                wait_for_replica_ready(cluster, namespace, name, timeout).await?;
                print_success(&format!("Workspace {} is ready", name));
            } else {
                print_success(&format!("Workspace {} has a replica", name));
            }
        }
    }
    Ok(())
}
