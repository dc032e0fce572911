//! Local port forwarding into workspace instances
//!
//! A [`Tunnel`] binds one local listener per [`PortPair`] and forwards each
//! accepted connection over its own control-plane port-forward stream.
//! Its stop-signal is the only handle other components hold: cancelling it
//! tears the tunnel down, and the forwarding task cancels it itself when a
//! listener fails. A connection whose upstream stream cannot be opened is
//! closed on its own and the tunnel keeps serving.

mod manager;

pub use manager::TunnelManager;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use ws_core::InstanceRef;

/// Mapping of a local port to a port inside the instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PortPair {
    /// Local port, 0 for an ephemeral one
    pub local: u16,
    pub remote: u16,
}

impl PortPair {
    pub fn new(local: u16, remote: u16) -> Self {
        Self { local, remote }
    }
}

/// An established tunnel
pub struct Tunnel {
    instance: InstanceRef,
    forwarded: Vec<PortPair>,
    stop: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl Tunnel {
    /// Port pairs with every ephemeral local port resolved
    pub fn forwarded_ports(&self) -> &[PortPair] {
        &self.forwarded
    }

    /// Local port forwarded to `remote`
    pub fn local_port(&self, remote: u16) -> Option<u16> {
        self.forwarded
            .iter()
            .find(|pair| pair.remote == remote)
            .map(|pair| pair.local)
    }

    pub fn instance(&self) -> &InstanceRef {
        &self.instance
    }

    /// Signal the tunnel to stop. Safe to call any number of times.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }

    /// Resolves once the tunnel was stopped, by us or by the forwarding task
    pub async fn stopped(&self) {
        self.stop.cancelled().await
    }

    /// Stop and wait for the forwarding task to finish
    pub async fn close(mut self) {
        self.stop.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!("Tunnel task for {} failed: {}", self.instance, e);
            }
        }
        tracing::debug!("Tunnel to {} closed", self.instance);
    }
}

impl Drop for Tunnel {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

impl std::fmt::Debug for Tunnel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tunnel")
            .field("instance", &self.instance)
            .field("forwarded", &self.forwarded)
            .field("stopped", &self.stop.is_cancelled())
            .finish()
    }
}
