//! Tunnel lifecycle

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use ws_core::{ClusterError, InstanceRef, WsError};

use super::{PortPair, Tunnel};
use crate::cluster::{Cluster, PortStream};

/// Opens tunnels into workspace instances
pub struct TunnelManager<C: ?Sized> {
    cluster: Arc<C>,
    bind_address: IpAddr,
}

impl<C: Cluster + ?Sized> TunnelManager<C> {
    /// Manager binding on the loopback interface
    pub fn new(cluster: Arc<C>) -> Self {
        Self {
            cluster,
            bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
        }
    }

    /// Open a tunnel and wait until it forwards.
    ///
    /// Binds every local port, then proves each remote port reachable
    /// before signalling ready. A failure before ready is returned here
    /// instead of surfacing later from the background task. Cancelling
    /// `cancel` while waiting yields [`WsError::Interrupted`]; once open,
    /// it stops the tunnel.
    pub async fn open(
        &self,
        instance: &InstanceRef,
        ports: &[PortPair],
        cancel: &CancellationToken,
    ) -> Result<Tunnel, WsError> {
        let stop = cancel.child_token();

        let mut listeners = Vec::with_capacity(ports.len());
        let mut forwarded = Vec::with_capacity(ports.len());
        for pair in ports {
            let listener = TcpListener::bind((self.bind_address, pair.local)).await?;
            let local = listener.local_addr()?.port();
            let resolved = PortPair::new(local, pair.remote);
            listeners.push((listener, resolved));
            forwarded.push(resolved);
        }

        let (ready_tx, ready_rx) = oneshot::channel();
        let task = tokio::spawn(run_forwarding(
            self.cluster.clone(),
            instance.clone(),
            listeners,
            stop.clone(),
            ready_tx,
        ));

        let mut tunnel = Tunnel {
            instance: instance.clone(),
            forwarded,
            stop,
            task: Some(task),
        };

        let outcome = tokio::select! {
            ready = ready_rx => ready,
            _ = cancel.cancelled() => {
                tunnel.close().await;
                return Err(WsError::Interrupted);
            }
        };

        match outcome {
            Ok(Ok(())) => {
                for pair in tunnel.forwarded_ports() {
                    tracing::info!(
                        "Forwarding 127.0.0.1:{} -> {}:{}",
                        pair.local,
                        instance,
                        pair.remote
                    );
                }
                Ok(tunnel)
            }
            Ok(Err(e)) => {
                tunnel.close().await;
                Err(e)
            }
            Err(_) => {
                // Sender dropped without a verdict
                if let Some(task) = tunnel.task.take() {
                    let _ = task.await;
                }
                if cancel.is_cancelled() {
                    return Err(WsError::Interrupted);
                }
                Err(ClusterError::PortForward(format!(
                    "forwarding to {} ended before it was ready",
                    instance
                ))
                .into())
            }
        }
    }
}

async fn run_forwarding<C: Cluster + ?Sized>(
    cluster: Arc<C>,
    instance: InstanceRef,
    listeners: Vec<(TcpListener, PortPair)>,
    stop: CancellationToken,
    ready: oneshot::Sender<Result<(), WsError>>,
) {
    for (_, pair) in &listeners {
        let check = tokio::select! {
            _ = stop.cancelled() => return,
            check = cluster.port_stream(&instance, pair.remote) => check,
        };
        if let Err(e) = check {
            stop.cancel();
            let _ = ready.send(Err(e));
            return;
        }
    }

    if ready.send(Ok(())).is_err() {
        return;
    }

    let mut loops = JoinSet::new();
    for (listener, pair) in listeners {
        loops.spawn(accept_loop(
            cluster.clone(),
            instance.clone(),
            listener,
            pair,
            stop.clone(),
        ));
    }

    // Every loop exits only after `stop` fired
    while loops.join_next().await.is_some() {}
    tracing::debug!("Forwarding task for {} finished", instance);
}

async fn accept_loop<C: Cluster + ?Sized>(
    cluster: Arc<C>,
    instance: InstanceRef,
    listener: TcpListener,
    pair: PortPair,
    stop: CancellationToken,
) {
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
            accepted = listener.accept() => {
                let (socket, peer) = match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        tracing::warn!("Accept on port {} failed: {}", pair.local, e);
                        stop.cancel();
                        break;
                    }
                };

                tracing::debug!("Connection from {} -> {}:{}", peer, instance, pair.remote);
                connections.spawn(forward_connection(
                    cluster.clone(),
                    instance.clone(),
                    pair.remote,
                    socket,
                    stop.clone(),
                ));
            }
        }
    }

    connections.shutdown().await;
}

/// Carry one accepted connection. A failed upstream open drops only this
/// socket; the listener keeps serving.
async fn forward_connection<C: Cluster + ?Sized>(
    cluster: Arc<C>,
    instance: InstanceRef,
    remote: u16,
    mut socket: TcpStream,
    stop: CancellationToken,
) {
    let upstream = tokio::select! {
        _ = stop.cancelled() => return,
        upstream = cluster.port_stream(&instance, remote) => upstream,
    };
    let mut upstream = match upstream {
        Ok(upstream) => upstream,
        Err(e) => {
            tracing::warn!("Port forward to {}:{} failed: {}", instance, remote, e);
            return;
        }
    };

    tokio::select! {
        _ = stop.cancelled() => {}
        copied = tokio::io::copy_bidirectional(&mut socket, &mut upstream) => match copied {
            Ok((sent, received)) => {
                tracing::trace!("Connection closed ({} bytes out, {} bytes in)", sent, received);
            }
            Err(e) => tracing::debug!("Connection ended: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{EventStream, ExecRequest, ExecSession};
    use async_trait::async_trait;
    use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
    use k8s_openapi::api::core::v1::Pod;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    /// How the fake answers port-forward requests
    #[derive(Clone, Copy)]
    enum Forwarding {
        /// Echo every byte back
        Echo,
        /// Fail every request
        Refuse,
        /// Serve the readiness check, fail the next request, then echo
        FailOnce,
        /// Never answer
        Hang,
    }

    struct FakeCluster {
        forwarding: Forwarding,
        requests: AtomicUsize,
    }

    impl FakeCluster {
        fn new(forwarding: Forwarding) -> Arc<Self> {
            Arc::new(Self {
                forwarding,
                requests: AtomicUsize::new(0),
            })
        }
    }

    fn echo_stream() -> PortStream {
        let (near, mut far) = tokio::io::duplex(1024);
        tokio::spawn(async move {
            let mut buf = [0u8; 256];
            loop {
                match far.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if far.write_all(&buf[..n]).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });
        Box::new(near)
    }

    #[async_trait]
    impl Cluster for FakeCluster {
        async fn find_workspace_instance(
            &self,
            _namespace: &str,
            _workspace: &str,
        ) -> Result<Option<InstanceRef>, WsError> {
            unimplemented!()
        }

        async fn read_secret(
            &self,
            _namespace: &str,
            _name: &str,
        ) -> Result<Option<BTreeMap<String, Vec<u8>>>, WsError> {
            unimplemented!()
        }

        async fn watch_pod(&self, _namespace: &str, _name: &str) -> Result<EventStream<Pod>, WsError> {
            unimplemented!()
        }

        async fn watch_stateful_set(
            &self,
            _namespace: &str,
            _name: &str,
        ) -> Result<EventStream<StatefulSet>, WsError> {
            unimplemented!()
        }

        async fn watch_deployment(
            &self,
            _namespace: &str,
            _name: &str,
        ) -> Result<EventStream<Deployment>, WsError> {
            unimplemented!()
        }

        async fn port_stream(&self, _instance: &InstanceRef, port: u16) -> Result<PortStream, WsError> {
            let attempt = self.requests.fetch_add(1, Ordering::SeqCst);
            match self.forwarding {
                Forwarding::Echo => Ok(echo_stream()),
                Forwarding::FailOnce if attempt != 1 => Ok(echo_stream()),
                Forwarding::Refuse | Forwarding::FailOnce => {
                    Err(ClusterError::PortForward(format!("port {} refused", port)).into())
                }
                Forwarding::Hang => std::future::pending().await,
            }
        }

        async fn exec(
            &self,
            _instance: &InstanceRef,
            _request: ExecRequest,
        ) -> Result<ExecSession, WsError> {
            unimplemented!()
        }
    }

    fn instance() -> InstanceRef {
        InstanceRef {
            name: "api-0".into(),
            namespace: "team".into(),
            ready: true,
        }
    }

    #[tokio::test]
    async fn test_open_resolves_ephemeral_port_and_forwards() {
        let manager = TunnelManager::new(FakeCluster::new(Forwarding::Echo));
        let cancel = CancellationToken::new();

        let tunnel = manager
            .open(&instance(), &[PortPair::new(0, 2222)], &cancel)
            .await
            .unwrap();

        let local = tunnel.local_port(2222).unwrap();
        assert_ne!(local, 0);

        let mut client = TcpStream::connect(("127.0.0.1", local)).await.unwrap();
        client.write_all(b"ping").await.unwrap();
        let mut reply = [0u8; 4];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(&reply, b"ping");

        tunnel.close().await;
    }

    #[tokio::test]
    async fn test_failure_before_ready_is_returned() {
        let manager = TunnelManager::new(FakeCluster::new(Forwarding::Refuse));
        let cancel = CancellationToken::new();

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            manager.open(&instance(), &[PortPair::new(0, 2222)], &cancel),
        )
        .await
        .expect("open must not hang");

        assert!(matches!(
            result,
            Err(WsError::Cluster(ClusterError::PortForward(_)))
        ));
        assert!(!cancel.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancel_before_ready_is_interrupted() {
        let manager = TunnelManager::new(FakeCluster::new(Forwarding::Hang));
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let result = manager
            .open(&instance(), &[PortPair::new(0, 2222)], &cancel)
            .await;
        assert!(matches!(result, Err(WsError::Interrupted)));
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let manager = TunnelManager::new(FakeCluster::new(Forwarding::Echo));
        let cancel = CancellationToken::new();
        let tunnel = manager
            .open(&instance(), &[PortPair::new(0, 2222)], &cancel)
            .await
            .unwrap();

        assert!(!tunnel.is_stopped());
        tunnel.stop();
        tunnel.stop();
        tunnel.stopped().await;
        assert!(tunnel.is_stopped());
        tunnel.close().await;

        // Stopping a tunnel does not touch the caller's token
        assert!(!cancel.is_cancelled());
    }

    #[tokio::test]
    async fn test_failed_connection_keeps_tunnel_open() {
        let cluster = FakeCluster::new(Forwarding::FailOnce);
        let manager = TunnelManager::new(cluster.clone());
        let cancel = CancellationToken::new();
        let tunnel = manager
            .open(&instance(), &[PortPair::new(0, 2222)], &cancel)
            .await
            .unwrap();
        let local = tunnel.local_port(2222).unwrap();

        // Upstream refuses this one; the socket is closed without data
        let mut refused = TcpStream::connect(("127.0.0.1", local)).await.unwrap();
        let mut buf = [0u8; 1];
        let read = tokio::time::timeout(Duration::from_secs(5), refused.read(&mut buf))
            .await
            .expect("refused connection should be closed");
        assert!(matches!(read, Ok(0) | Err(_)));
        assert!(!tunnel.is_stopped());

        let mut client = TcpStream::connect(("127.0.0.1", local)).await.unwrap();
        client.write_all(b"pong").await.unwrap();
        let mut reply = [0u8; 4];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(&reply, b"pong");
        assert_eq!(cluster.requests.load(Ordering::SeqCst), 3);

        tunnel.close().await;
    }

    #[tokio::test]
    async fn test_parent_cancel_stops_open_tunnel() {
        let manager = TunnelManager::new(FakeCluster::new(Forwarding::Echo));
        let cancel = CancellationToken::new();
        let tunnel = manager
            .open(&instance(), &[PortPair::new(0, 2222)], &cancel)
            .await
            .unwrap();

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), tunnel.stopped())
            .await
            .unwrap();
        tunnel.close().await;
    }
}
