//! Control-plane contract

use std::collections::BTreeMap;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::Pod;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;

use ws_core::{InstanceRef, TerminalSize, WsError};

/// One observed change of a watched resource
#[derive(Debug, Clone)]
pub enum ResourceEvent<K> {
    /// The resource was added or modified
    Applied(K),
    /// The resource was deleted
    Deleted(K),
    /// Progress marker without an object
    Bookmark,
}

/// Server-side watch subscription. Dropping the stream releases it.
pub type EventStream<K> = BoxStream<'static, Result<ResourceEvent<K>, WsError>>;

/// Bidirectional byte stream
pub trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> AsyncStream for T {}

/// A single forwarded connection into an instance port
pub type PortStream = Box<dyn AsyncStream>;

/// Command to run inside a workspace container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecRequest {
    pub container: String,
    pub command: Vec<String>,
    /// Allocate a TTY. Stderr is merged into stdout when set.
    pub tty: bool,
}

/// Streams of a running remote command
pub struct ExecSession {
    pub stdin: Option<Box<dyn AsyncWrite + Send + Unpin>>,
    pub stdout: Option<Box<dyn AsyncRead + Send + Unpin>>,
    pub stderr: Option<Box<dyn AsyncRead + Send + Unpin>>,
    /// Size updates for the remote TTY, present only for TTY sessions
    pub resize: Option<mpsc::Sender<TerminalSize>>,
    /// Resolves when the remote command exits
    pub completion: BoxFuture<'static, Result<(), WsError>>,
}

impl std::fmt::Debug for ExecSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecSession")
            .field("stdin", &self.stdin.is_some())
            .field("stdout", &self.stdout.is_some())
            .field("stderr", &self.stderr.is_some())
            .field("resize", &self.resize.is_some())
            .finish()
    }
}

/// Narrow view of the cluster control plane
#[async_trait]
pub trait Cluster: Send + Sync + 'static {
    /// First instance carrying the workspace label, if any
    async fn find_workspace_instance(
        &self,
        namespace: &str,
        workspace: &str,
    ) -> Result<Option<InstanceRef>, WsError>;

    /// Data of a secret, `None` when the secret does not exist
    async fn read_secret(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BTreeMap<String, Vec<u8>>>, WsError>;

    /// Watch a single pod by name
    async fn watch_pod(&self, namespace: &str, name: &str) -> Result<EventStream<Pod>, WsError>;

    /// Watch a single stateful set by name
    async fn watch_stateful_set(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<EventStream<StatefulSet>, WsError>;

    /// Watch a single deployment by name
    async fn watch_deployment(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<EventStream<Deployment>, WsError>;

    /// Open one forwarded connection to `port` on the instance
    async fn port_stream(&self, instance: &InstanceRef, port: u16) -> Result<PortStream, WsError>;

    /// Start a command inside the instance
    async fn exec(
        &self,
        instance: &InstanceRef,
        request: ExecRequest,
    ) -> Result<ExecSession, WsError>;
}
