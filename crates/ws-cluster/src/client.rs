//! `kube`-backed control-plane client
//!
//! A [`KubeCluster`] is built once at process start and shared by reference.
//! An instance created with [`KubeCluster::unconnected`] answers every call
//! with [`WsError::NotConnected`].

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::future::Future;
use std::path::Path;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{Pod, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Status;
use k8s_openapi::NamespaceResourceScope;
use kube::api::{AttachParams, AttachedProcess, ListParams, WatchEvent, WatchParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Api, Client, Config, Resource};
use serde::de::DeserializeOwned;
use tokio::sync::{mpsc, oneshot};

use ws_core::types::WORKSPACE_LABEL;
use ws_core::{ClusterError, InstanceRef, TerminalSize, WsError};

use crate::cluster::{Cluster, EventStream, ExecRequest, ExecSession, PortStream, ResourceEvent};
use crate::readiness::pod_is_ready;

/// Buffered watch events between the subscription task and its consumer
const WATCH_EVENT_CHANNEL_CAPACITY: usize = 16;

/// Buffered terminal size updates for an exec session
const RESIZE_CHANNEL_CAPACITY: usize = 4;

/// Control-plane client
#[derive(Clone)]
pub struct KubeCluster {
    client: Option<Client>,
    default_namespace: String,
}

impl KubeCluster {
    /// A client that has not been connected yet
    pub fn unconnected() -> Self {
        Self {
            client: None,
            default_namespace: "default".to_string(),
        }
    }

    /// Connect using an explicit kubeconfig file, or the inferred
    /// configuration (`KUBECONFIG`, `~/.kube/config`, in-cluster) when `None`
    pub async fn connect(kubeconfig: Option<&Path>) -> Result<Self, WsError> {
        let config = match kubeconfig {
            Some(path) => {
                let kubeconfig = Kubeconfig::read_from(path)
                    .map_err(|e| ClusterError::Kubeconfig(format!("{}: {}", path.display(), e)))?;
                Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                    .await
                    .map_err(|e| ClusterError::Kubeconfig(e.to_string()))?
            }
            None => Config::infer()
                .await
                .map_err(|e| ClusterError::Kubeconfig(e.to_string()))?,
        };

        let default_namespace = config.default_namespace.clone();
        tracing::debug!(
            "Using cluster {} (namespace {})",
            config.cluster_url,
            default_namespace
        );

        let client = Client::try_from(config).map_err(|e| ClusterError::Api(e.to_string()))?;

        Ok(Self {
            client: Some(client),
            default_namespace,
        })
    }

    /// Namespace of the active kubeconfig context
    pub fn default_namespace(&self) -> &str {
        &self.default_namespace
    }

    pub fn is_connected(&self) -> bool {
        self.client.is_some()
    }

    fn client(&self) -> Result<Client, WsError> {
        self.client.clone().ok_or(WsError::NotConnected)
    }

    /// Subscribe to a single named object.
    ///
    /// The subscription lives in its own task, which exits and releases the
    /// server-side watch as soon as the returned stream is dropped.
    async fn watch_named<K>(&self, namespace: &str, name: &str) -> Result<EventStream<K>, WsError>
    where
        K: Resource<DynamicType = (), Scope = NamespaceResourceScope>
            + Clone
            + Debug
            + DeserializeOwned
            + Send
            + 'static,
    {
        let api: Api<K> = Api::namespaced(self.client()?, namespace);
        let kind = K::kind(&()).to_string();
        let name = name.to_string();
        let params = WatchParams::default().fields(&format!("metadata.name={}", name));

        let (subscribed_tx, subscribed_rx) = oneshot::channel::<Result<(), String>>();
        let (tx, rx) = mpsc::channel(WATCH_EVENT_CHANNEL_CAPACITY);

        let task_kind = kind.clone();
        let task_name = name.clone();
        tokio::spawn(async move {
            let stream = match api.watch(&params, "0").await {
                Ok(stream) => {
                    let _ = subscribed_tx.send(Ok(()));
                    stream
                }
                Err(e) => {
                    let _ = subscribed_tx.send(Err(e.to_string()));
                    return;
                }
            };
            tokio::pin!(stream);

            loop {
                tokio::select! {
                    _ = tx.closed() => break,
                    event = stream.next() => {
                        let Some(event) = event else { break };
                        let event = convert_watch_event(event, &task_kind, &task_name);
                        if tx.send(event).await.is_err() {
                            break;
                        }
                    }
                }
            }

            tracing::trace!("Released watch on {} {}", task_kind, task_name);
        });

        let watch_error = |reason: String| ClusterError::Watch {
            kind: kind.clone(),
            name: name.clone(),
            reason,
        };

        subscribed_rx
            .await
            .map_err(|_| watch_error("subscription task ended".to_string()))?
            .map_err(watch_error)?;

        let events = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|event| (event, rx))
        });
        Ok(events.boxed())
    }
}

impl std::fmt::Debug for KubeCluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeCluster")
            .field("connected", &self.client.is_some())
            .field("default_namespace", &self.default_namespace)
            .finish()
    }
}

fn convert_watch_event<K>(
    event: Result<WatchEvent<K>, kube::Error>,
    kind: &str,
    name: &str,
) -> Result<ResourceEvent<K>, WsError> {
    let watch_error = |reason: String| {
        WsError::from(ClusterError::Watch {
            kind: kind.to_string(),
            name: name.to_string(),
            reason,
        })
    };

    match event {
        Ok(WatchEvent::Added(object)) | Ok(WatchEvent::Modified(object)) => {
            Ok(ResourceEvent::Applied(object))
        }
        Ok(WatchEvent::Deleted(object)) => Ok(ResourceEvent::Deleted(object)),
        Ok(WatchEvent::Bookmark(_)) => Ok(ResourceEvent::Bookmark),
        Ok(WatchEvent::Error(response)) => Err(watch_error(response.message)),
        Err(e) => Err(watch_error(e.to_string())),
    }
}

/// Join the remote command and surface a failed exit status
async fn wait_for_exit<S>(
    attached: AttachedProcess,
    status: Option<S>,
    target: String,
) -> Result<(), WsError>
where
    S: Future<Output = Option<Status>>,
{
    let status = match status {
        Some(status) => status.await,
        None => None,
    };

    attached
        .join()
        .await
        .map_err(|e| ClusterError::Exec(format!("{}: {}", target, e)))?;

    match status {
        Some(status) if status.status.as_deref() == Some("Failure") => {
            let message = status
                .message
                .unwrap_or_else(|| "command failed".to_string());
            Err(ClusterError::Exec(format!("{}: {}", target, message)).into())
        }
        _ => Ok(()),
    }
}

/// Map a request failure, surfacing 404 as [`WsError::NotFound`]
fn api_error(e: kube::Error, what: &str) -> WsError {
    match e {
        kube::Error::Api(response) if response.code == 404 => {
            WsError::NotFound(format!("{}: {}", what, response.message))
        }
        other => ClusterError::Api(format!("{}: {}", what, other)).into(),
    }
}

#[async_trait]
impl Cluster for KubeCluster {
    async fn find_workspace_instance(
        &self,
        namespace: &str,
        workspace: &str,
    ) -> Result<Option<InstanceRef>, WsError> {
        let pods: Api<Pod> = Api::namespaced(self.client()?, namespace);
        let selector = format!("{}={}", WORKSPACE_LABEL, workspace);
        let list = pods
            .list(&ListParams::default().labels(&selector))
            .await
            .map_err(|e| api_error(e, &format!("list pods {}", selector)))?;

        let Some(pod) = list.items.into_iter().next() else {
            return Ok(None);
        };

        Ok(Some(InstanceRef {
            name: pod.metadata.name.clone().unwrap_or_default(),
            namespace: pod
                .metadata
                .namespace
                .clone()
                .unwrap_or_else(|| namespace.to_string()),
            ready: pod_is_ready(&pod),
        }))
    }

    async fn read_secret(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BTreeMap<String, Vec<u8>>>, WsError> {
        let secrets: Api<Secret> = Api::namespaced(self.client()?, namespace);
        let secret = secrets
            .get_opt(name)
            .await
            .map_err(|e| api_error(e, &format!("get secret {}/{}", namespace, name)))?;

        Ok(secret.map(|secret| {
            secret
                .data
                .unwrap_or_default()
                .into_iter()
                .map(|(key, value)| (key, value.0))
                .collect()
        }))
    }

    async fn watch_pod(&self, namespace: &str, name: &str) -> Result<EventStream<Pod>, WsError> {
        self.watch_named(namespace, name).await
    }

    async fn watch_stateful_set(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<EventStream<StatefulSet>, WsError> {
        self.watch_named(namespace, name).await
    }

    async fn watch_deployment(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<EventStream<Deployment>, WsError> {
        self.watch_named(namespace, name).await
    }

    async fn port_stream(&self, instance: &InstanceRef, port: u16) -> Result<PortStream, WsError> {
        let pods: Api<Pod> = Api::namespaced(self.client()?, &instance.namespace);
        let mut forwarder = pods
            .portforward(&instance.name, &[port])
            .await
            .map_err(|e| ClusterError::PortForward(format!("{} port {}: {}", instance, port, e)))?;

        let stream = forwarder.take_stream(port).ok_or_else(|| {
            ClusterError::PortForward(format!("{} port {}: no stream", instance, port))
        })?;

        let target = format!("{}:{}", instance, port);
        tokio::spawn(async move {
            if let Err(e) = forwarder.join().await {
                tracing::debug!("Port forward to {} ended: {}", target, e);
            }
        });

        Ok(Box::new(stream))
    }

    async fn exec(
        &self,
        instance: &InstanceRef,
        request: ExecRequest,
    ) -> Result<ExecSession, WsError> {
        let pods: Api<Pod> = Api::namespaced(self.client()?, &instance.namespace);

        let params = if request.tty {
            AttachParams::interactive_tty()
        } else {
            AttachParams::default().stdin(true).stdout(true).stderr(true)
        }
        .container(request.container.clone());

        let mut attached = pods
            .exec(&instance.name, request.command.clone(), &params)
            .await
            .map_err(|e| ClusterError::Exec(format!("{}: {}", instance, e)))?;

        let stdin = attached
            .stdin()
            .map(|s| Box::new(s) as Box<dyn tokio::io::AsyncWrite + Send + Unpin>);
        let stdout = attached
            .stdout()
            .map(|s| Box::new(s) as Box<dyn tokio::io::AsyncRead + Send + Unpin>);
        let stderr = attached
            .stderr()
            .map(|s| Box::new(s) as Box<dyn tokio::io::AsyncRead + Send + Unpin>);

        let resize = attached.terminal_size().map(|mut remote| {
            let (tx, mut rx) = mpsc::channel::<TerminalSize>(RESIZE_CHANNEL_CAPACITY);
            tokio::spawn(async move {
                while let Some(size) = rx.recv().await {
                    let update = kube::api::TerminalSize {
                        width: size.cols,
                        height: size.rows,
                    };
                    if remote.send(update).await.is_err() {
                        break;
                    }
                }
            });
            tx
        });

        let status = attached.take_status();
        let completion = Box::pin(wait_for_exit(attached, status, instance.to_string()));

        Ok(ExecSession {
            stdin,
            stdout,
            stderr,
            resize,
            completion,
        })
    }
}
