//! Wait-until-predicate over resource watches
//!
//! A [`ReadinessWatch`] subscribes to a single named resource and evaluates
//! a predicate against every applied object until one matches or the
//! deadline passes. The subscription is owned by the wait future, so it is
//! dropped (and the server-side watch released) on every resolution path:
//! ready, timed out, failed, or the caller abandoning the wait.
//!
//! The predicates for stateful sets are deliberately kept apart:
//! [`has_replicas`] only says a replica exists, [`has_ready_replicas`] says
//! one is serving.

use std::future::Future;
use std::time::Duration;

use futures::StreamExt;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::Pod;
use tokio::time::Instant;

use ws_core::{ClusterError, WsError};

use crate::cluster::{Cluster, EventStream, ResourceEvent};

/// Default deadline for a pod to report ready
pub const POD_READY_TIMEOUT: Duration = Duration::from_secs(30);

/// Pure check over a status snapshot
pub type Predicate<K> = fn(&K) -> bool;

/// One wait on one named resource
pub struct ReadinessWatch<K> {
    kind: &'static str,
    name: String,
    predicate: Predicate<K>,
    timeout: Duration,
}

impl<K> ReadinessWatch<K> {
    pub fn new(
        kind: &'static str,
        name: impl Into<String>,
        predicate: Predicate<K>,
        timeout: Duration,
    ) -> Self {
        Self {
            kind,
            name: name.into(),
            predicate,
            timeout,
        }
    }

    /// Subscribe and wait.
    ///
    /// `subscribe` is awaited inside the deadline. Returns
    /// [`WsError::Timeout`] if no applied object satisfies the predicate in
    /// time, or the subscription's error if it cannot be created, yields an
    /// error, or closes early.
    pub async fn wait<S>(&self, subscribe: S) -> Result<(), WsError>
    where
        S: Future<Output = Result<EventStream<K>, WsError>>,
    {
        let started = Instant::now();

        let outcome = tokio::time::timeout(self.timeout, async {
            let mut events = subscribe.await?;

            while let Some(event) = events.next().await {
                match event? {
                    ResourceEvent::Applied(object) => {
                        if (self.predicate)(&object) {
                            return Ok(());
                        }
                        tracing::trace!("{} {} not ready yet", self.kind, self.name);
                    }
                    ResourceEvent::Deleted(_) => {
                        tracing::debug!("{} {} was deleted while waiting", self.kind, self.name);
                    }
                    ResourceEvent::Bookmark => {}
                }
            }

            Err(WsError::from(ClusterError::Watch {
                kind: self.kind.to_string(),
                name: self.name.clone(),
                reason: "watch closed unexpectedly".to_string(),
            }))
        })
        .await;

        match outcome {
            Ok(Ok(())) => {
                tracing::debug!(
                    "{} {} ready after {:?}",
                    self.kind,
                    self.name,
                    started.elapsed()
                );
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(WsError::timeout(
                format!("{} {} to become ready", self.kind.to_lowercase(), self.name),
                started.elapsed(),
            )),
        }
    }
}

/// First container of the pod reports ready
pub fn pod_is_ready(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|status| status.container_statuses.as_ref())
        .and_then(|statuses| statuses.first())
        .map(|status| status.ready)
        .unwrap_or(false)
}

/// At least one replica exists, ready or not
pub fn has_replicas(set: &StatefulSet) -> bool {
    set.status
        .as_ref()
        .map(|status| status.replicas > 0)
        .unwrap_or(false)
}

/// At least one replica is ready
pub fn has_ready_replicas(set: &StatefulSet) -> bool {
    set.status
        .as_ref()
        .and_then(|status| status.ready_replicas)
        .map(|ready| ready > 0)
        .unwrap_or(false)
}

/// Every replica of a non-empty deployment is ready
pub fn deployment_is_ready(deployment: &Deployment) -> bool {
    let Some(status) = deployment.status.as_ref() else {
        return false;
    };
    let replicas = status.replicas.unwrap_or(0);
    replicas > 0 && status.ready_replicas.unwrap_or(0) == replicas
}

/// Wait for the pod's primary container to report ready
pub async fn wait_for_pod_ready<C: Cluster + ?Sized>(
    cluster: &C,
    namespace: &str,
    name: &str,
    timeout: Duration,
) -> Result<(), WsError> {
    ReadinessWatch::new("Pod", name, pod_is_ready, timeout)
        .wait(cluster.watch_pod(namespace, name))
        .await
}

/// Wait until the stateful set has created a replica
pub async fn wait_for_replica<C: Cluster + ?Sized>(
    cluster: &C,
    namespace: &str,
    name: &str,
    timeout: Duration,
) -> Result<(), WsError> {
    ReadinessWatch::new("StatefulSet", name, has_replicas, timeout)
        .wait(cluster.watch_stateful_set(namespace, name))
        .await
}

/// Wait until a replica of the stateful set is ready
pub async fn wait_for_replica_ready<C: Cluster + ?Sized>(
    cluster: &C,
    namespace: &str,
    name: &str,
    timeout: Duration,
) -> Result<(), WsError> {
    ReadinessWatch::new("StatefulSet", name, has_ready_replicas, timeout)
        .wait(cluster.watch_stateful_set(namespace, name))
        .await
}

/// Wait until every replica of the deployment is ready
pub async fn wait_for_deployment<C: Cluster + ?Sized>(
    cluster: &C,
    namespace: &str,
    name: &str,
    timeout: Duration,
) -> Result<(), WsError> {
    ReadinessWatch::new("Deployment", name, deployment_is_ready, timeout)
        .wait(cluster.watch_deployment(namespace, name))
        .await
}
