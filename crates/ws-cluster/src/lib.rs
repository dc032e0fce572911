//! ws-cluster: Control-plane access for workspaces
//!
//! This crate provides:
//! - The [`Cluster`] trait consumed by the session orchestrator, with a
//!   `kube`-backed implementation
//! - [`ReadinessWatch`], a wait-until-predicate engine over resource watches
//! - [`TunnelManager`], local listeners forwarded into a workspace instance

pub mod cluster;
pub mod client;
pub mod readiness;
pub mod tunnel;

pub use cluster::{
    AsyncStream, Cluster, EventStream, ExecRequest, ExecSession, PortStream, ResourceEvent,
};
pub use client::KubeCluster;
pub use readiness::ReadinessWatch;
pub use tunnel::{PortPair, Tunnel, TunnelManager};
