//! ws-core: Core types, errors and local state for the workspace CLI
//!
//! This crate provides the error taxonomy, configuration structures and
//! the local SSH trust material shared by the cluster, sync and CLI crates.

pub mod config;
pub mod error;
pub mod keys;
pub mod ssh_config;
pub mod types;

pub use error::{ClusterError, ConfigError, SyncError, WsError};
pub use types::{InstanceRef, TerminalSize, WorkspaceHandle};
