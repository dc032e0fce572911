//! Core domain types

use serde::{Deserialize, Serialize};
use std::fmt;

/// Port the workspace SSH daemon listens on inside the instance
pub const WORKSPACE_SSH_PORT: u16 = 2222;

/// Remote user for SSH and file synchronization
pub const WORKSPACE_USER: &str = "workspace";

/// Name of the primary container in a workspace instance
pub const WORKSPACE_CONTAINER: &str = "workspace";

/// Label carrying the workspace name on its instances
pub const WORKSPACE_LABEL: &str = "workspace-name";

/// A running instance (pod) of a workspace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceRef {
    /// Pod name
    pub name: String,
    /// Pod namespace
    pub namespace: String,
    /// Whether the primary container reported ready when resolved
    pub ready: bool,
}

impl fmt::Display for InstanceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Identity of a workspace together with its resolved instance.
///
/// Resolved once per command. If the instance restarts the handle goes
/// stale; nothing refreshes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceHandle {
    /// Workspace name
    pub name: String,
    /// Namespace (project)
    pub namespace: String,
    /// Running instance
    pub instance: InstanceRef,
}

impl WorkspaceHandle {
    /// Create a handle for a resolved instance
    pub fn new(name: impl Into<String>, namespace: impl Into<String>, instance: InstanceRef) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            instance,
        }
    }

    /// SSH host alias for this workspace
    pub fn host_alias(&self) -> String {
        host_alias(&self.name, &self.namespace)
    }
}

/// SSH host alias for a (name, namespace) pair
pub fn host_alias(name: &str, namespace: &str) -> String {
    format!("{}.{}.workspace", name, namespace)
}

/// Terminal dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalSize {
    pub cols: u16,
    pub rows: u16,
}

impl TerminalSize {
    pub fn new(cols: u16, rows: u16) -> Self {
        Self { cols, rows }
    }
}

impl Default for TerminalSize {
    fn default() -> Self {
        Self { cols: 80, rows: 24 }
    }
}
