//! Core error types for the workspace CLI

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type shared by every component
#[derive(Error, Debug)]
pub enum WsError {
    /// Malformed user input
    #[error("Invalid input: {0}")]
    Validation(String),

    /// A required remote object does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// A readiness or activation deadline elapsed
    #[error("Timeout occurred after {elapsed_secs} seconds while waiting for {operation}")]
    Timeout {
        operation: String,
        elapsed_secs: u64,
    },

    /// Control-plane failure
    #[error("Cluster error: {0}")]
    Cluster(#[from] ClusterError),

    /// Synchronization engine failure
    #[error("Sync engine error: {0}")]
    Sync(#[from] SyncError),

    /// User interrupt while a session was being established
    #[error("Interrupted")]
    Interrupted,

    /// An operation ran before the cluster connection was initialized
    #[error("Not connected to a cluster")]
    NotConnected,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl WsError {
    /// Build a timeout error from the elapsed wait
    pub fn timeout(operation: impl Into<String>, elapsed: std::time::Duration) -> Self {
        WsError::Timeout {
            operation: operation.into(),
            elapsed_secs: elapsed.as_secs(),
        }
    }
}

/// Control-plane errors
#[derive(Error, Debug)]
pub enum ClusterError {
    /// Request rejected or failed at the API server
    #[error("API request failed: {0}")]
    Api(String),

    /// Watch subscription could not be created or ended early
    #[error("Watch on {kind} {name} failed: {reason}")]
    Watch {
        kind: String,
        name: String,
        reason: String,
    },

    /// Port-forward stream failure
    #[error("Port forward failed: {0}")]
    PortForward(String),

    /// Remote exec stream failure
    #[error("Exec failed: {0}")]
    Exec(String),

    /// Client configuration could not be loaded
    #[error("Kubeconfig error: {0}")]
    Kubeconfig(String),
}

/// Synchronization engine errors
#[derive(Error, Debug)]
pub enum SyncError {
    /// Engine invocation failed
    #[error("{operation} failed: {message}")]
    Engine { operation: String, message: String },

    /// Engine output could not be decoded
    #[error("Failed to decode engine output: {0}")]
    Decode(String),

    /// The session disappeared from the engine registry
    #[error("Session {0} no longer exists")]
    SessionGone(String),

    /// The engine handle was shut down
    #[error("Sync engine has been shut down")]
    Shutdown,
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}
