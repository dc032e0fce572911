//! Session state snapshots reported by the engine
//!
//! Field names follow the engine's JSON output. Everything is defaulted so
//! that omitted fields decode to zero values.

use serde::{Deserialize, Serialize};

/// Lifecycle status of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Status {
    #[default]
    Disconnected,
    HaltedOnRootEmptied,
    HaltedOnRootDeletion,
    HaltedOnRootTypeChange,
    ConnectingAlpha,
    ConnectingBeta,
    Watching,
    Scanning,
    WaitingForRescan,
    Reconciling,
    StagingAlpha,
    StagingBeta,
    Transitioning,
    Saving,
    #[serde(other)]
    Unknown,
}

impl Status {
    pub fn description(&self) -> &'static str {
        match self {
            Status::Disconnected => "Waiting to connect",
            Status::HaltedOnRootEmptied => "Halted due to root emptying",
            Status::HaltedOnRootDeletion => "Halted due to root deletion",
            Status::HaltedOnRootTypeChange => "Halted due to root type change",
            Status::ConnectingAlpha => "Connecting to alpha",
            Status::ConnectingBeta => "Connecting to beta",
            Status::Watching => "Watching for changes",
            Status::Scanning => "Scanning files",
            Status::WaitingForRescan => "Waiting 5 seconds for rescan",
            Status::Reconciling => "Reconciling changes",
            Status::StagingAlpha => "Staging files on alpha",
            Status::StagingBeta => "Staging files on beta",
            Status::Transitioning => "Applying changes",
            Status::Saving => "Saving archive",
            Status::Unknown => "Unknown",
        }
    }
}

/// Progress of an in-flight staging operation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StagingProgress {
    pub path: String,
    pub received_size: u64,
    pub expected_size: u64,
    pub received_files: u64,
    pub expected_files: u64,
    pub total_received_size: u64,
}

/// A scan or transition problem on one endpoint
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Problem {
    pub path: String,
    pub error: String,
}

/// State of one side of a session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EndpointState {
    pub connected: bool,
    pub files: u64,
    pub total_file_size: u64,
    pub scan_problems: Vec<Problem>,
    pub transition_problems: Vec<Problem>,
    pub staging_progress: Option<StagingProgress>,
}

impl EndpointState {
    pub fn has_problems(&self) -> bool {
        !self.scan_problems.is_empty() || !self.transition_problems.is_empty()
    }
}

/// One session as listed by the engine
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionState {
    pub identifier: String,
    pub name: String,
    pub paused: bool,
    pub status: Status,
    pub last_error: String,
    pub conflicts: Vec<serde_json::Value>,
    pub alpha: EndpointState,
    pub beta: EndpointState,
}
