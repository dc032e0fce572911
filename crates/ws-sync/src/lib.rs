//! ws-sync: File-synchronization sessions for workspaces
//!
//! The transfer protocol lives in an external engine reached through the
//! [`SyncEngine`] trait. [`MutagenEngine`] drives the `mutagen` CLI;
//! [`SyncSessionController`] owns one session from creation to teardown.

pub mod controller;
pub mod engine;
pub mod mode;
pub mod mutagen;
pub mod state;
pub mod status;
pub mod target;

pub use controller::{LineSink, SyncOptions, SyncSessionController, ACTIVATION_TIMEOUT};
pub use engine::{Selection, SessionSpec, SyncEngine};
pub use mode::SyncMode;
pub use mutagen::MutagenEngine;
pub use state::{EndpointState, SessionState, StagingProgress, Status};
pub use status::status_line;
pub use target::{FolderSpec, SyncTarget};
