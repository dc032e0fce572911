//! ws-cli: Command-line interface for remote development workspaces
//!
//! Provides the `workspace` binary: live development sessions, remote
//! commands, replica waits and configuration management.

pub mod commands;
pub mod orchestrator;
pub mod output;
pub mod terminal;

pub use orchestrator::{DevOptions, DevSessionOrchestrator};
