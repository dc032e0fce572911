//! Synchronization engine contract

use std::collections::BTreeMap;

use async_trait::async_trait;

use ws_core::WsError;

use crate::mode::SyncMode;
use crate::state::SessionState;
use crate::target::SyncTarget;

/// Which sessions an engine call applies to
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    /// Session names or identifiers
    pub specifications: Vec<String>,
    pub label_selector: Option<String>,
}

impl Selection {
    /// Select a single session by name or identifier
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            specifications: vec![name.into()],
            label_selector: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.specifications.is_empty() && self.label_selector.is_none()
    }
}

/// Everything needed to register a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSpec {
    pub name: String,
    /// Local folder
    pub source: String,
    pub target: SyncTarget,
    pub ignores: Vec<String>,
    pub labels: BTreeMap<String, String>,
    /// Keep watching for changes after the initial cycle
    pub watch: bool,
    pub mode: SyncMode,
}

/// External synchronization engine
#[async_trait]
pub trait SyncEngine: Send + Sync + 'static {
    /// Register a session and return its identifier
    async fn create(&self, spec: &SessionSpec) -> Result<String, WsError>;

    /// Long-poll the session registry.
    ///
    /// Blocks until the state version is newer than `cursor`, then returns
    /// the new version with the selected sessions. A cursor of 0 returns
    /// immediately.
    async fn list(
        &self,
        selection: &Selection,
        cursor: u64,
    ) -> Result<(u64, Vec<SessionState>), WsError>;

    /// Run one full synchronization cycle
    async fn flush(&self, selection: &Selection) -> Result<(), WsError>;

    async fn terminate(&self, selection: &Selection) -> Result<(), WsError>;

    /// Release the engine handle. Later calls fail with a shutdown error.
    async fn shutdown(&self) -> Result<(), WsError>;
}
