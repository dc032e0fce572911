//! Synchronization endpoints

use std::fmt;

use ws_core::WsError;

/// Remote side of a session, reached over SSH
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncTarget {
    pub hostname: String,
    pub port: u16,
    pub folder: String,
    pub username: String,
}

impl SyncTarget {
    /// Engine URL, `user@host:port:folder`
    pub fn url(&self) -> String {
        format!(
            "{}@{}:{}:{}",
            self.username, self.hostname, self.port, self.folder
        )
    }
}

impl fmt::Display for SyncTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url())
    }
}

/// A `source:target` folder pair as given on the command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderSpec {
    /// Local folder
    pub source: String,
    /// Folder inside the workspace
    pub target: String,
}

impl FolderSpec {
    /// Split on the first `:`; both halves must be non-empty
    pub fn parse(spec: &str) -> Result<Self, WsError> {
        let invalid = || WsError::Validation(format!("invalid sync folder '{}', expected SRC:DST", spec));

        let (source, target) = spec.split_once(':').ok_or_else(invalid)?;
        if source.is_empty() || target.is_empty() {
            return Err(invalid());
        }

        Ok(Self {
            source: source.to_string(),
            target: target.to_string(),
        })
    }
}
