//! SSH client trust entries
//!
//! Each workspace gets one block in the user's SSH client configuration,
//! fenced by start/end marker comments derived from its (name, namespace).
//! The store keeps at most one block per identity as long as callers run
//! [`ConfigEntryStore::remove`] before [`ConfigEntryStore::upsert`].
//!
//! Both operations rewrite or append to a single shared file without any
//! locking, so only one writer may touch the file at a time.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use regex::Regex;

use crate::error::ConfigError;
use crate::types::{host_alias, WORKSPACE_USER};

/// A rendered SSH host entry for one workspace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustEntry {
    pub name: String,
    pub namespace: String,
    /// Local end of the tunnel to the workspace SSH daemon
    pub port: u16,
    /// Private key presented to the workspace
    pub key_path: PathBuf,
}

impl TrustEntry {
    pub fn new(
        name: impl Into<String>,
        namespace: impl Into<String>,
        port: u16,
        key_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            port,
            key_path: key_path.into(),
        }
    }

    /// Render the block, markers included, with a trailing newline
    pub fn render(&self) -> String {
        let alias = host_alias(&self.name, &self.namespace);
        format!(
            "{start}\n\
             Host {alias}\n  \
             HostName localhost\n  \
             LogLevel error\n  \
             Port {port}\n  \
             IdentityFile \"{key}\"\n  \
             StrictHostKeyChecking no\n  \
             UserKnownHostsFile /dev/null\n  \
             User {user}\n\
             {end}\n",
            start = start_marker(&self.name, &self.namespace),
            end = end_marker(&self.name, &self.namespace),
            alias = alias,
            port = self.port,
            key = self.key_path.display(),
            user = WORKSPACE_USER,
        )
    }
}

fn start_marker(name: &str, namespace: &str) -> String {
    format!("# workspace start {}", host_alias(name, namespace))
}

fn end_marker(name: &str, namespace: &str) -> String {
    format!("# workspace end {}", host_alias(name, namespace))
}

/// Non-greedy match of one fenced block plus its line break
fn entry_pattern(name: &str, namespace: &str) -> Result<Regex, ConfigError> {
    let expression = format!(
        r"(?s){}.*?{}\n?",
        regex::escape(&start_marker(name, namespace)),
        regex::escape(&end_marker(name, namespace)),
    );
    Regex::new(&expression).map_err(|e| ConfigError::Invalid(format!("Bad entry pattern: {}", e)))
}

/// Maintains workspace blocks inside one SSH client configuration file
#[derive(Debug, Clone)]
pub struct ConfigEntryStore {
    path: PathBuf,
}

impl ConfigEntryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Strip every block for (name, namespace) and rewrite the file.
    ///
    /// Returns the number of blocks removed. A missing file is reported as
    /// [`ConfigError::NotFound`]; callers that only want the entry gone
    /// should treat that as nothing to do.
    pub fn remove(&self, name: &str, namespace: &str) -> Result<usize, ConfigError> {
        let content = self.read()?;
        let pattern = entry_pattern(name, namespace)?;

        let removed = pattern.find_iter(&content).count();
        if removed == 0 {
            return Ok(0);
        }

        let stripped = pattern.replace_all(&content, "");
        fs::write(&self.path, stripped.as_bytes()).map_err(|e| {
            ConfigError::Invalid(format!("Failed to write {:?}: {}", self.path, e))
        })?;

        tracing::debug!(
            "Removed {} SSH entr{} for {}",
            removed,
            if removed == 1 { "y" } else { "ies" },
            host_alias(name, namespace)
        );
        Ok(removed)
    }

    /// Append a freshly rendered block.
    ///
    /// Creates the file with owner-only permissions when it does not exist.
    /// Does not look for an existing block; see [`ConfigEntryStore::remove`].
    pub fn upsert(&self, entry: &TrustEntry) -> Result<(), ConfigError> {
        self.ensure_parent()?;

        let needs_separator = match fs::read(&self.path) {
            Ok(existing) => existing.last().is_some_and(|b| *b != b'\n'),
            Err(e) if e.kind() == ErrorKind::NotFound => false,
            Err(e) => {
                return Err(ConfigError::Invalid(format!(
                    "Failed to read {:?}: {}",
                    self.path, e
                )))
            }
        };

        let mut options = OpenOptions::new();
        options.create(true).append(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let mut file = options
            .open(&self.path)
            .map_err(|e| ConfigError::Invalid(format!("Failed to open {:?}: {}", self.path, e)))?;

        let mut block = String::new();
        if needs_separator {
            block.push('\n');
        }
        block.push_str(&entry.render());

        file.write_all(block.as_bytes())
            .map_err(|e| ConfigError::Invalid(format!("Failed to write {:?}: {}", self.path, e)))?;

        tracing::debug!(
            "Added SSH entry for {} -> localhost:{}",
            host_alias(&entry.name, &entry.namespace),
            entry.port
        );
        Ok(())
    }

    /// Number of blocks currently present for (name, namespace)
    pub fn count(&self, name: &str, namespace: &str) -> Result<usize, ConfigError> {
        let content = self.read()?;
        Ok(entry_pattern(name, namespace)?.find_iter(&content).count())
    }

    fn read(&self) -> Result<String, ConfigError> {
        fs::read_to_string(&self.path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => ConfigError::NotFound(self.path.clone()),
            _ => ConfigError::Invalid(format!("Failed to read {:?}: {}", self.path, e)),
        })
    }

    fn ensure_parent(&self) -> Result<(), ConfigError> {
        let Some(parent) = self.path.parent() else {
            return Ok(());
        };
        if parent.as_os_str().is_empty() || parent.exists() {
            return Ok(());
        }

        fs::create_dir_all(parent)
            .map_err(|e| ConfigError::Invalid(format!("Failed to create {:?}: {}", parent, e)))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700)).map_err(|e| {
                ConfigError::Invalid(format!("Failed to restrict {:?}: {}", parent, e))
            })?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry(name: &str, namespace: &str, port: u16) -> TrustEntry {
        TrustEntry::new(name, namespace, port, "/keys/id_workspace_ecdsa")
    }

    #[test]
    fn test_render_block() {
        let block = entry("api", "team", 2222).render();
        assert!(block.starts_with("# workspace start api.team.workspace\nHost api.team.workspace\n"));
        assert!(block.contains("  HostName localhost\n"));
        assert!(block.contains("  Port 2222\n"));
        assert!(block.contains("  IdentityFile \"/keys/id_workspace_ecdsa\"\n"));
        assert!(block.contains("  User workspace\n"));
        assert!(block.ends_with("# workspace end api.team.workspace\n"));
    }

    #[test]
    fn test_remove_missing_file_is_not_found() {
        let dir = TempDir::new().unwrap();
        let store = ConfigEntryStore::new(dir.path().join("config"));
        assert!(matches!(
            store.remove("api", "team"),
            Err(ConfigError::NotFound(_))
        ));
    }

    #[test]
    fn test_upsert_creates_file_and_parent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".ssh").join("config");
        let store = ConfigEntryStore::new(&path);

        store.upsert(&entry("api", "team", 2222)).unwrap();
        assert_eq!(store.count("api", "team").unwrap(), 1);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn test_remove_then_upsert_twice_leaves_one_block() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config");
        fs::write(&path, "Host github.com\n  User git\n").unwrap();
        let store = ConfigEntryStore::new(&path);

        for port in [2222, 2300] {
            store.remove("api", "team").unwrap();
            store.upsert(&entry("api", "team", port)).unwrap();
        }

        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(store.count("api", "team").unwrap(), 1);
        assert!(content.starts_with("Host github.com\n  User git\n"));
        assert!(content.contains("Port 2300"));
        assert!(!content.contains("Port 2222"));
    }

    #[test]
    fn test_remove_leaves_other_workspaces() {
        let dir = TempDir::new().unwrap();
        let store = ConfigEntryStore::new(dir.path().join("config"));

        store.upsert(&entry("api", "team", 2222)).unwrap();
        store.upsert(&entry("web", "team", 2223)).unwrap();
        store.upsert(&entry("api", "other", 2224)).unwrap();

        assert_eq!(store.remove("api", "team").unwrap(), 1);
        assert_eq!(store.count("api", "team").unwrap(), 0);
        assert_eq!(store.count("web", "team").unwrap(), 1);
        assert_eq!(store.count("api", "other").unwrap(), 1);
    }

    #[test]
    fn test_remove_strips_accumulated_duplicates() {
        let dir = TempDir::new().unwrap();
        let store = ConfigEntryStore::new(dir.path().join("config"));

        store.upsert(&entry("api", "team", 2222)).unwrap();
        store.upsert(&entry("web", "team", 2223)).unwrap();
        store.upsert(&entry("api", "team", 2222)).unwrap();
        assert_eq!(store.count("api", "team").unwrap(), 2);

        assert_eq!(store.remove("api", "team").unwrap(), 2);
        assert_eq!(store.count("web", "team").unwrap(), 1);
    }

    #[test]
    fn test_upsert_separates_from_unterminated_line() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config");
        fs::write(&path, "Host example\n  User me").unwrap();
        let store = ConfigEntryStore::new(&path);

        store.upsert(&entry("api", "team", 2222)).unwrap();
        let content = fs::read_to_string(&path).unwrap();
        assert!(content.contains("  User me\n# workspace start api.team.workspace\n"));
    }

    #[test]
    fn test_names_are_matched_literally() {
        let dir = TempDir::new().unwrap();
        let store = ConfigEntryStore::new(dir.path().join("config"));

        store.upsert(&entry("a.b", "team", 2222)).unwrap();
        store.upsert(&entry("aXb", "team", 2223)).unwrap();

        assert_eq!(store.remove("a.b", "team").unwrap(), 1);
        assert_eq!(store.count("aXb", "team").unwrap(), 1);
    }
}
