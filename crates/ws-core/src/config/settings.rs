//! CLI configuration file layout

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::serde_utils::{duration_millis, duration_secs};
use crate::types::WORKSPACE_CONTAINER;

/// Top-level configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Development session defaults
    pub dev: DevConfig,
    /// File synchronization settings
    pub sync: SyncConfig,
    /// Local file locations
    pub paths: PathsConfig,
    /// Replica wait settings
    pub wait: WaitConfig,
}

/// Defaults for `workspace dev`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DevConfig {
    /// Local port mapped to the workspace SSH daemon
    pub ssh_port: u16,

    /// How long to wait for the instance's container to become ready
    #[serde(with = "duration_secs")]
    pub pod_ready_timeout: Duration,

    /// Interactive shell command
    pub shell: Vec<String>,

    /// Container to attach to
    pub container: String,
}

impl Default for DevConfig {
    fn default() -> Self {
        Self {
            ssh_port: 2222,
            pod_ready_timeout: Duration::from_secs(30),
            shell: vec!["bash".to_string(), "--login".to_string()],
            container: WORKSPACE_CONTAINER.to_string(),
        }
    }
}

/// Synchronization engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Path to the engine executable
    pub engine_path: PathBuf,

    /// Delay between state polls when the engine reports no change
    #[serde(with = "duration_millis")]
    pub poll_interval: Duration,

    /// Ignore patterns applied when none are given on the command line
    pub default_ignores: Vec<String>,

    /// Synchronization mode applied when none is given on the command line
    pub default_mode: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            engine_path: PathBuf::from("mutagen"),
            poll_interval: Duration::from_millis(500),
            default_ignores: vec![".mutagen".to_string(), ".git".to_string()],
            default_mode: "two-way-safe".to_string(),
        }
    }
}

/// Local file locations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// SSH client configuration file receiving trust entries
    pub ssh_config: PathBuf,

    /// Directory holding per-workspace private keys
    pub key_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            ssh_config: dirs::home_dir()
                .unwrap_or_default()
                .join(".ssh")
                .join("config"),
            key_dir: super::default_config_dir(),
        }
    }
}

/// Settings for `workspace wait`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WaitConfig {
    #[serde(with = "duration_secs")]
    pub timeout: Duration,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(200),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config: CliConfig = toml::from_str(
            r#"
            [dev]
            ssh_port = 2400

            [sync]
            poll_interval = 250
            "#,
        )
        .unwrap();

        assert_eq!(config.dev.ssh_port, 2400);
        assert_eq!(config.dev.pod_ready_timeout, Duration::from_secs(30));
        assert_eq!(config.dev.shell, vec!["bash", "--login"]);
        assert_eq!(config.sync.poll_interval, Duration::from_millis(250));
        assert_eq!(config.sync.default_ignores, vec![".mutagen", ".git"]);
        assert_eq!(config.wait.timeout, Duration::from_secs(200));
    }
}
