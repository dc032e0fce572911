//! Config command implementations

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::output::{print_error, print_info, print_success, print_warning};
use ws_core::config::{self, CliConfig};

fn resolve(config_path: Option<&Path>) -> PathBuf {
    config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(config::default_config_path)
}

/// Print the configuration file, or the effective defaults when absent
pub fn config_show(config_path: Option<&Path>) -> Result<()> {
    let path = resolve(config_path);

    if !path.exists() {
        print_warning(&format!("No configuration file found at {}", path.display()));
        print_info("Run 'workspace config init' to create one. Effective defaults:");
        println!();
        println!("{}", toml::to_string_pretty(&CliConfig::default())?);
        return Ok(());
    }

    print_info(&format!("Configuration file: {}", path.display()));
    println!();

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    println!("{}", content);

    Ok(())
}

/// Print the path of the configuration file in use
pub fn config_path(config_path: Option<&Path>) {
    println!("{}", resolve(config_path).display());
}

/// Write a configuration file holding every default
pub fn config_init(config_path: Option<&Path>, force: bool) -> Result<()> {
    let path = resolve(config_path);

    if path.exists() && !force {
        print_error(&format!("Config file already exists: {}", path.display()));
        print_info("Use --force to overwrite");
        return Ok(());
    }

    config::save_config(&path, &CliConfig::default())
        .with_context(|| format!("Failed to write config file: {}", path.display()))?;

    print_success(&format!("Created configuration file: {}", path.display()));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_init_writes_loadable_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        config_init(Some(&path), false).unwrap();
        let loaded: CliConfig = config::load_config(&path).unwrap();
        assert_eq!(loaded.dev.ssh_port, 2222);
        assert_eq!(loaded.sync.default_ignores, vec![".mutagen", ".git"]);
    }

    #[test]
    fn test_init_keeps_existing_without_force() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[dev]\nssh_port = 2400\n").unwrap();

        config_init(Some(&path), false).unwrap();
        assert!(std::fs::read_to_string(&path).unwrap().contains("2400"));

        config_init(Some(&path), true).unwrap();
        let loaded: CliConfig = config::load_config(&path).unwrap();
        assert_eq!(loaded.dev.ssh_port, 2222);
    }
}
