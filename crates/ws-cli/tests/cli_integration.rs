//! CLI integration tests
//!
//! Tests the workspace CLI using assert_cmd. Nothing here needs a cluster.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn workspace() -> Command {
    Command::cargo_bin("workspace")
        .expect("Failed to locate workspace binary - ensure it's built before running tests")
}

#[test]
fn test_cli_help() {
    workspace()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("workspace"))
        .stdout(predicate::str::contains("Remote development workspaces"));
}

#[test]
fn test_cli_version() {
    workspace()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("workspace"));
}

#[test]
fn test_cli_dev_help() {
    workspace()
        .args(["dev", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--sync-folder"))
        .stdout(predicate::str::contains("--disable-terminal"));
}

#[test]
fn test_cli_dev_missing_name() {
    workspace().arg("dev").assert().failure();
}

#[test]
fn test_cli_dev_bad_label() {
    workspace()
        .args(["dev", "api", "--sync-label", "novalue"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("K=V"));
}

#[test]
fn test_cli_dev_failure_exits_nonzero() {
    let dir = TempDir::new().unwrap();
    workspace()
        .args(["--kube-config"])
        .arg(dir.path().join("missing-kubeconfig"))
        .args(["-c"])
        .arg(dir.path().join("config.toml"))
        .args(["dev", "api", "--sync-folder", "abc"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::is_empty().not());
}

#[test]
fn test_cli_dev_rejects_bad_folder_before_connecting() {
    let dir = TempDir::new().unwrap();
    workspace()
        .args(["--kube-config"])
        .arg(dir.path().join("missing-kubeconfig"))
        .args(["-c"])
        .arg(dir.path().join("config.toml"))
        .args(["dev", "api", "--sync-folder", "abc"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("invalid sync folder 'abc'"))
        .stderr(predicate::str::contains("Failed to connect").not());
}

#[test]
fn test_cli_exec_requires_command() {
    workspace().args(["exec", "api"]).assert().failure();
}

#[test]
fn test_cli_config_path() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    workspace()
        .arg("-c")
        .arg(&path)
        .args(["config", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains("config.toml"));
}

#[test]
fn test_cli_config_init_then_show() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");

    workspace()
        .arg("-c")
        .arg(&path)
        .args(["config", "init"])
        .assert()
        .success();
    assert!(path.exists());

    workspace()
        .arg("-c")
        .arg(&path)
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("ssh_port = 2222"));
}

#[test]
fn test_cli_unknown_command() {
    workspace()
        .arg("nonexistent-command")
        .assert()
        .failure()
        .stderr(predicate::str::contains("unrecognized subcommand"));
}
