//! Engine adapter driving the `mutagen` command line
//!
//! The CLI has no incremental state endpoint, so [`MutagenEngine::list`]
//! emulates one: it re-lists every `poll_interval`, fingerprints the output
//! and bumps a per-selection version whenever the fingerprint changes.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::process::Command;

use ws_core::{SyncError, WsError};

use crate::engine::{Selection, SessionSpec, SyncEngine};
use crate::state::SessionState;

/// Go template that makes `sync list` print JSON
const JSON_TEMPLATE: &str = "{{ json . }}";

/// Last listing seen for one selection
#[derive(Debug, Default)]
struct Observed {
    version: u64,
    fingerprint: String,
}

/// `mutagen` CLI adapter
#[derive(Debug)]
pub struct MutagenEngine {
    program: PathBuf,
    poll_interval: Duration,
    observed: Mutex<HashMap<String, Observed>>,
    closed: AtomicBool,
}

impl MutagenEngine {
    pub fn new(program: impl Into<PathBuf>, poll_interval: Duration) -> Self {
        Self {
            program: program.into(),
            poll_interval,
            observed: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> Result<(), WsError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SyncError::Shutdown.into());
        }
        Ok(())
    }

    /// Run one CLI invocation and return its stdout
    async fn run(&self, operation: &str, args: &[String]) -> Result<Vec<u8>, WsError> {
        self.ensure_open()?;

        tracing::trace!("{} {}", self.program.display(), args.join(" "));
        let output = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| SyncError::Engine {
                operation: operation.to_string(),
                message: format!("failed to run {}: {}", self.program.display(), e),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SyncError::Engine {
                operation: operation.to_string(),
                message: stderr.trim().to_string(),
            }
            .into());
        }

        Ok(output.stdout)
    }

    /// Record a listing and return the selection's current version
    fn observe(&self, key: &str, fingerprint: String) -> u64 {
        let mut observed = match self.observed.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let entry = observed.entry(key.to_string()).or_default();
        if entry.fingerprint != fingerprint || entry.version == 0 {
            entry.version += 1;
            entry.fingerprint = fingerprint;
        }
        entry.version
    }
}

fn selection_args(selection: &Selection) -> Vec<String> {
    let mut args = Vec::new();
    if let Some(selector) = &selection.label_selector {
        args.push("--label-selector".to_string());
        args.push(selector.clone());
    }
    args.extend(selection.specifications.iter().cloned());
    args
}

fn selection_key(selection: &Selection) -> String {
    format!(
        "{}|{}",
        selection.specifications.join(","),
        selection.label_selector.as_deref().unwrap_or("")
    )
}

fn create_args(spec: &SessionSpec) -> Vec<String> {
    let mut args = vec![
        "sync".to_string(),
        "create".to_string(),
        "--name".to_string(),
        spec.name.clone(),
    ];
    for (key, value) in &spec.labels {
        args.push("--label".to_string());
        args.push(format!("{}={}", key, value));
    }
    for ignore in &spec.ignores {
        args.push("--ignore".to_string());
        args.push(ignore.clone());
    }
    if let Some(mode) = spec.mode.as_engine_name() {
        args.push("--sync-mode".to_string());
        args.push(mode.to_string());
    }
    if !spec.watch {
        args.push("--watch-mode".to_string());
        args.push("no-watch".to_string());
    }
    args.push(spec.source.clone());
    args.push(spec.target.url());
    args
}

/// Session identifier from `Created session <id>`
fn parse_created(stdout: &str) -> Option<String> {
    stdout
        .lines()
        .find(|line| line.contains("Created session"))
        .and_then(|line| line.split_whitespace().last())
        .map(str::to_string)
}

fn parse_listing(stdout: &[u8]) -> Result<Vec<SessionState>, WsError> {
    if stdout.iter().all(u8::is_ascii_whitespace) {
        return Ok(Vec::new());
    }
    let states: Option<Vec<SessionState>> =
        serde_json::from_slice(stdout).map_err(|e| SyncError::Decode(e.to_string()))?;
    Ok(states.unwrap_or_default())
}

#[async_trait]
impl SyncEngine for MutagenEngine {
    async fn create(&self, spec: &SessionSpec) -> Result<String, WsError> {
        let stdout = self.run("create", &create_args(spec)).await?;
        let stdout = String::from_utf8_lossy(&stdout);

        let identifier = parse_created(&stdout).unwrap_or_else(|| spec.name.clone());
        tracing::debug!("Created sync session {} ({})", spec.name, identifier);
        Ok(identifier)
    }

    async fn list(
        &self,
        selection: &Selection,
        cursor: u64,
    ) -> Result<(u64, Vec<SessionState>), WsError> {
        let mut args = vec![
            "sync".to_string(),
            "list".to_string(),
            "--template".to_string(),
            JSON_TEMPLATE.to_string(),
        ];
        args.extend(selection_args(selection));
        let key = selection_key(selection);

        loop {
            let stdout = self.run("list", &args).await?;
            let states = parse_listing(&stdout)?;
            let fingerprint = hex::encode(Sha256::digest(&stdout));

            let version = self.observe(&key, fingerprint);
            if version > cursor {
                return Ok((version, states));
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn flush(&self, selection: &Selection) -> Result<(), WsError> {
        let mut args = vec!["sync".to_string(), "flush".to_string()];
        args.extend(selection_args(selection));
        self.run("flush", &args).await.map(|_| ())
    }

    async fn terminate(&self, selection: &Selection) -> Result<(), WsError> {
        let mut args = vec!["sync".to_string(), "terminate".to_string()];
        args.extend(selection_args(selection));
        self.run("terminate", &args).await.map(|_| ())
    }

    async fn shutdown(&self) -> Result<(), WsError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
