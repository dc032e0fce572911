//! Lifecycle of one synchronization session
//!
//! ```text
//! create ──► wait_active ──┬─ watch ──► monitor task (until stop)
//!                          └─ no watch ─► single flush
//! ```
//!
//! [`SyncSessionController::stop`] is the only teardown path. It cancels and
//! joins the monitor, terminates the remote session and shuts the engine
//! handle down, logging rather than returning any failure.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use ws_core::{SyncError, WsError};

use crate::engine::{Selection, SessionSpec, SyncEngine};
use crate::mode::SyncMode;
use crate::state::Status;
use crate::status::status_line;
use crate::target::SyncTarget;

/// Deadline for a new session to reach the watching state
pub const ACTIVATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Upper bound on waiting for the monitor task during teardown
const MONITOR_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Prefix of generated session names
const SESSION_NAME_PREFIX: &str = "workspace";

/// Receives rendered monitor lines
pub type LineSink = Arc<dyn Fn(&str) + Send + Sync>;

/// Per-session settings besides the endpoints
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncOptions {
    pub ignores: Vec<String>,
    pub labels: BTreeMap<String, String>,
    pub watch: bool,
    pub mode: SyncMode,
}

/// Owns one session against a [`SyncEngine`]
pub struct SyncSessionController<E: SyncEngine + ?Sized> {
    engine: Arc<E>,
    session: Option<String>,
    watch: bool,
    cancel: CancellationToken,
    monitor: Option<JoinHandle<()>>,
    sink: LineSink,
    color: bool,
    activation_timeout: Duration,
    stopped: bool,
}

impl<E: SyncEngine + ?Sized> SyncSessionController<E> {
    /// Controller whose background work ends when `parent` is cancelled
    pub fn new(engine: Arc<E>, parent: &CancellationToken) -> Self {
        Self {
            engine,
            session: None,
            watch: false,
            cancel: parent.child_token(),
            monitor: None,
            sink: Arc::new(|line: &str| println!("{}", line)),
            color: true,
            activation_timeout: ACTIVATION_TIMEOUT,
            stopped: false,
        }
    }

    /// Send monitor lines somewhere other than stdout
    pub fn with_sink(mut self, sink: LineSink, color: bool) -> Self {
        self.sink = sink;
        self.color = color;
        self
    }

    pub fn with_activation_timeout(mut self, timeout: Duration) -> Self {
        self.activation_timeout = timeout;
        self
    }

    /// Identifier of the created session
    pub fn session_id(&self) -> Option<&str> {
        self.session.as_deref()
    }

    pub fn is_monitoring(&self) -> bool {
        self.monitor
            .as_ref()
            .map(|task| !task.is_finished())
            .unwrap_or(false)
    }

    /// Register a session under a freshly generated name
    pub async fn create(
        &mut self,
        source: &str,
        target: SyncTarget,
        options: SyncOptions,
    ) -> Result<(), WsError> {
        if self.stopped {
            return Err(SyncError::Shutdown.into());
        }

        let spec = SessionSpec {
            name: format!("{}-{}", SESSION_NAME_PREFIX, uuid::Uuid::new_v4()),
            source: source.to_string(),
            target,
            ignores: options.ignores,
            labels: options.labels,
            watch: options.watch,
            mode: options.mode,
        };

        tracing::debug!(
            "Creating sync session {}: {} -> {} ({})",
            spec.name,
            spec.source,
            spec.target,
            spec.mode
        );

        let id = self.engine.create(&spec).await?;
        self.session = Some(id);
        self.watch = spec.watch;
        Ok(())
    }

    /// Long-poll until the session is watching.
    ///
    /// Fails with [`WsError::Timeout`] after the activation timeout and with
    /// [`WsError::Interrupted`] once the controller is cancelled.
    pub async fn wait_active(&self) -> Result<(), WsError> {
        let id = self
            .session
            .as_deref()
            .ok_or_else(|| SyncError::SessionGone("no session was created".to_string()))?;
        let selection = Selection::named(id);
        let started = Instant::now();

        let poll = async {
            let mut cursor = 0;
            loop {
                if self.cancel.is_cancelled() {
                    return Err(WsError::Interrupted);
                }

                let (next, states) = tokio::select! {
                    _ = self.cancel.cancelled() => return Err(WsError::Interrupted),
                    listed = self.engine.list(&selection, cursor) => listed?,
                };
                cursor = next;

                let state = states
                    .into_iter()
                    .next()
                    .ok_or_else(|| SyncError::SessionGone(id.to_string()))?;

                if state.status == Status::Watching {
                    return Ok(());
                }
                tracing::debug!("Sync session {}: {}", id, state.status.description());
            }
        };

        match tokio::time::timeout(self.activation_timeout, poll).await {
            Ok(result) => result,
            Err(_) => Err(WsError::timeout(
                format!("sync session {} to become active", id),
                started.elapsed(),
            )),
        }
    }

    /// Create the session and bring it up.
    ///
    /// With `watch` the monitor task is started; without it exactly one
    /// flush is issued and no background task exists afterwards.
    pub async fn start(
        &mut self,
        source: &str,
        target: SyncTarget,
        options: SyncOptions,
    ) -> Result<(), WsError> {
        self.create(source, target, options).await?;
        self.wait_active().await?;

        if self.watch {
            self.spawn_monitor();
            return Ok(());
        }

        if let Some(id) = self.session.as_deref() {
            self.engine.flush(&Selection::named(id)).await?;
            tracing::debug!("Flushed sync session {}", id);
        }
        Ok(())
    }

    /// Start rendering status lines in the background
    pub fn spawn_monitor(&mut self) {
        let Some(id) = self.session.clone() else {
            return;
        };
        if self.monitor.is_some() {
            return;
        }

        self.monitor = Some(tokio::spawn(run_monitor(
            self.engine.clone(),
            Selection::named(id),
            self.cancel.clone(),
            self.sink.clone(),
            self.color,
        )));
    }

    /// Tear down. Safe to call any number of times, with or without a session.
    pub async fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        self.cancel.cancel();

        if let Some(mut monitor) = self.monitor.take() {
            if tokio::time::timeout(MONITOR_JOIN_TIMEOUT, &mut monitor)
                .await
                .is_err()
            {
                tracing::warn!("Sync monitor did not stop in time, aborting it");
                monitor.abort();
            }
        }

        if let Some(id) = self.session.take() {
            match self.engine.terminate(&Selection::named(&id)).await {
                Ok(()) => tracing::debug!("Terminated sync session {}", id),
                Err(e) => tracing::warn!("Failed to terminate sync session {}: {}", id, e),
            }
        }

        if let Err(e) = self.engine.shutdown().await {
            tracing::warn!("Failed to shut down sync engine: {}", e);
        }
    }
}

impl<E: SyncEngine + ?Sized> Drop for SyncSessionController<E> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run_monitor<E: SyncEngine + ?Sized>(
    engine: Arc<E>,
    selection: Selection,
    cancel: CancellationToken,
    sink: LineSink,
    color: bool,
) {
    let mut cursor = 0;

    loop {
        if cancel.is_cancelled() {
            break;
        }

        let listed = tokio::select! {
            _ = cancel.cancelled() => break,
            listed = engine.list(&selection, cursor) => listed,
        };

        match listed {
            Ok((next, states)) => {
                cursor = next;
                match states.first() {
                    Some(state) => sink(&status_line(state, color)),
                    None => {
                        sink("Sync session no longer exists");
                        break;
                    }
                }
            }
            Err(e) => {
                sink(&e.to_string());
                break;
            }
        }
    }

    tracing::debug!("Sync monitor stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::SessionState;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Engine that reports `Scanning` until `activates_after` lists, then
    /// `Watching`, and publishes a new version every 10ms
    struct FakeEngine {
        activates_after: u64,
        lists: AtomicU64,
        creates: AtomicUsize,
        flushes: AtomicUsize,
        terminates: AtomicUsize,
        shutdowns: AtomicUsize,
        fail_terminate: bool,
    }

    impl FakeEngine {
        fn new(activates_after: u64) -> Arc<Self> {
            Self::build(activates_after, false)
        }

        fn failing_terminate() -> Arc<Self> {
            Self::build(0, true)
        }

        fn build(activates_after: u64, fail_terminate: bool) -> Arc<Self> {
            Arc::new(Self {
                activates_after,
                lists: AtomicU64::new(0),
                creates: AtomicUsize::new(0),
                flushes: AtomicUsize::new(0),
                terminates: AtomicUsize::new(0),
                shutdowns: AtomicUsize::new(0),
                fail_terminate,
            })
        }
    }

    #[async_trait]
    impl SyncEngine for FakeEngine {
        async fn create(&self, spec: &SessionSpec) -> Result<String, WsError> {
            assert!(spec.name.starts_with("workspace-"));
            self.creates.fetch_add(1, Ordering::SeqCst);
            Ok(format!("sync_{}", spec.name))
        }

        async fn list(
            &self,
            _selection: &Selection,
            cursor: u64,
        ) -> Result<(u64, Vec<SessionState>), WsError> {
            if cursor > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            let seen = self.lists.fetch_add(1, Ordering::SeqCst);
            let status = if seen >= self.activates_after {
                Status::Watching
            } else {
                Status::Scanning
            };
            Ok((
                cursor + 1,
                vec![SessionState {
                    status,
                    ..Default::default()
                }],
            ))
        }

        async fn flush(&self, _selection: &Selection) -> Result<(), WsError> {
            self.flushes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn terminate(&self, _selection: &Selection) -> Result<(), WsError> {
            self.terminates.fetch_add(1, Ordering::SeqCst);
            if self.fail_terminate {
                return Err(SyncError::SessionGone("sync_x".into()).into());
            }
            Ok(())
        }

        async fn shutdown(&self) -> Result<(), WsError> {
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Never reports a new version after the first listing
    struct StuckEngine;

    #[async_trait]
    impl SyncEngine for StuckEngine {
        async fn create(&self, spec: &SessionSpec) -> Result<String, WsError> {
            Ok(spec.name.clone())
        }

        async fn list(
            &self,
            _selection: &Selection,
            cursor: u64,
        ) -> Result<(u64, Vec<SessionState>), WsError> {
            if cursor > 0 {
                std::future::pending::<()>().await;
            }
            Ok((
                1,
                vec![SessionState {
                    status: Status::ConnectingBeta,
                    ..Default::default()
                }],
            ))
        }

        async fn flush(&self, _selection: &Selection) -> Result<(), WsError> {
            Ok(())
        }

        async fn terminate(&self, _selection: &Selection) -> Result<(), WsError> {
            Ok(())
        }

        async fn shutdown(&self) -> Result<(), WsError> {
            Ok(())
        }
    }

    fn target() -> SyncTarget {
        SyncTarget {
            hostname: "api.team.workspace".into(),
            port: 2222,
            folder: "/src".into(),
            username: "workspace".into(),
        }
    }

    fn options(watch: bool) -> SyncOptions {
        SyncOptions {
            watch,
            mode: SyncMode::TwoWaySafe,
            ..Default::default()
        }
    }

    fn collecting_sink() -> (LineSink, Arc<Mutex<Vec<String>>>) {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let captured = lines.clone();
        let sink: LineSink = Arc::new(move |line: &str| {
            captured.lock().unwrap().push(line.to_string());
        });
        (sink, lines)
    }

    #[tokio::test]
    async fn test_stop_without_create_is_safe() {
        let engine = FakeEngine::new(0);
        let mut controller = SyncSessionController::new(engine.clone(), &CancellationToken::new());

        controller.stop().await;
        controller.stop().await;

        assert_eq!(engine.terminates.load(Ordering::SeqCst), 0);
        assert_eq!(engine.shutdowns.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_no_watch_flushes_once_without_monitor() {
        let engine = FakeEngine::new(2);
        let (sink, lines) = collecting_sink();
        let mut controller = SyncSessionController::new(engine.clone(), &CancellationToken::new())
            .with_sink(sink, false);

        controller.start("./src", target(), options(false)).await.unwrap();

        assert_eq!(engine.creates.load(Ordering::SeqCst), 1);
        assert_eq!(engine.flushes.load(Ordering::SeqCst), 1);
        assert!(!controller.is_monitoring());
        assert!(controller.monitor.is_none());
        assert!(lines.lock().unwrap().is_empty());

        controller.stop().await;
        assert_eq!(engine.terminates.load(Ordering::SeqCst), 1);
        assert_eq!(engine.flushes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_watch_monitor_runs_until_stop() {
        let engine = FakeEngine::new(1);
        let (sink, lines) = collecting_sink();
        let mut controller = SyncSessionController::new(engine.clone(), &CancellationToken::new())
            .with_sink(sink, false);

        controller.start("./src", target(), options(true)).await.unwrap();
        assert_eq!(engine.flushes.load(Ordering::SeqCst), 0);
        assert!(controller.is_monitoring());

        tokio::time::sleep(Duration::from_millis(100)).await;
        let produced = lines.lock().unwrap().len();
        assert!(produced >= 2, "expected several status lines, got {}", produced);
        assert!(lines
            .lock()
            .unwrap()
            .iter()
            .all(|line| line == "Watching for changes"));

        controller.stop().await;
        assert!(!controller.is_monitoring());

        let after_stop = lines.lock().unwrap().len();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(lines.lock().unwrap().len(), after_stop);
        assert_eq!(engine.terminates.load(Ordering::SeqCst), 1);
        assert_eq!(engine.shutdowns.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_activation_timeout() {
        let mut controller =
            SyncSessionController::new(Arc::new(StuckEngine), &CancellationToken::new());

        let err = controller
            .start("./src", target(), options(true))
            .await
            .unwrap_err();
        match err {
            WsError::Timeout { elapsed_secs, .. } => assert_eq!(elapsed_secs, 30),
            other => panic!("expected timeout, got {:?}", other),
        }
        controller.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_activation_is_interrupted() {
        let parent = CancellationToken::new();
        let mut controller = SyncSessionController::new(Arc::new(StuckEngine), &parent);

        let trigger = parent.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let err = controller
            .start("./src", target(), options(false))
            .await
            .unwrap_err();
        assert!(matches!(err, WsError::Interrupted));
        controller.stop().await;
    }

    #[tokio::test]
    async fn test_terminate_failure_is_swallowed() {
        let engine = FakeEngine::failing_terminate();
        let mut controller = SyncSessionController::new(engine.clone(), &CancellationToken::new());

        controller.create("./src", target(), options(false)).await.unwrap();
        assert!(controller.session_id().unwrap().starts_with("sync_workspace-"));

        controller.stop().await;
        controller.stop().await;
        assert_eq!(engine.terminates.load(Ordering::SeqCst), 1);
        assert_eq!(engine.shutdowns.load(Ordering::SeqCst), 1);
        assert!(controller.session_id().is_none());
    }

    #[tokio::test]
    async fn test_wait_active_without_session_fails() {
        let controller = SyncSessionController::new(FakeEngine::new(0), &CancellationToken::new());
        assert!(matches!(
            controller.wait_active().await,
            Err(WsError::Sync(SyncError::SessionGone(_)))
        ));
    }
}
