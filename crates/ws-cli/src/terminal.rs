//! Local terminal attachment for remote commands
//!
//! Interactive sessions put the local terminal into raw mode for their whole
//! lifetime ([`RawModeGuard`] restores it on every exit path), pass stdin to
//! the remote TTY byte for byte and re-sample the window size every
//! [`RESIZE_SAMPLE_INTERVAL`].
//!
//! Stdin is read on a detached thread. A blocking read cannot be cancelled,
//! so the thread only notices the end of a session on its next read.

use std::io::Read;
use std::time::Duration;

use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use ws_cluster::ExecSession;
use ws_core::{TerminalSize, WsError};

/// How often the local window size is re-read
pub const RESIZE_SAMPLE_INTERVAL: Duration = Duration::from_secs(2);

/// Buffered input chunks between the local reader and the remote stdin
const INPUT_CHANNEL_CAPACITY: usize = 256;

/// Size of a single stdin read
const INPUT_CHUNK_SIZE: usize = 4096;

/// How long remaining remote output may take to drain after exit
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Raw mode for as long as the guard lives
pub struct RawModeGuard {
    _private: (),
}

impl RawModeGuard {
    pub fn enable() -> Result<Self, WsError> {
        enable_raw_mode()?;
        Ok(Self { _private: () })
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if let Err(e) = disable_raw_mode() {
            tracing::warn!("Failed to restore terminal mode: {}", e);
        }
    }
}

/// Current window size, 80x24 when it cannot be read
pub fn current_size() -> TerminalSize {
    match crossterm::terminal::size() {
        Ok((cols, rows)) => TerminalSize::new(cols, rows),
        Err(e) => {
            tracing::debug!("Could not read terminal size: {}", e);
            TerminalSize::default()
        }
    }
}

/// Feed the window size into `sizes` every `interval` until cancelled
pub fn spawn_size_sampler(
    sizes: mpsc::Sender<TerminalSize>,
    cancel: CancellationToken,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            if sizes.send(current_size()).await.is_err() {
                break;
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }
    })
}

/// Attach the local terminal to a TTY session until the remote side exits.
///
/// Cancelling `cancel` detaches without error.
pub async fn run_interactive(session: ExecSession, cancel: &CancellationToken) -> Result<(), WsError> {
    let ExecSession {
        stdin,
        stdout,
        stderr,
        resize,
        completion,
    } = session;

    let raw_mode = RawModeGuard::enable()?;
    let local = cancel.child_token();

    let sampler =
        resize.map(|sizes| spawn_size_sampler(sizes, local.clone(), RESIZE_SAMPLE_INTERVAL));

    let writer = stdin.map(|remote| {
        let (tx, rx) = mpsc::channel(INPUT_CHANNEL_CAPACITY);
        spawn_input_reader(std::io::stdin(), tx);
        tokio::spawn(forward_input(rx, remote))
    });

    let output = spawn_output(stdout, stderr);

    let result = tokio::select! {
        result = completion => result,
        _ = cancel.cancelled() => Ok(()),
    };

    local.cancel();
    drain_output(output).await;

    if let Some(sampler) = sampler {
        let _ = sampler.await;
    }
    if let Some(writer) = writer {
        writer.abort();
    }

    drop(raw_mode);
    result
}

/// Run a session without a TTY, piping the local standard streams.
///
/// Cancelling `cancel` abandons the command with [`WsError::Interrupted`].
pub async fn run_piped(session: ExecSession, cancel: &CancellationToken) -> Result<(), WsError> {
    let ExecSession {
        stdin,
        stdout,
        stderr,
        completion,
        ..
    } = session;

    let writer = stdin.map(|remote| {
        let (tx, rx) = mpsc::channel(INPUT_CHANNEL_CAPACITY);
        spawn_input_reader(std::io::stdin(), tx);
        tokio::spawn(forward_input(rx, remote))
    });

    let output = spawn_output(stdout, stderr);

    let result = tokio::select! {
        result = completion => result,
        _ = cancel.cancelled() => Err(WsError::Interrupted),
    };

    drain_output(output).await;
    if let Some(writer) = writer {
        writer.abort();
    }

    result
}

fn spawn_output(
    stdout: Option<Box<dyn AsyncRead + Send + Unpin>>,
    stderr: Option<Box<dyn AsyncRead + Send + Unpin>>,
) -> Vec<JoinHandle<()>> {
    let mut tasks = Vec::new();
    if let Some(remote) = stdout {
        tasks.push(tokio::spawn(copy_output(remote, tokio::io::stdout())));
    }
    if let Some(remote) = stderr {
        tasks.push(tokio::spawn(copy_output(remote, tokio::io::stderr())));
    }
    tasks
}

async fn drain_output(tasks: Vec<JoinHandle<()>>) {
    for mut task in tasks {
        if tokio::time::timeout(OUTPUT_DRAIN_TIMEOUT, &mut task)
            .await
            .is_err()
        {
            task.abort();
        }
    }
}

async fn copy_output<W>(mut remote: Box<dyn AsyncRead + Send + Unpin>, mut local: W)
where
    W: AsyncWrite + Unpin,
{
    if let Err(e) = tokio::io::copy(&mut remote, &mut local).await {
        tracing::debug!("Remote output ended: {}", e);
    }
    let _ = local.flush().await;
}

/// Write input chunks to the remote stdin, closing it when the channel ends
async fn forward_input(
    mut chunks: mpsc::Receiver<Vec<u8>>,
    mut remote: Box<dyn AsyncWrite + Send + Unpin>,
) {
    while let Some(chunk) = chunks.recv().await {
        if remote.write_all(&chunk).await.is_err() || remote.flush().await.is_err() {
            return;
        }
    }
    let _ = remote.shutdown().await;
}

/// Detached thread copying `source` into `chunks` until EOF or until the
/// receiving side is gone
fn spawn_input_reader<R>(
    mut source: R,
    chunks: mpsc::Sender<Vec<u8>>,
) -> std::thread::JoinHandle<()>
where
    R: Read + Send + 'static,
{
    std::thread::spawn(move || {
        let mut buf = [0u8; INPUT_CHUNK_SIZE];
        loop {
            match source.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    if chunks.blocking_send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    tracing::debug!("Local input ended: {}", e);
                    break;
                }
            }
        }
    })
}
