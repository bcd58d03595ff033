//! Agent subprocess transport.
//!
//! Spawns the agent with piped stdio and `kill_on_drop(true)`, frames its
//! stdout through [`JsonFrameCodec`], and serializes every writer through one
//! async mutex around stdin so frames never interleave.
//!
//! Shutdown is two-staged: [`ProcessTransport::end_input`] half-closes stdin
//! and leaves the process running; [`ProcessTransport::close`] additionally
//! terminates the process (SIGTERM first on unix, then a hard kill) and
//! waits for it within the grace period.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::codec::FramedRead;
use tracing::{debug, info, warn};

use crate::config::{ProcessSpec, SessionConfig, StderrCallback, ALLOWED_ENV_VARS};
use crate::transport::{FrameStream, JsonFrameCodec, Transport};
use crate::{Result, SdkError};

/// Time allowed for the stderr drain task to flush after the process exits.
const STDERR_FLUSH_WAIT: Duration = Duration::from_millis(200);

type StderrTail = Arc<std::sync::Mutex<VecDeque<String>>>;

/// Subprocess-backed [`Transport`].
pub struct ProcessTransport {
    spec: ProcessSpec,
    max_buffer_size: usize,
    stderr_tail_lines: usize,
    shutdown_grace: Duration,
    inner: Arc<ProcessInner>,
}

/// State shared with the frame stream.
struct ProcessInner {
    child: Mutex<Option<Child>>,
    /// The single write lock for this transport.
    stdin: Mutex<Option<ChildStdin>>,
    stdout: std::sync::Mutex<Option<ChildStdout>>,
    stderr_tail: StderrTail,
    stderr_task: std::sync::Mutex<Option<JoinHandle<()>>>,
    connected: AtomicBool,
    ready: AtomicBool,
    closed: AtomicBool,
}

impl ProcessTransport {
    /// Create an unconnected transport for `spec`.
    #[must_use]
    pub fn new(spec: ProcessSpec, config: &SessionConfig) -> Self {
        Self {
            spec,
            max_buffer_size: config.max_buffer_size,
            stderr_tail_lines: config.stderr_tail_lines,
            shutdown_grace: config.shutdown_grace(),
            inner: Arc::new(ProcessInner {
                child: Mutex::new(None),
                stdin: Mutex::new(None),
                stdout: std::sync::Mutex::new(None),
                stderr_tail: Arc::new(std::sync::Mutex::new(VecDeque::new())),
                stderr_task: std::sync::Mutex::new(None),
                connected: AtomicBool::new(false),
                ready: AtomicBool::new(false),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Spawn the agent process. A no-op when already connected.
    ///
    /// # Errors
    ///
    /// - `SdkError::Connection` if the executable cannot be started or its
    ///   stdio cannot be captured.
    /// - `SdkError::InvalidState` if the transport was already closed.
    pub async fn connect(&self) -> Result<()> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(SdkError::InvalidState("transport is closed".into()));
        }
        let mut child_slot = self.inner.child.lock().await;
        if self.inner.connected.load(Ordering::SeqCst) {
            return Ok(());
        }

        let mut cmd = Command::new(&self.spec.command);
        cmd.args(&self.spec.args);

        if !self.spec.inherit_env {
            cmd.env_clear();
            for &key in ALLOWED_ENV_VARS {
                if let Ok(val) = std::env::var(key) {
                    cmd.env(key, val);
                }
            }
        }
        cmd.envs(&self.spec.env);

        if let Some(cwd) = &self.spec.cwd {
            cmd.current_dir(cwd);
        }

        let stderr_mode = if self.spec.capture_stderr {
            Stdio::piped()
        } else {
            Stdio::null()
        };
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(stderr_mode)
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|err| {
            SdkError::Connection(format!(
                "failed to start agent process '{}': {err}",
                self.spec.command
            ))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| SdkError::Connection("failed to capture agent stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SdkError::Connection("failed to capture agent stdout".into()))?;

        if let Some(stderr) = child.stderr.take() {
            let handle = spawn_stderr_drain(
                stderr,
                Arc::clone(&self.inner.stderr_tail),
                self.stderr_tail_lines,
                self.spec.stderr_callback.clone(),
            );
            if let Ok(mut slot) = self.inner.stderr_task.lock() {
                *slot = Some(handle);
            }
        }

        info!(
            command = %self.spec.command,
            pid = ?child.id(),
            "agent process started"
        );

        *self.inner.stdin.lock().await = Some(stdin);
        self.inner
            .stdout
            .lock()
            .map_err(|_| SdkError::InvalidState("stdout slot poisoned".into()))?
            .replace(stdout);
        *child_slot = Some(child);
        self.inner.connected.store(true, Ordering::SeqCst);
        self.inner.ready.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Snapshot of the retained stderr lines.
    #[must_use]
    pub fn stderr_tail(&self) -> Vec<String> {
        self.inner
            .stderr_tail
            .lock()
            .map(|tail| tail.iter().cloned().collect())
            .unwrap_or_default()
    }
}

impl Transport for ProcessTransport {
    fn write<'a>(&'a self, frame: &'a str) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let mut guard = self.inner.stdin.lock().await;
            let Some(stdin) = guard.as_mut() else {
                return Err(SdkError::Connection("agent input stream is closed".into()));
            };
            if !self.inner.ready.load(Ordering::SeqCst) {
                return Err(SdkError::Connection("transport is not ready for writing".into()));
            }

            let mut bytes = Vec::with_capacity(frame.len() + 1);
            bytes.extend_from_slice(frame.as_bytes());
            bytes.push(b'\n');

            let result = match stdin.write_all(&bytes).await {
                Ok(()) => stdin.flush().await,
                Err(e) => Err(e),
            };
            result.map_err(|e| {
                warn!(error = %e, "write to agent stdin failed");
                self.inner.ready.store(false, Ordering::SeqCst);
                SdkError::Connection(format!("failed to write to agent process: {e}"))
            })
        })
    }

    fn read_messages(&self) -> Result<FrameStream> {
        let stdout = self
            .inner
            .stdout
            .lock()
            .map_err(|_| SdkError::InvalidState("stdout slot poisoned".into()))?
            .take()
            .ok_or_else(|| {
                SdkError::InvalidState("message stream already taken or not connected".into())
            })?;

        let state = ReadState {
            framed: Some(FramedRead::new(stdout, JsonFrameCodec::new(self.max_buffer_size))),
            inner: Arc::clone(&self.inner),
            grace: self.shutdown_grace,
        };

        let stream = futures_util::stream::unfold(state, |mut st| async move {
            let framed = st.framed.as_mut()?;
            match framed.next().await {
                Some(Ok(item)) => Some((item, st)),
                Some(Err(e)) => {
                    st.framed = None;
                    Some((Err(e), st))
                }
                None => {
                    st.framed = None;
                    let exit = st.inner.exit_error(st.grace).await?;
                    Some((Err(exit), st))
                }
            }
        });

        Ok(stream.boxed())
    }

    fn end_input(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            if self.inner.stdin.lock().await.take().is_some() {
                debug!("agent stdin half-closed");
            }
            Ok(())
        })
    }

    fn close(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            self.inner.ready.store(false, Ordering::SeqCst);
            if self.inner.closed.swap(true, Ordering::SeqCst) {
                return Ok(());
            }

            // A writer blocked on a full pipe holds the lock; only an idle
            // stdin can be closed before terminating.
            if let Ok(mut stdin) = self.inner.stdin.try_lock() {
                drop(stdin.take());
            }

            let child = self.inner.child.lock().await.take();
            if let Some(mut child) = child {
                terminate(&mut child, self.shutdown_grace).await;
            }

            match tokio::time::timeout(self.shutdown_grace, self.inner.stdin.lock()).await {
                Ok(mut stdin) => drop(stdin.take()),
                Err(_elapsed) => warn!("agent stdin still locked by a writer after termination"),
            }

            let stderr_task = self
                .inner
                .stderr_task
                .lock()
                .ok()
                .and_then(|mut slot| slot.take());
            if let Some(handle) = stderr_task {
                handle.abort();
            }

            info!(command = %self.spec.command, "agent transport closed");
            Ok(())
        })
    }

    fn is_ready(&self) -> bool {
        self.inner.ready.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for ProcessTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessTransport")
            .field("spec", &self.spec)
            .field("ready", &self.is_ready())
            .finish_non_exhaustive()
    }
}

// ── Read side ─────────────────────────────────────────────────────────────────

struct ReadState {
    framed: Option<FramedRead<ChildStdout, JsonFrameCodec>>,
    inner: Arc<ProcessInner>,
    grace: Duration,
}

impl ProcessInner {
    /// After stdout EOF: wait (bounded) for exit and report a nonzero code.
    async fn exit_error(&self, grace: Duration) -> Option<SdkError> {
        let status = {
            let mut guard = self.child.lock().await;
            let child = guard.as_mut()?;
            match tokio::time::timeout(grace, child.wait()).await {
                Ok(Ok(status)) => status,
                Ok(Err(err)) => {
                    warn!(%err, "failed to wait for agent process");
                    return None;
                }
                Err(_elapsed) => {
                    debug!("agent stdout closed but process still running");
                    return None;
                }
            }
        };

        if status.success() {
            debug!("agent process exited cleanly");
            return None;
        }

        let drain = self.stderr_task.lock().ok().and_then(|mut slot| slot.take());
        if let Some(handle) = drain {
            let _ = tokio::time::timeout(STDERR_FLUSH_WAIT, handle).await;
        }

        let stderr = self
            .stderr_tail
            .lock()
            .map(|tail| tail.iter().cloned().collect::<Vec<_>>().join("\n"))
            .unwrap_or_default();

        warn!(exit_code = status.code(), "agent process exited with failure");
        Some(SdkError::Process {
            exit_code: status.code(),
            stderr,
        })
    }
}

// ── Private helpers ───────────────────────────────────────────────────────────

fn spawn_stderr_drain(
    stderr: ChildStderr,
    tail: StderrTail,
    capacity: usize,
    callback: Option<StderrCallback>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    debug!(target: "agent_conduit::stderr", line = %line);
                    if let Some(cb) = &callback {
                        cb(&line);
                    }
                    if capacity > 0 {
                        if let Ok(mut tail) = tail.lock() {
                            if tail.len() == capacity {
                                tail.pop_front();
                            }
                            tail.push_back(line);
                        }
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    debug!(%err, "agent stderr read failed");
                    break;
                }
            }
        }
    })
}

/// Terminate `child` if it is still running, waiting at most `grace` per
/// stage.
async fn terminate(child: &mut Child, grace: Duration) {
    match child.try_wait() {
        Ok(Some(status)) => {
            debug!(code = status.code(), "agent process already exited");
            return;
        }
        Ok(None) => {}
        Err(err) => warn!(%err, "failed to poll agent process status"),
    }

    if send_sigterm(child) {
        if let Ok(Ok(status)) = tokio::time::timeout(grace, child.wait()).await {
            debug!(code = status.code(), "agent process exited after SIGTERM");
            return;
        }
    }

    if let Err(err) = child.start_kill() {
        debug!(%err, "kill of agent process failed");
    }
    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(status)) => debug!(code = status.code(), "agent process killed"),
        Ok(Err(err)) => warn!(%err, "failed to reap agent process"),
        Err(_elapsed) => warn!("agent process did not exit within the grace period"),
    }
}

#[cfg(unix)]
fn send_sigterm(child: &Child) -> bool {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Some(pid) = child.id().and_then(|pid| i32::try_from(pid).ok()) else {
        return false;
    };
    match kill(Pid::from_raw(pid), Signal::SIGTERM) {
        Ok(()) => true,
        Err(err) => {
            debug!(%err, pid, "SIGTERM delivery failed");
            false
        }
    }
}

#[cfg(not(unix))]
fn send_sigterm(_child: &Child) -> bool {
    false
}
