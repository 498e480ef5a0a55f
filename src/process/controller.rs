//! Transcoder process lifecycle
//!
//! The controller owns the child process, the stderr drain, a supervisor
//! task and the cancellation token that ties them together. The supervisor
//! fires the optional deadline and kills the process as soon as the token is
//! cancelled, whether or not anyone is waiting. Any in-flight `wait` then
//! reports the cancellation cause.

use parking_lot::Mutex;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::tail::TailBuffer;
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};

/// Lifecycle of one engine invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// Constructed, nothing validated yet
    Created,
    /// Arguments built and resources allocated
    Initialized,
    /// The transcoder process is alive
    Running,
    /// All inputs closed, waiting for the transcoder to flush
    Draining,
    /// Exited, killed or torn down
    Terminated,
}

/// Standard streams handed back by [`ProcessController::spawn`].
#[derive(Debug, Default)]
pub struct SpawnedIo {
    pub stdin: Option<ChildStdin>,
    pub stdout: Option<ChildStdout>,
}

#[derive(Debug)]
pub struct ProcessController {
    id: Uuid,
    program: PathBuf,
    args: Vec<String>,
    state: Mutex<ProcessState>,
    child: Arc<tokio::sync::Mutex<Option<Child>>>,
    exit_status: Mutex<Option<ExitStatus>>,
    stderr_tail: Arc<Mutex<TailBuffer>>,
    stderr_task: Mutex<Option<JoinHandle<()>>>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
    cancel: CancellationToken,
    deadline_hit: Arc<AtomicBool>,
    timeout: Option<Duration>,
}

impl ProcessController {
    /// Create a controller whose token is a child of `parent`.
    pub fn new(
        program: PathBuf,
        args: Vec<String>,
        parent: &CancellationToken,
        config: &EngineConfig,
    ) -> Self {
        let id = Uuid::new_v4();
        tracing::debug!(%id, program = %program.display(), args = ?args, "transcoder prepared");
        Self {
            id,
            program,
            args,
            state: Mutex::new(ProcessState::Initialized),
            child: Arc::new(tokio::sync::Mutex::new(None)),
            exit_status: Mutex::new(None),
            stderr_tail: Arc::new(Mutex::new(TailBuffer::new(config.stderr_tail_bytes))),
            stderr_task: Mutex::new(None),
            supervisor: Mutex::new(None),
            cancel: parent.child_token(),
            deadline_hit: Arc::new(AtomicBool::new(false)),
            timeout: config.timeout(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn state(&self) -> ProcessState {
        *self.state.lock()
    }

    pub(crate) fn set_state(&self, state: ProcessState) {
        let mut current = self.state.lock();
        // Terminated is final
        if *current != ProcessState::Terminated {
            *current = state;
        }
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// The error describing why this invocation was cancelled.
    pub fn cancellation_error(&self) -> EngineError {
        if self.deadline_hit.load(Ordering::SeqCst) {
            EngineError::DeadlineExceeded
        } else {
            EngineError::Cancelled
        }
    }

    /// Captured stderr tail as text.
    pub fn stderr_tail(&self) -> String {
        self.stderr_tail.lock().to_string_lossy()
    }

    /// A command for the transcoder with stderr captured. The caller
    /// chooses stdin/stdout and attaches any extra descriptors.
    pub fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    /// Start the process described by `cmd`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn(&mut self, cmd: &mut Command) -> Result<SpawnedIo> {
        if self.cancel.is_cancelled() {
            self.set_state(ProcessState::Terminated);
            return Err(self.cancellation_error());
        }

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                tracing::warn!(id = %self.id, "failed to start transcoder: {}", e);
                self.set_state(ProcessState::Terminated);
                return Err(EngineError::Start(e));
            }
        };
        tracing::info!(id = %self.id, pid = ?child.id(), "transcoder started");

        if let Some(stderr) = child.stderr.take() {
            let task = tokio::spawn(drain_stderr(self.id, stderr, self.stderr_tail.clone()));
            *self.stderr_task.get_mut() = Some(task);
        }

        let io = SpawnedIo {
            stdin: child.stdin.take(),
            stdout: child.stdout.take(),
        };
        self.child = Arc::new(tokio::sync::Mutex::new(Some(child)));

        let task = tokio::spawn(supervise(
            self.id,
            self.timeout,
            self.cancel.clone(),
            self.deadline_hit.clone(),
            self.child.clone(),
        ));
        *self.supervisor.get_mut() = Some(task);
        self.set_state(ProcessState::Running);
        Ok(io)
    }

    /// Wait for the transcoder to exit.
    ///
    /// Cancellation kills the process; the result then reports the
    /// cancellation cause rather than the exit status. A non-zero exit
    /// carries the captured stderr tail.
    pub async fn wait(&self) -> Result<()> {
        let mut guard = self.child.lock().await;
        let status = match guard.as_mut() {
            Some(child) => {
                let status = tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => {
                        if let Err(e) = child.start_kill() {
                            tracing::debug!(id = %self.id, "kill after cancel: {}", e);
                        }
                        child.wait().await
                    }
                    status = child.wait() => status,
                };
                guard.take();
                let status = status?;
                *self.exit_status.lock() = Some(status);
                self.finish().await;
                tracing::debug!(id = %self.id, %status, "transcoder exited");
                status
            }
            None => {
                let cached = *self.exit_status.lock();
                match cached {
                    Some(status) => status,
                    None if self.cancel.is_cancelled() => return Err(self.cancellation_error()),
                    None => return Err(EngineError::NotRunning),
                }
            }
        };
        drop(guard);

        if status.success() {
            Ok(())
        } else if self.cancel.is_cancelled() {
            Err(self.cancellation_error())
        } else {
            Err(EngineError::Exit {
                status,
                stderr: self.stderr_tail(),
            })
        }
    }

    /// Collect the stderr drain and stop the supervisor after exit.
    async fn finish(&self) {
        if let Some(supervisor) = self.supervisor.lock().take() {
            supervisor.abort();
        }
        let task = self.stderr_task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::warn!(id = %self.id, "stderr drain task failed: {}", e);
            }
        }
        self.set_state(ProcessState::Terminated);
    }

    /// Cancel and kill. Idempotent; never blocks.
    pub fn terminate(&self) {
        if !self.cancel.is_cancelled() {
            tracing::debug!(id = %self.id, "terminating transcoder");
        }
        self.cancel.cancel();
        // A concurrent wait holds the lock; it observes the cancel and kills.
        if let Ok(mut guard) = self.child.try_lock() {
            if let Some(child) = guard.as_mut() {
                let _ = child.start_kill();
            }
        }
        self.set_state(ProcessState::Terminated);
    }
}

impl Drop for ProcessController {
    fn drop(&mut self) {
        // The supervisor kills and releases any child still alive
        self.cancel.cancel();
    }
}

/// Fire the deadline, if any, and kill the child once cancelled.
async fn supervise(
    id: Uuid,
    timeout: Option<Duration>,
    token: CancellationToken,
    deadline_hit: Arc<AtomicBool>,
    child: Arc<tokio::sync::Mutex<Option<Child>>>,
) {
    let deadline = async {
        match timeout {
            Some(timeout) => tokio::time::sleep(timeout).await,
            None => std::future::pending().await,
        }
    };
    tokio::select! {
        _ = deadline => {
            deadline_hit.store(true, Ordering::SeqCst);
            tracing::warn!(%id, ?timeout, "deadline exceeded, cancelling transcoder");
            token.cancel();
        }
        _ = token.cancelled() => {}
    }
    if let Some(child) = child.lock().await.as_mut() {
        if let Err(e) = child.start_kill() {
            tracing::debug!(%id, "kill after cancel: {}", e);
        }
    }
}

async fn drain_stderr(id: Uuid, mut stderr: ChildStderr, tail: Arc<Mutex<TailBuffer>>) {
    let mut buf = [0u8; 1024];
    loop {
        match stderr.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                tracing::trace!(%id, "transcoder stderr: {}", String::from_utf8_lossy(&buf[..n]).trim_end());
                tail.lock().push(&buf[..n]);
            }
            Err(e) => {
                tracing::debug!(%id, "stderr read failed: {}", e);
                break;
            }
        }
    }
}
