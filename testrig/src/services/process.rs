//! Supervised external processes
//!
//! A [`ProcessHandle`] owns one running child: two drain tasks (see
//! [`output_handler`](super::output_handler)) and one supervising task that
//! waits for exit or cancellation. The child gets its own process group so
//! termination reaches anything it spawned.
//!
//! Cancellation is inherited: the handle's token is a child of the token
//! passed to [`ProcessHandle::start`], so cancelling the parent terminates the
//! process. There is no intrinsic timeout.

use std::fmt;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::process::Child;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{HarnessError, HarnessResult};
use crate::services::command::CommandSpec;
use crate::services::output_handler::{configure_child_stdio, spawn_output_drain, OutputBuffer, StreamKind};

/// Time between SIGTERM and SIGKILL when terminating a child
pub const TERMINATION_GRACE: Duration = Duration::from_secs(2);

/// How long a stopped child's pipes may keep draining after it exits
pub const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// How a supervised process ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitOutcome {
    /// Exit code, absent when killed by a signal or never reaped
    pub code: Option<i32>,
    /// Signal that terminated the process, if any
    pub signal: Option<i32>,
    pub success: bool,
    /// The exit followed a cancellation request
    pub cancelled: bool,
    /// Waiting on the child failed
    pub error: Option<String>,
}

impl ExitOutcome {
    fn from_status(status: std::process::ExitStatus, cancelled: bool) -> Self {
        #[cfg(unix)]
        let signal = {
            use std::os::unix::process::ExitStatusExt;
            status.signal()
        };
        #[cfg(not(unix))]
        let signal = None;

        Self {
            code: status.code(),
            signal,
            success: status.success(),
            cancelled,
            error: None,
        }
    }

    fn wait_failed(error: std::io::Error, cancelled: bool) -> Self {
        Self {
            code: None,
            signal: None,
            success: false,
            cancelled,
            error: Some(error.to_string()),
        }
    }

    /// Human readable status used in errors and logs
    pub fn describe(&self) -> String {
        match (&self.error, self.code, self.signal) {
            (Some(error), _, _) => format!("wait failure: {error}"),
            (None, Some(code), _) => format!("exit code {code}"),
            (None, None, Some(signal)) => format!("signal {signal}"),
            (None, None, None) => "unknown status".to_string(),
        }
    }
}

impl fmt::Display for ExitOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())?;
        if self.cancelled {
            f.write_str(" (cancelled)")?;
        }
        Ok(())
    }
}

/// Observable lifecycle state of a supervised process
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessState {
    Running,
    Exited(ExitOutcome),
}

/// Clonable view of a process lifetime: wait, observe exit, request stop
#[derive(Debug, Clone)]
pub struct ProcessMonitor {
    pid: Option<u32>,
    command: Arc<str>,
    cancel: CancellationToken,
    finished: CancellationToken,
    outcome: Arc<OnceLock<ExitOutcome>>,
}

impl ProcessMonitor {
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn command_line(&self) -> &str {
        &self.command
    }

    /// Request termination; no-op once exited
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Resolves once the process has exited and both streams are drained
    pub async fn exited(&self) {
        self.finished.cancelled().await;
    }

    /// Wait for the process to finish. Safe to call repeatedly and after exit.
    pub async fn wait(&self) -> ExitOutcome {
        self.finished.cancelled().await;
        self.outcome.get().cloned().unwrap_or(ExitOutcome {
            code: None,
            signal: None,
            success: false,
            cancelled: self.cancel.is_cancelled(),
            error: Some("supervisor ended without recording an outcome".to_string()),
        })
    }

    pub fn is_running(&self) -> bool {
        !self.finished.is_cancelled()
    }

    pub fn state(&self) -> ProcessState {
        match self.outcome.get() {
            Some(outcome) if self.finished.is_cancelled() => ProcessState::Exited(outcome.clone()),
            _ => ProcessState::Running,
        }
    }
}

/// Handle for one running external program
#[derive(Debug)]
pub struct ProcessHandle {
    spec: CommandSpec,
    monitor: ProcessMonitor,
    stdout: OutputBuffer,
    stderr: OutputBuffer,
    stdout_taken: bool,
    stderr_taken: bool,
}

impl ProcessHandle {
    /// Launch `spec` under a token derived from `parent`.
    ///
    /// Must be called from within a tokio runtime. Output draining starts
    /// before this returns.
    pub fn start(spec: CommandSpec, parent: &CancellationToken) -> HarnessResult<Self> {
        let mut cmd = spec.to_tokio_command()?;
        if parent.is_cancelled() {
            return Err(HarnessError::Cancelled {
                operation: spec.command_line(),
            });
        }

        configure_child_stdio(&mut cmd);
        cmd.kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(|e| HarnessError::StartFailure {
            command: spec.command_line(),
            reason: e.to_string(),
        })?;
        let pid = child.id();
        let program = spec.program().unwrap_or_default().to_string();

        let stdout = OutputBuffer::new();
        let stderr = OutputBuffer::new();

        let mut drains = Vec::with_capacity(2);
        if let Some(pipe) = child.stdout.take() {
            drains.push(spawn_output_drain(
                pipe,
                StreamKind::Stdout,
                program.clone(),
                spec.echoes(),
                stdout.clone(),
            ));
        }
        if let Some(pipe) = child.stderr.take() {
            drains.push(spawn_output_drain(
                pipe,
                StreamKind::Stderr,
                program.clone(),
                spec.echoes(),
                stderr.clone(),
            ));
        }

        let monitor = ProcessMonitor {
            pid,
            command: Arc::from(spec.command_line()),
            cancel: parent.child_token(),
            finished: CancellationToken::new(),
            outcome: Arc::new(OnceLock::new()),
        };

        tracing::debug!(program = %program, pid = ?pid, "started `{}`", spec.command_line());
        tokio::spawn(supervise(child, monitor.clone(), drains));

        Ok(Self {
            spec,
            monitor,
            stdout,
            stderr,
            stdout_taken: false,
            stderr_taken: false,
        })
    }

    pub fn spec(&self) -> &CommandSpec {
        &self.spec
    }

    pub fn pid(&self) -> Option<u32> {
        self.monitor.pid()
    }

    /// Clonable lifetime view for watchers
    pub fn monitor(&self) -> ProcessMonitor {
        self.monitor.clone()
    }

    pub fn stop(&self) {
        self.monitor.stop();
    }

    pub async fn wait(&self) -> ExitOutcome {
        self.monitor.wait().await
    }

    pub async fn exited(&self) {
        self.monitor.exited().await;
    }

    pub fn is_running(&self) -> bool {
        self.monitor.is_running()
    }

    pub fn state(&self) -> ProcessState {
        self.monitor.state()
    }

    /// Lines captured from stdout so far
    pub fn stdout(&self) -> Vec<String> {
        self.stdout.snapshot()
    }

    /// Lines captured from stderr so far
    pub fn stderr(&self) -> Vec<String> {
        self.stderr.snapshot()
    }

    /// Live stdout lines, starting with everything captured so far.
    /// Only the first call gets a receiver.
    pub fn take_stdout(&mut self) -> Option<mpsc::UnboundedReceiver<String>> {
        take_live(&mut self.stdout_taken, &self.stdout)
    }

    /// Live stderr lines, as [`take_stdout`](Self::take_stdout)
    pub fn take_stderr(&mut self) -> Option<mpsc::UnboundedReceiver<String>> {
        take_live(&mut self.stderr_taken, &self.stderr)
    }

    /// Last `n` lines of stderr, or of stdout when stderr is empty
    pub fn output_tail(&self, n: usize) -> Vec<String> {
        if self.stderr.is_empty() {
            self.stdout.tail(n)
        } else {
            self.stderr.tail(n)
        }
    }
}

fn take_live(taken: &mut bool, buffer: &OutputBuffer) -> Option<mpsc::UnboundedReceiver<String>> {
    if std::mem::replace(taken, true) {
        return None;
    }
    Some(buffer.subscribe())
}

async fn supervise(mut child: Child, monitor: ProcessMonitor, drains: Vec<JoinHandle<()>>) {
    let (status, cancelled) = tokio::select! {
        status = child.wait() => (status, false),
        _ = monitor.cancel.cancelled() => {
            terminate(&mut child, monitor.pid).await;
            (child.wait().await, true)
        }
    };

    // Grandchildren may keep the pipes open; after a stop request draining
    // gets DRAIN_GRACE to flush what the child wrote on its way out
    let aborts: Vec<_> = drains.iter().map(JoinHandle::abort_handle).collect();
    let drained = async move {
        for drain in drains {
            let _ = drain.await;
        }
    };
    tokio::pin!(drained);
    tokio::select! {
        biased;
        _ = &mut drained => {}
        _ = monitor.cancel.cancelled() => {
            if tokio::time::timeout(DRAIN_GRACE, &mut drained).await.is_err() {
                signal_group(monitor.pid, GroupSignal::Kill);
                for abort in aborts {
                    abort.abort();
                }
            }
        }
    }

    let outcome = match status {
        Ok(status) => ExitOutcome::from_status(status, cancelled),
        Err(e) => ExitOutcome::wait_failed(e, cancelled),
    };
    tracing::debug!(pid = ?monitor.pid, "`{}` finished: {}", monitor.command, outcome);
    let _ = monitor.outcome.set(outcome);
    monitor.finished.cancel();
}

async fn terminate(child: &mut Child, pid: Option<u32>) {
    signal_group(pid, GroupSignal::Term);
    if tokio::time::timeout(TERMINATION_GRACE, child.wait()).await.is_err() {
        signal_group(pid, GroupSignal::Kill);
        let _ = child.start_kill();
    }
}

enum GroupSignal {
    Term,
    Kill,
}

#[cfg(unix)]
fn signal_group(pid: Option<u32>, signal: GroupSignal) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Some(pid) = pid else { return };
    let signal = match signal {
        GroupSignal::Term => Signal::SIGTERM,
        GroupSignal::Kill => Signal::SIGKILL,
    };
    // ESRCH just means the group is already gone
    let _ = killpg(Pid::from_raw(pid as i32), signal);
}

#[cfg(not(unix))]
fn signal_group(_pid: Option<u32>, _signal: GroupSignal) {}
