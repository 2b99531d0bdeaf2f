//! Production [`CommandRunner`] backed by supervised processes

use tokio_util::sync::CancellationToken;

use crate::error::{HarnessError, HarnessResult};
use crate::services::command::CommandSpec;
use crate::services::process::{ExitOutcome, ProcessHandle};
use crate::traits::CommandRunner;

/// Lines of captured output attached to a `CommandFailed` error
pub const FAILURE_TAIL_LINES: usize = 20;

/// Starts every command under one cancellation scope
#[derive(Debug, Clone, Default)]
pub struct Supervisor {
    cancel: CancellationToken,
}

impl Supervisor {
    pub fn new(cancel: CancellationToken) -> Self {
        Self { cancel }
    }

    /// Token every process started here derives from
    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Start a long-running process without waiting for it
    pub fn start(&self, spec: CommandSpec) -> HarnessResult<ProcessHandle> {
        ProcessHandle::start(spec, &self.cancel)
    }

    async fn run(&self, spec: &CommandSpec) -> HarnessResult<ProcessHandle> {
        let handle = self.start(spec.clone())?;
        let outcome = handle.wait().await;
        check_outcome(&handle, &outcome)?;
        Ok(handle)
    }
}

/// Map a finished process onto the error the caller sees
pub fn check_outcome(handle: &ProcessHandle, outcome: &ExitOutcome) -> HarnessResult<()> {
    if outcome.success {
        return Ok(());
    }
    if outcome.cancelled {
        return Err(HarnessError::Cancelled {
            operation: handle.spec().command_line(),
        });
    }
    Err(HarnessError::CommandFailed {
        command: handle.spec().command_line(),
        status: outcome.describe(),
        stderr_tail: handle.output_tail(FAILURE_TAIL_LINES),
    })
}

#[async_trait::async_trait]
impl CommandRunner for Supervisor {
    async fn exec(&self, spec: &CommandSpec) -> HarnessResult<()> {
        self.run(spec).await.map(|_| ())
    }

    async fn exec_read(&self, spec: &CommandSpec) -> HarnessResult<Vec<String>> {
        let handle = self.run(spec).await?;
        Ok(handle.stdout().iter().map(|line| line.trim().to_string()).collect())
    }
}
