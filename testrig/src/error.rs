//! Harness error types

use shared::{Component, SharedError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    #[error("Failed to start `{command}`: {reason}")]
    StartFailure { command: String, reason: String },

    #[error("Command `{command}` failed with {status}{}", tail_suffix(.stderr_tail))]
    CommandFailed {
        command: String,
        status: String,
        stderr_tail: Vec<String>,
    },

    #[error("{component} health check failed after {attempts} attempts{}", error_suffix(.last_error))]
    HealthCheckTimeout {
        component: Component,
        attempts: u32,
        last_error: Option<String>,
    },

    #[error("{component} quit unexpectedly ({status})")]
    UnexpectedExit { component: Component, status: String },

    #[error("Environment misconfigured: {message}")]
    EnvironmentMisconfigured { message: String },

    #[error("Failed to parse {what}: {input}")]
    Parse { what: String, input: String },

    #[error("Operation cancelled: {operation}")]
    Cancelled { operation: String },

    #[error("Shared component error: {0}")]
    Shared(#[from] SharedError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

fn tail_suffix(tail: &[String]) -> String {
    if tail.is_empty() {
        String::new()
    } else {
        format!(":\n{}", tail.join("\n"))
    }
}

fn error_suffix(last_error: &Option<String>) -> String {
    last_error.as_ref().map(|e| format!(": {e}")).unwrap_or_default()
}

impl HarnessError {
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument { message: message.into() }
    }

    pub fn misconfigured(message: impl Into<String>) -> Self {
        Self::EnvironmentMisconfigured { message: message.into() }
    }

    pub fn parse(what: impl Into<String>, input: impl Into<String>) -> Self {
        Self::Parse {
            what: what.into(),
            input: input.into(),
        }
    }

    /// Whether the error means the external program never ran
    pub fn is_start_failure(&self) -> bool {
        matches!(self, Self::StartFailure { .. } | Self::InvalidArgument { .. })
    }
}

pub type HarnessResult<T> = Result<T, HarnessError>;
