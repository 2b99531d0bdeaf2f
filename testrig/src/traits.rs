//! Trait definitions with mockall annotations for testing
//!
//! Discovery and the build orchestrator only ever reach external tooling
//! through [`CommandRunner`], so their tests can script tool output with
//! `MockCommandRunner` instead of needing a toolchain installed.

use crate::error::HarnessResult;
use crate::services::command::CommandSpec;

/// Run-to-completion access to external programs
#[mockall::automock]
#[async_trait::async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run a command and wait for it
    ///
    /// # Returns
    /// `Ok(())` on a successful exit, `CommandFailed` carrying the stderr tail
    /// otherwise
    async fn exec(&self, spec: &CommandSpec) -> HarnessResult<()>;

    /// Run a command and collect its trimmed stdout lines
    ///
    /// Stderr is captured for diagnostics only.
    async fn exec_read(&self, spec: &CommandSpec) -> HarnessResult<Vec<String>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::predicate::*;

    #[tokio::test]
    async fn test_mock_runner_scripts_output() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_exec_read()
            .with(function(|spec: &CommandSpec| spec.program() == Some("go")))
            .times(1)
            .returning(|_| Ok(vec!["main:/src/app".to_string()]));

        let lines = runner.exec_read(&CommandSpec::new(["go", "list"])).await.unwrap();
        assert_eq!(lines, vec!["main:/src/app"]);
    }
}
