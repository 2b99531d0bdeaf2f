//! Description of an external command invocation

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{HarnessError, HarnessResult};

/// Program, arguments, working directory and environment overlay for one external command
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandSpec {
    args: Vec<String>,
    dir: Option<PathBuf>,
    env: BTreeMap<String, String>,
    echo: bool,
}

impl CommandSpec {
    /// Build a spec from the full argument list, program first
    pub fn new<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            args: args.into_iter().map(Into::into).collect(),
            dir: None,
            env: BTreeMap::new(),
            echo: true,
        }
    }

    /// Run in `dir` instead of the caller's working directory (fluent API)
    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        self.dir = if dir.as_os_str().is_empty() {
            None
        } else {
            Some(dir.to_path_buf())
        };
        self
    }

    /// Add one overlay variable (fluent API)
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Merge an overlay; later values win (fluent API)
    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env.extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Control whether captured lines are echoed to the log (fluent API)
    pub fn echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    /// Append extra arguments (fluent API)
    pub fn args<I, S>(mut self, extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(extra.into_iter().map(Into::into));
        self
    }

    pub fn argv(&self) -> &[String] {
        &self.args
    }

    pub fn program(&self) -> Option<&str> {
        self.args.first().map(String::as_str)
    }

    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    pub fn env_overlay(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    pub fn echoes(&self) -> bool {
        self.echo
    }

    /// Space-joined command line used in logs and error messages
    pub fn command_line(&self) -> String {
        self.args.join(" ")
    }

    /// Reject specs that cannot describe a process
    pub fn validate(&self) -> HarnessResult<()> {
        match self.program() {
            None => Err(HarnessError::invalid_argument("missing command to run")),
            Some(program) if program.is_empty() => Err(HarnessError::invalid_argument("empty program name")),
            Some(_) => Ok(()),
        }
    }

    /// Convert into a `tokio::process::Command` with the overlay applied
    pub(crate) fn to_tokio_command(&self) -> HarnessResult<tokio::process::Command> {
        self.validate()?;
        let mut cmd = tokio::process::Command::new(&self.args[0]);
        cmd.args(&self.args[1..]);
        if let Some(dir) = &self.dir {
            cmd.current_dir(dir);
        }
        cmd.envs(&self.env);
        Ok(cmd)
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.command_line())
    }
}
