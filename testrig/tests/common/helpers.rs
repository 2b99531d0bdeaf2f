//! Scripted command runner and helpers for orchestrator tests

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use testrig::{AuthorityConfig, BuildOrchestrator, CommandSpec, HarnessError, MockCommandRunner};

use super::fixtures::TestFixtures;

/// One command the orchestrator asked the runner to execute
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub line: String,
    pub dir: Option<PathBuf>,
    pub env: BTreeMap<String, String>,
}

/// Every command seen by a scripted runner, in call order
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    calls: Arc<Mutex<Vec<Call>>>,
}

impl CallLog {
    fn record(&self, spec: &CommandSpec) {
        self.calls.lock().unwrap().push(Call {
            line: spec.command_line(),
            dir: spec.dir().map(Path::to_path_buf),
            env: spec.env_overlay().clone(),
        });
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn lines(&self) -> Vec<String> {
        self.calls().into_iter().map(|call| call.line).collect()
    }

    pub fn contains(&self, line: &str) -> bool {
        self.lines().iter().any(|l| l == line)
    }

    /// Calls whose command line starts with `prefix`
    pub fn matching(&self, prefix: &str) -> Vec<Call> {
        self.calls().into_iter().filter(|call| call.line.starts_with(prefix)).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.lock().unwrap().is_empty()
    }
}

#[derive(Debug, Clone)]
struct Rule {
    prefix: String,
    dir: Option<PathBuf>,
    outcome: Result<Vec<String>, String>,
}

impl Rule {
    fn matches(&self, spec: &CommandSpec) -> bool {
        spec.command_line().starts_with(&self.prefix)
            && self.dir.as_deref().map_or(true, |dir| spec.dir() == Some(dir))
    }
}

fn apply(rules: &[Rule], spec: &CommandSpec) -> Result<Vec<String>, HarnessError> {
    match rules.iter().find(|rule| rule.matches(spec)).map(|rule| &rule.outcome) {
        Some(Ok(lines)) => Ok(lines.clone()),
        Some(Err(stderr)) => Err(HarnessError::CommandFailed {
            command: spec.command_line(),
            status: "exit code 1".to_string(),
            stderr_tail: vec![stderr.clone()],
        }),
        None => Ok(Vec::new()),
    }
}

/// Builder for a [`MockCommandRunner`] answering by command-line prefix.
///
/// The first matching rule wins; unmatched commands succeed with no output.
#[derive(Debug, Default)]
pub struct RunnerBuilder {
    rules: Vec<Rule>,
}

impl RunnerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Print `lines` for commands starting with `prefix`
    pub fn read(mut self, prefix: &str, lines: Vec<String>) -> Self {
        self.rules.push(Rule {
            prefix: prefix.to_string(),
            dir: None,
            outcome: Ok(lines),
        });
        self
    }

    /// Like [`read`](Self::read), only for commands run in `dir`
    pub fn read_in(mut self, dir: impl Into<PathBuf>, prefix: &str, lines: Vec<String>) -> Self {
        self.rules.push(Rule {
            prefix: prefix.to_string(),
            dir: Some(dir.into()),
            outcome: Ok(lines),
        });
        self
    }

    /// Fail commands starting with `prefix`
    pub fn fail(mut self, prefix: &str, stderr: &str) -> Self {
        self.rules.push(Rule {
            prefix: prefix.to_string(),
            dir: None,
            outcome: Err(stderr.to_string()),
        });
        self
    }

    /// Answers for the standard two-program tree under [`TestFixtures::WORKDIR`]
    pub fn go_tree(self) -> Self {
        self.read("go list -f", TestFixtures::entry_points())
            .read_in(TestFixtures::WORKDIR, &TestFixtures::listing("app"), TestFixtures::app_events())
            .read_in(TestFixtures::WORKDIR, &TestFixtures::listing("svc"), TestFixtures::svc_events())
    }

    pub fn build(self) -> (MockCommandRunner, CallLog) {
        let log = CallLog::default();
        let rules = Arc::new(self.rules);
        let mut runner = MockCommandRunner::new();

        let (exec_log, exec_rules) = (log.clone(), rules.clone());
        runner.expect_exec().times(0..).returning(move |spec| {
            exec_log.record(spec);
            apply(&exec_rules, spec).map(|_| ())
        });

        let read_log = log.clone();
        runner.expect_exec_read().times(0..).returning(move |spec| {
            read_log.record(spec);
            apply(&rules, spec)
        });

        (runner, log)
    }
}

pub type TestOrchestrator = BuildOrchestrator<MockCommandRunner>;

/// Helper functions for common test operations
pub struct TestHelpers;

impl TestHelpers {
    /// Orchestrator on the host over a scripted runner
    pub fn host_orchestrator(builder: RunnerBuilder) -> (TestOrchestrator, CallLog) {
        let (runner, log) = builder.build();
        let orchestrator = BuildOrchestrator::new(Arc::new(runner), TestFixtures::workdir()).with_inside_container(false);
        (orchestrator, log)
    }

    /// Orchestrator inside the test container over a scripted runner
    pub fn container_orchestrator(builder: RunnerBuilder) -> (TestOrchestrator, CallLog) {
        let (runner, log) = builder.build();
        let orchestrator = BuildOrchestrator::new(Arc::new(runner), TestFixtures::workdir()).with_inside_container(true);
        (orchestrator, log)
    }

    /// Create empty files named `names` in `dir`
    pub fn touch(dir: &Path, names: &[&str]) {
        for name in names {
            std::fs::write(dir.join(name), "").unwrap();
        }
    }

    /// Authority settings backed by the fake script, logging into `dir`
    pub fn fake_authority(dir: &Path) -> AuthorityConfig {
        let script = dir.join("fake-authority.sh");
        let body = TestFixtures::FAKE_AUTHORITY.replace("@LOG@", &dir.display().to_string());
        std::fs::write(&script, body).unwrap();

        let script = script.display().to_string();
        AuthorityConfig::new()
            .with_root(dir.join("authority"))
            .with_server_command(["sh".to_string(), script.clone(), "server".to_string()])
            .with_agent_command(["sh".to_string(), script, "agent".to_string()])
            .with_health_checks(10, Duration::from_millis(5))
    }

    pub fn read_lines(path: &Path) -> Vec<String> {
        std::fs::read_to_string(path)
            .map(|text| text.lines().map(str::to_string).collect())
            .unwrap_or_default()
    }
}
