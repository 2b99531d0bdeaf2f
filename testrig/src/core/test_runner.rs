//! Test execution on the host and inside the test container
//!
//! On the host, tests are compiled, the `test` image stage is built and one
//! labelled container is run from it. Inside that container the compiled test
//! binaries are found by name, an identity authority is booted for them and
//! each binary is run in turn.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use shared::{logging, parse_test_binary_name, process_info, process_warn, Component, TEST_BINARY_SUFFIX};
use tokio_util::sync::CancellationToken;

use crate::core::build::{BuildOptions, BuildOrchestrator, DEFAULT_OUTPUT};
use crate::core::listing::DEFAULT_BIN_DIR;
use crate::core::toolchain::ToolchainEnv;
use crate::error::{HarnessError, HarnessResult};
use crate::services::authority::{AuthorityConfig, AuthorityEndpoint, IdentityAuthority};
use crate::services::command::CommandSpec;
use crate::services::container::{self, TestContainer, TEST_CONTAINER_LABEL, TEST_TARGET};
use crate::services::discovery::LIST_ALL_TESTS;
use crate::traits::CommandRunner;

/// Logged once the identity authority is up and every entry is registered
pub const AUTHORITY_READY: &str = "TESTRIG: identity authority ready";

const IDENTITY_PREFIX: &str = "spiffe://example.org/";
const DEBUGGER: &str = "dlv";

/// Settings for a test run, on the host or in the container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestRunOptions {
    pub output: PathBuf,
    pub toolchain: ToolchainEnv,
    pub skip_build: bool,
    /// Identity authority to boot in the container; `None` runs tests without one
    pub authority: Option<AuthorityConfig>,
    /// Host side: start the container with the debugger enabled
    pub debug: bool,
    /// Container side: debugger listen address, wraps every test binary when set
    pub debug_listen: Option<String>,
    /// Only run the test binary with this file name
    pub package: Option<String>,
    /// Where compiled test binaries live inside the container
    pub bin_dir: PathBuf,
}

impl Default for TestRunOptions {
    fn default() -> Self {
        Self {
            output: PathBuf::from(DEFAULT_OUTPUT),
            toolchain: ToolchainEnv::default(),
            skip_build: false,
            authority: Some(AuthorityConfig::default()),
            debug: false,
            debug_listen: None,
            package: None,
            bin_dir: PathBuf::from(DEFAULT_BIN_DIR),
        }
    }
}

impl TestRunOptions {
    pub fn with_output(mut self, output: impl Into<PathBuf>) -> Self {
        self.output = output.into();
        self
    }

    pub fn with_toolchain(mut self, toolchain: ToolchainEnv) -> Self {
        self.toolchain = toolchain;
        self
    }

    pub fn with_skip_build(mut self, skip_build: bool) -> Self {
        self.skip_build = skip_build;
        self
    }

    pub fn with_authority(mut self, authority: Option<AuthorityConfig>) -> Self {
        self.authority = authority;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_debug_listen(mut self, listen: Option<String>) -> Self {
        self.debug_listen = listen.filter(|l| !l.is_empty());
        self
    }

    pub fn with_package(mut self, package: Option<String>) -> Self {
        self.package = package.filter(|p| !p.is_empty());
        self
    }

    pub fn with_bin_dir(mut self, bin_dir: impl Into<PathBuf>) -> Self {
        self.bin_dir = bin_dir.into();
        self
    }
}

/// A compiled test binary found in the container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestBinary {
    pub path: PathBuf,
    pub file_name: String,
    /// Program the tests belong to
    pub cmd_name: String,
    /// Package path recovered from the file name
    pub rel_path: String,
    pub tests: Vec<String>,
}

/// Find `*.test` binaries in `bin_dir` whose program is installed next to them
pub async fn scan_test_binaries(bin_dir: &Path) -> HarnessResult<Vec<TestBinary>> {
    let mut entries = tokio::fs::read_dir(bin_dir).await?;
    let mut binaries = Vec::new();

    while let Some(entry) = entries.next_entry().await? {
        let file_name = entry.file_name().to_string_lossy().into_owned();
        if !file_name.ends_with(TEST_BINARY_SUFFIX) {
            continue;
        }
        let (cmd_name, rel_path) = match parse_test_binary_name(&file_name) {
            Ok(parts) => parts,
            Err(e) => {
                process_warn!(Component::Runner, "Test file {} ignored: {}", file_name, e);
                continue;
            }
        };

        let program = bin_dir.join(&cmd_name);
        if !tokio::fs::try_exists(&program).await.unwrap_or(false) {
            process_info!(
                Component::Runner,
                "Test file {} ignored, no application found at {}",
                file_name,
                program.display()
            );
            continue;
        }

        binaries.push(TestBinary {
            path: entry.path(),
            file_name,
            cmd_name,
            rel_path,
            tests: Vec::new(),
        });
    }

    binaries.sort_by(|a, b| a.file_name.cmp(&b.file_name));
    Ok(binaries)
}

/// Look `program` up on `PATH`
pub fn find_in_path(program: &str) -> Option<PathBuf> {
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(program))
        .find(|candidate| candidate.is_file())
}

/// Debugger prefix wrapping each test binary
pub fn debugger_prefix(debugger: &Path, listen: &str) -> Vec<String> {
    vec![
        debugger.display().to_string(),
        format!("--listen={listen}"),
        "--headless=true".to_string(),
        "--api-version=2".to_string(),
        "exec".to_string(),
    ]
}

/// Identity registrations `(spiffe id, selector)` for the binaries about to run
pub fn identity_entries(bin_dir: &Path, binaries: &[TestBinary]) -> Vec<(String, String)> {
    let selector = |name: &str| format!("unix:path:{}", bin_dir.join(name).display());
    let programs: BTreeSet<&str> = binaries.iter().map(|b| b.cmd_name.as_str()).collect();

    let mut entries: Vec<(String, String)> = programs
        .into_iter()
        .map(|program| (format!("{IDENTITY_PREFIX}{program}"), selector(program)))
        .collect();
    entries.push((format!("{IDENTITY_PREFIX}{DEBUGGER}"), selector(DEBUGGER)));
    entries.push((format!("{IDENTITY_PREFIX}any-test"), "unix:uid:0".to_string()));
    entries.extend(
        binaries
            .iter()
            .filter(|b| !b.tests.is_empty())
            .map(|b| (format!("{IDENTITY_PREFIX}{}", b.file_name), selector(&b.file_name))),
    );
    entries
}

impl<R> BuildOrchestrator<R>
where
    R: CommandRunner + 'static,
{
    /// Run tests from the host: build, package the test image, run it
    pub async fn run_tests_on_host(&self, targets: &[String], options: &TestRunOptions) -> HarnessResult<()> {
        let build = BuildOptions::default()
            .with_output(options.output.clone())
            .with_toolchain(options.toolchain.clone())
            .with_skip_build(options.skip_build)
            .with_compile_tests(true)
            .with_image_build(false);
        self.perform_build(targets, &build).await?;

        let listing_env = options.toolchain.listing_env();
        let image = container::build_image(self.runner().as_ref(), self.workdir(), TEST_TARGET, &listing_env).await?;
        container::kill_labelled(self.runner().as_ref(), self.workdir(), TEST_CONTAINER_LABEL).await?;

        let run = TestContainer::new(image)
            .with_package(options.package.clone())
            .with_debug(options.debug);
        self.runner().exec(&run.run_command(self.workdir())).await.map_err(|e| {
            logging::log_error(&Component::Container, "docker run", &e);
            e
        })
    }

    /// List the tests compiled into one binary; failures leave the list empty
    async fn list_binary_tests(&self, binary: &mut TestBinary) {
        let spec = CommandSpec::new([binary.path.display().to_string()])
            .args(["-test.list", LIST_ALL_TESTS])
            .current_dir(self.workdir())
            .echo(false);
        match self.runner().exec_read(&spec).await {
            Ok(lines) => binary.tests = lines.into_iter().filter(|line| !line.is_empty()).collect(),
            Err(e) => logging::log_error(&Component::Runner, &format!("Listing tests of {}", binary.file_name), &e),
        }
        process_info!(Component::Runner, "Found tests for {} {:?}", binary.file_name, binary.tests);
    }

    /// Run every compiled test binary from inside the test container
    pub async fn run_tests_in_container(&self, options: &TestRunOptions, cancel: &CancellationToken) -> HarnessResult<()> {
        let mut binaries = scan_test_binaries(&options.bin_dir).await?;
        for binary in &mut binaries {
            self.list_binary_tests(binary).await;
        }

        let prefix = match &options.debug_listen {
            Some(listen) => {
                let debugger = find_in_path(DEBUGGER)
                    .ok_or_else(|| HarnessError::misconfigured(format!("unable to find {DEBUGGER} in PATH")))?;
                debugger_prefix(&debugger, listen)
            }
            None => Vec::new(),
        };

        let authority = match &options.authority {
            Some(config) => Some(self.boot_authority(config, &options.bin_dir, &binaries, cancel).await?),
            None => None,
        };
        let overlay: BTreeMap<String, String> = authority
            .as_ref()
            .map(|(_, endpoint)| BTreeMap::from([endpoint.env_pair()]))
            .unwrap_or_default();

        let result = match &authority {
            Some((authority, _)) => tokio::select! {
                result = self.run_binaries(&binaries, &prefix, &overlay, options.package.as_deref()) => result,
                lost = authority.stopped() => Err(lost.err().unwrap_or_else(|| HarnessError::Cancelled {
                    operation: "test run".to_string(),
                })),
            },
            None => self.run_binaries(&binaries, &prefix, &overlay, options.package.as_deref()).await,
        };

        if let Some((authority, _)) = &authority {
            authority.stop().await;
        }
        result
    }

    async fn boot_authority(
        &self,
        config: &AuthorityConfig,
        bin_dir: &Path,
        binaries: &[TestBinary],
        cancel: &CancellationToken,
    ) -> HarnessResult<(IdentityAuthority, AuthorityEndpoint)> {
        let authority = IdentityAuthority::new(config.clone())?;
        let endpoint = authority.start(cancel).await?;

        for (spiffe_id, selector) in identity_entries(bin_dir, binaries) {
            if let Err(e) = authority.add_entry(&config.agent_id, &spiffe_id, &selector).await {
                authority.stop().await;
                return Err(e);
            }
        }
        logging::log_success(&Component::Runner, AUTHORITY_READY);
        Ok((authority, endpoint))
    }

    async fn run_binaries(
        &self,
        binaries: &[TestBinary],
        prefix: &[String],
        overlay: &BTreeMap<String, String>,
        selected: Option<&str>,
    ) -> HarnessResult<()> {
        for binary in binaries.iter().filter(|b| !b.tests.is_empty()) {
            if let Some(selected) = selected {
                if selected != binary.file_name {
                    process_info!(
                        Component::Runner,
                        "Testing of {} is skipped since {} is selected",
                        binary.file_name,
                        selected
                    );
                    continue;
                }
            }

            process_info!(Component::Runner, "Running tests for {} ({})", binary.cmd_name, binary.file_name);
            let spec = CommandSpec::new(prefix.iter().cloned())
                .args([binary.path.display().to_string()])
                .current_dir(self.workdir())
                .envs(overlay.clone());
            self.runner().exec(&spec).await?;
        }
        Ok(())
    }
}
