//! Command line configuration
//!
//! Flags map onto the typed option structs of [`crate::core`]; environment
//! variables that only matter inside the test container are read by the
//! binary and passed in explicitly.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::core::build::{BuildOptions, DEFAULT_OUTPUT};
use crate::core::test_runner::TestRunOptions;
use crate::core::toolchain::ToolchainEnv;
use crate::services::authority::config::DEFAULT_AGENT_ID;
use crate::services::authority::AuthorityConfig;

/// Build and test Go programs against a local workload identity authority
#[derive(Parser, Debug)]
#[command(name = "testrig", version)]
#[command(about = "Builds Go programs and runs their tests in a container with a local identity authority")]
pub struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", global = true)]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Build programs and their test binaries (CGO_ENABLED=0 GOOS=linux GOARCH=amd64 by default)
    Build(BuildArgs),
    /// Run all tests; builds and starts the test container when run on the host
    Test(TestArgs),
    /// List test binaries and the tests they contain
    List(ListArgs),
    /// Run an identity authority with default settings until interrupted
    Authority(AuthorityArgs),
    /// Run a command unless builds are skipped
    Do(DoArgs),
}

/// Target platform flags shared by every toolchain-driven command
#[derive(Args, Debug, Clone)]
pub struct ToolchainArgs {
    /// Keep cgo enabled instead of passing CGO_ENABLED=0
    #[arg(long)]
    pub cgo: bool,

    /// Value passed as GOOS
    #[arg(long, default_value = "linux")]
    pub goos: String,

    /// Value passed as GOARCH
    #[arg(long, default_value = "amd64")]
    pub goarch: String,
}

impl ToolchainArgs {
    pub fn toolchain(&self) -> ToolchainEnv {
        ToolchainEnv::new(self.cgo, self.goos.clone(), self.goarch.clone())
    }
}

#[derive(Args, Debug)]
pub struct BuildArgs {
    /// Program roots to build; discovered when omitted
    pub targets: Vec<String>,

    /// Output folder
    #[arg(short, long, default_value = DEFAULT_OUTPUT)]
    pub output: PathBuf,

    /// Skip compiling individual test packages
    #[arg(long)]
    pub no_tests: bool,

    /// Skip the container image build after the local build
    #[arg(long)]
    pub no_image: bool,

    #[command(flatten)]
    pub toolchain: ToolchainArgs,
}

impl BuildArgs {
    pub fn options(&self, skip_build: bool) -> BuildOptions {
        BuildOptions::default()
            .with_output(self.output.clone())
            .with_compile_tests(!self.no_tests)
            .with_image_build(!self.no_image)
            .with_skip_build(skip_build)
            .with_toolchain(self.toolchain.toolchain())
    }
}

#[derive(Args, Debug)]
pub struct TestArgs {
    /// Program roots to test; discovered when omitted
    pub targets: Vec<String>,

    /// Output folder
    #[arg(short, long, default_value = DEFAULT_OUTPUT)]
    pub output: PathBuf,

    /// Run tests without an identity authority
    #[arg(long)]
    pub no_authority: bool,

    /// Start every test under the debugger, listening on port 40000
    #[arg(short, long)]
    pub debug: bool,

    /// Only run the named test binary, e.g. `app-foo.test`
    #[arg(short = 't', long = "test")]
    pub package: Option<String>,

    #[command(flatten)]
    pub toolchain: ToolchainArgs,
}

impl TestArgs {
    /// Options for this run; `package` and `debug_listen` come from the
    /// container environment and override the flags when present
    pub fn options(&self, skip_build: bool, package: Option<String>, debug_listen: Option<String>) -> TestRunOptions {
        let authority = (!self.no_authority).then(AuthorityConfig::default);
        TestRunOptions::default()
            .with_output(self.output.clone())
            .with_toolchain(self.toolchain.toolchain())
            .with_skip_build(skip_build)
            .with_authority(authority)
            .with_debug(self.debug)
            .with_debug_listen(debug_listen)
            .with_package(package.or_else(|| self.package.clone()))
    }
}

#[derive(Args, Debug)]
pub struct ListArgs {
    /// Program roots to list; discovered when omitted
    pub targets: Vec<String>,

    #[command(flatten)]
    pub toolchain: ToolchainArgs,
}

#[derive(Args, Debug)]
pub struct AuthorityArgs {
    /// Storage root, reused in place; a temporary directory when omitted
    #[arg(long)]
    pub root: Option<PathBuf>,

    /// Identity the agent attests as
    #[arg(long, default_value = DEFAULT_AGENT_ID)]
    pub agent_id: String,
}

impl AuthorityArgs {
    pub fn config(&self) -> AuthorityConfig {
        let config = AuthorityConfig::new().with_agent_id(self.agent_id.clone());
        match &self.root {
            Some(root) => config.with_root(root.clone()),
            None => config,
        }
    }
}

#[derive(Args, Debug)]
pub struct DoArgs {
    /// Command and its arguments
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
    pub command: Vec<String>,
}
