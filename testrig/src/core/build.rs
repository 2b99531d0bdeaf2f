//! Build orchestration: programs, test binaries and the container image
//!
//! Every program build and every test-binary compile runs as its own task.
//! A failing task never cancels its siblings; the first failure is kept in a
//! shared slot and returned once everything has finished.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinSet;

use shared::{logging, process_info, Component, PackageInfo};

use crate::core::toolchain::ToolchainEnv;
use crate::error::{HarnessError, HarnessResult};
use crate::services::command::CommandSpec;
use crate::services::container;
use crate::services::discovery::{command_name, find_entry_points, find_tests};
use crate::traits::CommandRunner;

/// Default directory for compiled programs and test binaries
pub const DEFAULT_OUTPUT: &str = "./dist";

/// Settings for [`BuildOrchestrator::perform_build`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOptions {
    pub output: PathBuf,
    /// Compile one test binary per package that has tests
    pub compile_tests: bool,
    /// Build the container image afterwards (never from inside a container)
    pub image_build: bool,
    /// Short-circuit everything, set for builds nested in an image build
    pub skip_build: bool,
    pub toolchain: ToolchainEnv,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            output: PathBuf::from(DEFAULT_OUTPUT),
            compile_tests: true,
            image_build: true,
            skip_build: false,
            toolchain: ToolchainEnv::default(),
        }
    }
}

impl BuildOptions {
    pub fn with_output(mut self, output: impl Into<PathBuf>) -> Self {
        self.output = output.into();
        self
    }

    pub fn with_compile_tests(mut self, compile_tests: bool) -> Self {
        self.compile_tests = compile_tests;
        self
    }

    pub fn with_image_build(mut self, image_build: bool) -> Self {
        self.image_build = image_build;
        self
    }

    pub fn with_skip_build(mut self, skip_build: bool) -> Self {
        self.skip_build = skip_build;
        self
    }

    pub fn with_toolchain(mut self, toolchain: ToolchainEnv) -> Self {
        self.toolchain = toolchain;
        self
    }
}

/// Slot keeping the first error reported by concurrently running tasks
#[derive(Debug, Clone, Default)]
pub struct FirstError {
    slot: Arc<Mutex<Option<HarnessError>>>,
}

impl FirstError {
    pub fn new() -> Self {
        Self::default()
    }

    /// Log `error` and keep it unless an earlier one is already stored
    pub async fn record(&self, context: &str, error: HarnessError) {
        logging::log_error(&Component::Builder, context, &error);
        let mut slot = self.slot.lock().await;
        if slot.is_none() {
            *slot = Some(error);
        }
    }

    pub async fn take(&self) -> Option<HarnessError> {
        self.slot.lock().await.take()
    }

    /// Wait for every task, recording panics as failures
    pub async fn join(&self, mut tasks: JoinSet<()>) {
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                self.record("build task", e.into()).await;
            }
        }
    }
}

/// Argument naming the package at `rel_path` below `root` for the go tool
pub fn package_arg(root: &str, rel_path: &str) -> String {
    let root = root.trim_end_matches('/');
    let joined = match (root.is_empty(), rel_path.is_empty()) {
        (_, true) => root.to_string(),
        (true, false) => rel_path.to_string(),
        (false, false) => format!("{root}/{rel_path}"),
    };
    if joined.is_empty() {
        ".".to_string()
    } else if joined.starts_with('/') || joined.starts_with('.') {
        joined
    } else {
        format!("./{joined}")
    }
}

/// Drives builds, listings and test runs through an injected [`CommandRunner`]
pub struct BuildOrchestrator<R>
where
    R: CommandRunner + 'static,
{
    runner: Arc<R>,
    workdir: PathBuf,
    inside_container: bool,
}

impl<R> BuildOrchestrator<R>
where
    R: CommandRunner + 'static,
{
    /// Create an orchestrator working in `workdir`
    pub fn new(runner: Arc<R>, workdir: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            workdir: workdir.into(),
            inside_container: container::is_container(),
        }
    }

    /// Override container detection (fluent API)
    pub fn with_inside_container(mut self, inside_container: bool) -> Self {
        self.inside_container = inside_container;
        self
    }

    pub fn runner(&self) -> &Arc<R> {
        &self.runner
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    pub fn inside_container(&self) -> bool {
        self.inside_container
    }

    /// Explicit targets, or every program root under the working directory
    pub async fn resolve_targets(&self, targets: &[String], toolchain: &ToolchainEnv) -> HarnessResult<Vec<String>> {
        if !targets.is_empty() {
            return Ok(targets.to_vec());
        }
        find_entry_points(self.runner.as_ref(), &self.workdir, &toolchain.listing_env()).await
    }

    /// Build every target and, optionally, its test binaries and the image
    pub async fn perform_build(&self, targets: &[String], options: &BuildOptions) -> HarnessResult<()> {
        if options.skip_build {
            logging::log_success(&Component::Builder, "Build is complete on host");
            return Ok(());
        }

        options.toolchain.log();
        let compiler_env = options.toolchain.compiler_env();
        let listing_env = options.toolchain.listing_env();
        let targets = self.resolve_targets(targets, &options.toolchain).await?;

        let errors = FirstError::new();
        let mut tasks = JoinSet::new();
        for target in targets {
            let root = target.trim_end_matches('/').to_string();
            let cmd_name = command_name(&self.workdir, &root);
            let program = options.output.join(&cmd_name);
            logging::log_progress(&Component::Builder, "Building", &format!("{} at {}", cmd_name, root));

            let build = CommandSpec::new(["go", "build", "-o"])
                .args([program.display().to_string(), package_arg(&root, "")])
                .current_dir(&self.workdir)
                .envs(compiler_env.clone());
            tasks.spawn(run_recorded(self.runner.clone(), build, errors.clone()));

            tasks.spawn(build_test_binaries(
                self.runner.clone(),
                TestCompile {
                    workdir: self.workdir.clone(),
                    root: root.clone(),
                    output: options.output.clone(),
                    compile: options.compile_tests,
                    listing_env: listing_env.clone(),
                    compiler_env: compiler_env.clone(),
                },
                errors.clone(),
            ));
        }
        errors.join(tasks).await;

        if let Some(error) = errors.take().await {
            logging::log_error(&Component::Builder, "Build", &error);
            return Err(error);
        }

        if options.image_build && !self.inside_container {
            process_info!(Component::Container, "Building container image");
            let image = container::image_build_command(&self.workdir, None).envs(compiler_env);
            self.runner.exec(&image).await?;
        }

        logging::log_success(&Component::Builder, "Build complete");
        Ok(())
    }

    /// Run an arbitrary build step unless builds are skipped
    pub async fn run_step(&self, args: &[String], skip_build: bool) -> HarnessResult<()> {
        if skip_build {
            process_info!(Component::Harness, "Do {:?} is complete on host", args);
            return Ok(());
        }
        let spec = CommandSpec::new(args.iter().cloned()).current_dir(&self.workdir);
        self.runner.exec(&spec).await
    }
}

struct TestCompile {
    workdir: PathBuf,
    root: String,
    output: PathBuf,
    compile: bool,
    listing_env: BTreeMap<String, String>,
    compiler_env: BTreeMap<String, String>,
}

impl TestCompile {
    fn command(&self, info: &PackageInfo) -> CommandSpec {
        CommandSpec::new(["go", "test", "-c", "-o"])
            .args([
                self.output.join(&info.out_name).display().to_string(),
                package_arg(&self.root, &info.rel_path),
            ])
            .current_dir(&self.workdir)
            .envs(self.compiler_env.clone())
    }
}

async fn run_recorded<R>(runner: Arc<R>, spec: CommandSpec, errors: FirstError)
where
    R: CommandRunner + ?Sized,
{
    if let Err(e) = runner.exec(&spec).await {
        errors.record(&spec.command_line(), e).await;
    }
}

async fn build_test_binaries<R>(runner: Arc<R>, job: TestCompile, errors: FirstError)
where
    R: CommandRunner + 'static,
{
    let catalog = match find_tests(runner.as_ref(), &job.workdir, &job.root, &job.listing_env).await {
        Ok(catalog) => catalog,
        Err(e) => {
            errors.record(&format!("test discovery in {}", job.root), e).await;
            return;
        }
    };

    let mut compiles = JoinSet::new();
    for (package, info) in catalog.iter().filter(|(_, info)| info.has_tests()) {
        process_info!(Component::Discovery, "Found tests {:?} for package {}", info.tests, package);
        if job.compile {
            compiles.spawn(run_recorded(runner.clone(), job.command(info), errors.clone()));
        }
    }
    errors.join(compiles).await;
}
