//! Container engine helpers: environment detection, image builds and test containers

use std::collections::BTreeMap;
use std::path::Path;

use shared::{env, process_info, Component};

use crate::error::{HarnessError, HarnessResult};
use crate::services::command::CommandSpec;
use crate::traits::CommandRunner;

/// Label attached to every test container the harness starts
pub const TEST_CONTAINER_LABEL: &str = "testrig.test";
/// Image build stage that runs the tests
pub const TEST_TARGET: &str = "test";
/// Port the debugger listens on inside a test container
pub const DEBUG_PORT: u16 = 40000;

const BUILT_PREFIX: &str = "Successfully built ";
const PS_HEADER: &str = "CONTAINER";

/// Whether this process runs inside a container
pub fn is_container() -> bool {
    is_container_at(Path::new("/.dockerenv"), Path::new("/proc/self/cgroup"))
}

/// Container detection against explicit marker locations
pub fn is_container_at(marker: &Path, cgroup: &Path) -> bool {
    if marker.exists() {
        return true;
    }
    std::fs::read_to_string(cgroup)
        .map(|text| text.contains("docker") || text.contains("lxc"))
        .unwrap_or(false)
}

/// `docker build` of the current directory with nested builds disabled
pub fn image_build_command(dir: &Path, target: Option<&str>) -> CommandSpec {
    let spec = CommandSpec::new(["docker", "build", "--build-arg"])
        .args([format!("{}=true", env::SKIP_BUILD), ".".to_string()])
        .current_dir(dir);
    match target {
        Some(target) => spec.args(["--target", target]),
        None => spec,
    }
}

/// Build the image stage `target` and return the built image id
pub async fn build_image<R>(runner: &R, dir: &Path, target: &str, overlay: &BTreeMap<String, String>) -> HarnessResult<String>
where
    R: CommandRunner + ?Sized,
{
    process_info!(Component::Container, "Build target {} with docker...", target);
    let lines = runner
        .exec_read(&image_build_command(dir, Some(target)).envs(overlay.clone()))
        .await?;
    parse_built_image(&lines)
}

/// Image id from the final `Successfully built <id>` line
pub fn parse_built_image(lines: &[String]) -> HarnessResult<String> {
    let last = lines.last().map(String::as_str).unwrap_or_default();
    last.trim()
        .strip_prefix(BUILT_PREFIX)
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .ok_or_else(|| HarnessError::parse("container image id", last))
}

/// Container ids from `docker ps` output, header skipped
pub fn parse_container_ids(lines: &[String]) -> Vec<String> {
    lines
        .iter()
        .filter(|line| !line.starts_with(PS_HEADER))
        .filter_map(|line| line.split_whitespace().next())
        .map(str::to_string)
        .collect()
}

/// Kill every running container carrying `label`
pub async fn kill_labelled<R>(runner: &R, dir: &Path, label: &str) -> HarnessResult<Vec<String>>
where
    R: CommandRunner + ?Sized,
{
    let ps = CommandSpec::new(["docker", "ps", "--filter"])
        .args([format!("label={label}")])
        .current_dir(dir)
        .echo(false);
    let ids = parse_container_ids(&runner.exec_read(&ps).await?);

    for id in &ids {
        process_info!(Component::Container, "Killing container {}", id);
        runner
            .exec(&CommandSpec::new(["docker", "kill", id.as_str()]).current_dir(dir))
            .await?;
    }
    Ok(ids)
}

/// Settings for one `docker run` of the test image
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TestContainer {
    pub image: String,
    /// Single test binary to run
    pub package: Option<String>,
    /// Start every test under the debugger
    pub debug: bool,
}

impl TestContainer {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            ..Self::default()
        }
    }

    pub fn with_package(mut self, package: Option<String>) -> Self {
        self.package = package.filter(|p| !p.is_empty());
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn run_command(&self, dir: &Path) -> CommandSpec {
        let mut spec = CommandSpec::new(["docker", "run"]).current_dir(dir);
        if let Some(package) = &self.package {
            spec = spec.args(["-e".to_string(), format!("{}={package}", env::TEST_PACKAGE)]);
        }
        if self.debug {
            spec = spec.args([
                "-e".to_string(),
                format!("{}=:{DEBUG_PORT}", env::TEST_DEBUG),
                "-p".to_string(),
                format!("{DEBUG_PORT}:{DEBUG_PORT}"),
            ]);
        }
        spec.args(["--label", TEST_CONTAINER_LABEL, "--rm", self.image.as_str()])
    }
}
