//! Program entry point and test package discovery
//!
//! Both lookups shell out to the Go toolchain through a [`CommandRunner`] and
//! turn its listing output into plain data. Test discovery tolerates noisy
//! output: a line that is not a valid event is logged and skipped.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use shared::{process_info, process_warn, Component, PackageInfo, SharedResult, TestAction, TestEvent};

use crate::error::{HarnessError, HarnessResult};
use crate::services::command::CommandSpec;
use crate::traits::CommandRunner;

/// Package kind of a buildable program
pub const MAIN_PACKAGE: &str = "main";

/// Test name pattern used when listing tests
pub const LIST_ALL_TESTS: &str = ".*";

/// Package catalog keyed by package identifier
pub type PackageCatalog = BTreeMap<String, PackageInfo>;

/// `go list` invocation printing `<name>:<dir>` for every package under `root`
pub fn entry_points_command(root: &Path, env: &BTreeMap<String, String>) -> CommandSpec {
    CommandSpec::new(["go", "list", "-f", "{{.Name}}:{{.Dir}}", "./..."])
        .current_dir(root)
        .envs(env.clone())
        .echo(false)
}

/// Find every buildable program under `root`, as paths relative to it.
///
/// Failing to run the listing means the toolchain or tree is unusable, so it
/// is reported as [`HarnessError::EnvironmentMisconfigured`].
pub async fn find_entry_points<R>(runner: &R, root: &Path, env: &BTreeMap<String, String>) -> HarnessResult<Vec<String>>
where
    R: CommandRunner + ?Sized,
{
    let lines = runner
        .exec_read(&entry_points_command(root, env))
        .await
        .map_err(|e| HarnessError::misconfigured(format!("failed to list program roots under {}: {e}", root.display())))?;

    let roots = parse_entry_points(root, &lines);
    process_info!(Component::Discovery, "Found {} program root(s): {:?}", roots.len(), roots);
    Ok(roots)
}

/// Keep `main` packages from `<name>:<dir>` lines, relativised to `root`
pub fn parse_entry_points(root: &Path, lines: &[String]) -> Vec<String> {
    lines
        .iter()
        .map(|line| line.trim())
        .filter_map(|line| line.split_once(':'))
        .filter(|(name, _)| *name == MAIN_PACKAGE)
        .map(|(_, dir)| relative_dir(root, Path::new(dir)))
        .collect()
}

fn relative_dir(root: &Path, dir: &Path) -> String {
    match dir.strip_prefix(root) {
        Ok(rel) if rel.as_os_str().is_empty() => ".".to_string(),
        Ok(rel) => rel.to_string_lossy().into_owned(),
        Err(_) => dir.to_string_lossy().into_owned(),
    }
}

/// Name of the program built from `root`: the last component of `root`
/// resolved against the directory the toolchain runs in.
///
/// An empty `workdir` means the harness's own working directory.
pub fn command_name(workdir: &Path, root: &str) -> String {
    let root = root.trim_end_matches('/');
    let base = if workdir.as_os_str().is_empty() {
        std::env::current_dir().unwrap_or_default()
    } else {
        workdir.to_path_buf()
    };
    base.join(root)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| root.to_string())
}

/// `go test` invocation listing every test under `root` as JSON events.
///
/// Relative roots are listed from `workdir` as `./<root>/...`; an absolute
/// root is listed from itself.
pub fn test_list_command(workdir: &Path, root: &str, env: &BTreeMap<String, String>) -> CommandSpec {
    let spec = CommandSpec::new(["go", "test", "--list", LIST_ALL_TESTS, "-json"]);
    let spec = if Path::new(root).is_absolute() {
        spec.args(["./..."]).current_dir(PathBuf::from(root))
    } else {
        let trimmed = trim_root(root);
        let pattern = if trimmed.is_empty() {
            "./...".to_string()
        } else {
            format!("./{trimmed}/...")
        };
        spec.args([pattern]).current_dir(workdir)
    };
    spec.envs(env.clone()).echo(false)
}

/// Map every test package under `root` to its tests and output binary name
pub async fn find_tests<R>(
    runner: &R,
    workdir: &Path,
    root: &str,
    env: &BTreeMap<String, String>,
) -> HarnessResult<PackageCatalog>
where
    R: CommandRunner + ?Sized,
{
    process_info!(Component::Discovery, "Finding tests in {}", root);
    let lines = runner.exec_read(&test_list_command(workdir, root, env)).await?;
    Ok(fold_events(&command_name(workdir, root), root, parse_events(&lines)))
}

/// Lazily decode non-empty lines as test events
pub fn parse_events(lines: &[String]) -> impl Iterator<Item = SharedResult<TestEvent>> + '_ {
    lines
        .iter()
        .map(|line| line.trim())
        .filter(|line| !line.is_empty())
        .map(TestEvent::parse)
}

/// Fold decoded events into a catalog, skipping failures
pub fn fold_events<I>(cmd_name: &str, root: &str, events: I) -> PackageCatalog
where
    I: IntoIterator<Item = SharedResult<TestEvent>>,
{
    let mut resolver = RootResolver::new(root);

    events.into_iter().fold(PackageCatalog::new(), |mut catalog, event| {
        let event = match event {
            Ok(event) => event,
            Err(e) => {
                process_warn!(Component::Discovery, "Skipping unparsable listing line: {}", e);
                return catalog;
            }
        };

        let entry = catalog.entry(event.package.clone()).or_insert_with(|| {
            let rel_path = resolver.relative_path(&event.package);
            PackageInfo::new(event.package.clone(), cmd_name, rel_path)
        });

        match event.action {
            TestAction::Output => entry.tests.extend(event.announced_tests().map(str::to_string)),
            TestAction::Skip => entry.tests.clear(),
            TestAction::Other => {}
        }
        catalog
    })
}

fn trim_root(root: &str) -> &str {
    let trimmed = root.trim_start_matches("./").trim_end_matches('/');
    if trimmed == "." {
        ""
    } else {
        trimmed
    }
}

fn root_segments(root: &str) -> Vec<String> {
    if Path::new(root).is_absolute() {
        return Vec::new();
    }
    trim_root(root)
        .split('/')
        .filter(|s| !s.is_empty() && *s != ".")
        .map(str::to_string)
        .collect()
}

fn matches_at(parts: &[&str], segments: &[String], index: usize) -> bool {
    parts.len() >= index + segments.len()
        && parts[index..index + segments.len()]
            .iter()
            .zip(segments)
            .all(|(part, segment)| *part == segment.as_str())
}

fn relative_to_segments(segments: &[String], package: &str) -> String {
    let parts: Vec<&str> = package.split('/').collect();
    if segments.is_empty() {
        return package.to_string();
    }
    match (0..parts.len()).find(|&index| matches_at(&parts, segments, index)) {
        Some(index) => parts[index + segments.len()..].join("/"),
        None => package.to_string(),
    }
}

/// Part of `package` after the first whole-segment occurrence of `root`.
///
/// `app` matches `example.com/repo/app/foo` but not `example.com/myapp/foo`.
/// Returns the package id itself when `root` does not occur.
pub fn relative_package_path(root: &str, package: &str) -> String {
    relative_to_segments(&root_segments(root), package)
}

/// Resolves package ids against the import path of the root package.
///
/// The listing reports the root package before anything nested under it, so
/// the first package ending with the root's segments (or simply the first
/// package, for `.` and absolute roots) pins the import path. Later packages
/// are relativised by prefix, so a module path that contains the root name
/// (`github.com/org/app` built from `app`) stays out of the relative path.
#[derive(Debug)]
struct RootResolver {
    segments: Vec<String>,
    import_path: Option<String>,
}

impl RootResolver {
    fn new(root: &str) -> Self {
        Self {
            segments: root_segments(root),
            import_path: None,
        }
    }

    fn relative_path(&mut self, package: &str) -> String {
        match &self.import_path {
            Some(import_path) if package == import_path.as_str() => String::new(),
            Some(import_path) => match package.strip_prefix(import_path.as_str()).and_then(|rest| rest.strip_prefix('/')) {
                Some(rest) => rest.to_string(),
                None => relative_to_segments(&self.segments, package),
            },
            None => {
                let parts: Vec<&str> = package.split('/').collect();
                let tail = parts.len().saturating_sub(self.segments.len());
                if self.segments.is_empty() || matches_at(&parts, &self.segments, tail) {
                    self.import_path = Some(package.to_string());
                    return String::new();
                }
                relative_to_segments(&self.segments, package)
            }
        }
    }
}
