//! Unit tests for the build orchestrator over a scripted runner
//!
//! Every external command is answered by prefix, so these tests pin down which
//! commands are issued, with which arguments and environment, and how their
//! failures surface.

mod common;

use assert_matches::assert_matches;
use common::{RunnerBuilder, TestFixtures, TestHelpers};
use testrig::{BuildOptions, HarnessError, ToolchainEnv};
use tokio_test::{assert_err, assert_ok};

fn options() -> BuildOptions {
    BuildOptions::default()
        .with_output(TestFixtures::OUTPUT)
        .with_image_build(false)
}

/// Explicit targets are built along with one binary per test package
#[tokio::test]
async fn test_build_compiles_programs_and_test_packages() {
    // Arrange
    let (orchestrator, log) = TestHelpers::host_orchestrator(RunnerBuilder::new().go_tree());

    // Act
    let result = orchestrator.perform_build(&["app".to_string()], &options()).await;

    // Assert
    assert_ok!(result);
    assert!(log.contains("go build -o dist/app ./app"));
    assert!(log.contains("go test -c -o dist/app.test ./app"));
    assert!(log.contains("go test -c -o dist/app-foo.test ./app/foo"));
    assert!(log.matching("go list -f").is_empty(), "explicit targets skip discovery");

    let build = &log.matching("go build")[0];
    assert_eq!(build.dir.as_deref(), Some(TestFixtures::workdir().as_path()));
    assert_eq!(build.env.get("CGO_ENABLED").map(String::as_str), Some("0"));
    assert_eq!(build.env.get("GOOS").map(String::as_str), Some("linux"));
    assert_eq!(build.env.get("GOARCH").map(String::as_str), Some("amd64"));

    let listing = &log.matching("go test --list")[0];
    assert!(!listing.env.contains_key("GOOS"));
}

/// A nested root compiles test packages by their path under the root
#[tokio::test]
async fn test_build_nested_root_in_module_named_like_program() {
    // Arrange
    let builder = RunnerBuilder::new().read_in(
        TestFixtures::WORKDIR,
        &TestFixtures::listing(TestFixtures::NESTED_ROOT),
        TestFixtures::nested_events(),
    );
    let (orchestrator, log) = TestHelpers::host_orchestrator(builder);

    // Act
    let result = orchestrator
        .perform_build(&[TestFixtures::NESTED_ROOT.to_string()], &options())
        .await;

    // Assert
    assert_ok!(result);
    assert!(log.contains("go build -o dist/app ./cmd/app"));
    assert!(log.contains("go test -c -o dist/app.test ./cmd/app"));
    assert!(log.contains("go test -c -o dist/app-foo.test ./cmd/app/foo"));
    assert_eq!(log.matching("go test -c").len(), 2);

    let listing = &log.matching("go test --list")[0];
    assert_eq!(listing.dir.as_deref(), Some(TestFixtures::workdir().as_path()));
}

/// Without targets every `main` package under the working directory is built
#[tokio::test]
async fn test_build_discovers_program_roots() {
    // Arrange
    let (orchestrator, log) = TestHelpers::host_orchestrator(RunnerBuilder::new().go_tree());

    // Act
    let result = orchestrator.perform_build(&[], &options()).await;

    // Assert
    assert_ok!(result);
    assert!(log.contains("go build -o dist/app ./app"));
    assert!(log.contains("go build -o dist/svc ./svc"));
    assert!(!log.lines().iter().any(|line| line.contains("util")));
    // svc has no tests, so nothing is compiled for it
    assert!(log.matching("go test -c -o dist/svc").is_empty());
}

/// A failing build is reported while its siblings still run to completion
#[tokio::test]
async fn test_first_failure_surfaces_after_siblings_finish() {
    // Arrange
    let builder = RunnerBuilder::new()
        .fail("go build -o dist/app", "undefined: main")
        .go_tree();
    let (orchestrator, log) = TestHelpers::host_orchestrator(builder);

    // Act
    let result = orchestrator.perform_build(&[], &options()).await;

    // Assert
    let error = assert_err!(result);
    assert_matches!(
        error,
        HarnessError::CommandFailed { ref command, ref stderr_tail, .. }
            if command == "go build -o dist/app ./app" && stderr_tail == &vec!["undefined: main".to_string()]
    );
    assert!(log.contains("go build -o dist/svc ./svc"));
    assert_eq!(log.matching("go test -c").len(), 2);
}

/// A failing test compile fails the build without stopping the other compile
#[tokio::test]
async fn test_test_compile_failure_is_reported() {
    // Arrange
    let builder = RunnerBuilder::new()
        .fail("go test -c -o dist/app-foo.test", "foo_test.go:3: syntax error")
        .go_tree();
    let (orchestrator, log) = TestHelpers::host_orchestrator(builder);

    // Act
    let result = orchestrator.perform_build(&["app".to_string()], &options()).await;

    // Assert
    assert_matches!(result, Err(HarnessError::CommandFailed { .. }));
    assert!(log.contains("go test -c -o dist/app.test ./app"));
}

/// Discovery failures are environment problems
#[tokio::test]
async fn test_entry_point_failure_is_misconfiguration() {
    // Arrange
    let (orchestrator, log) = TestHelpers::host_orchestrator(RunnerBuilder::new().fail("go list -f", "go: not found"));

    // Act
    let result = orchestrator.perform_build(&[], &options()).await;

    // Assert
    assert_matches!(result, Err(HarnessError::EnvironmentMisconfigured { .. }));
    assert!(log.matching("go build").is_empty());
}

#[tokio::test]
async fn test_skip_build_issues_no_commands() {
    // Arrange
    let (orchestrator, log) = TestHelpers::host_orchestrator(RunnerBuilder::new().go_tree());

    // Act
    let result = orchestrator
        .perform_build(&[], &options().with_skip_build(true).with_image_build(true))
        .await;

    // Assert
    assert_ok!(result);
    assert!(log.is_empty());
}

#[tokio::test]
async fn test_no_test_compiles_still_lists_tests() {
    // Arrange
    let (orchestrator, log) = TestHelpers::host_orchestrator(RunnerBuilder::new().go_tree());

    // Act
    let result = orchestrator
        .perform_build(&["app".to_string()], &options().with_compile_tests(false))
        .await;

    // Assert
    assert_ok!(result);
    assert_eq!(log.matching("go test --list").len(), 1);
    assert!(log.matching("go test -c").is_empty());
}

/// The image is built last, and only from the host
#[tokio::test]
async fn test_image_build_only_outside_container() {
    // Arrange
    let (host, host_log) = TestHelpers::host_orchestrator(RunnerBuilder::new().go_tree());
    let (inside, inside_log) = TestHelpers::container_orchestrator(RunnerBuilder::new().go_tree());
    let options = options().with_image_build(true);

    // Act
    assert_ok!(host.perform_build(&["app".to_string()], &options).await);
    assert_ok!(inside.perform_build(&["app".to_string()], &options).await);

    // Assert
    let lines = host_log.lines();
    assert_eq!(
        lines.last().map(String::as_str),
        Some("docker build --build-arg TESTRIG_SKIP_BUILD=true .")
    );
    assert!(inside_log.matching("docker").is_empty());
}

#[tokio::test]
async fn test_image_not_built_after_failed_build() {
    // Arrange
    let builder = RunnerBuilder::new().fail("go build", "boom").go_tree();
    let (orchestrator, log) = TestHelpers::host_orchestrator(builder);

    // Act
    let result = orchestrator
        .perform_build(&["app".to_string()], &options().with_image_build(true))
        .await;

    // Assert
    assert_err!(result);
    assert!(log.matching("docker").is_empty());
}

#[tokio::test]
async fn test_custom_toolchain_reaches_compiler() {
    // Arrange
    let (orchestrator, log) = TestHelpers::host_orchestrator(RunnerBuilder::new().go_tree());
    let options = options().with_toolchain(ToolchainEnv::new(true, "darwin", "arm64"));

    // Act
    assert_ok!(orchestrator.perform_build(&["svc".to_string()], &options).await);

    // Assert
    let build = &log.matching("go build")[0];
    assert!(!build.env.contains_key("CGO_ENABLED"));
    assert_eq!(build.env.get("GOOS").map(String::as_str), Some("darwin"));
    assert_eq!(build.env.get("GOARCH").map(String::as_str), Some("arm64"));
}

#[tokio::test]
async fn test_run_step_respects_skip() {
    // Arrange
    let (orchestrator, log) = TestHelpers::host_orchestrator(RunnerBuilder::new().fail("go vet", "vet: issues"));
    let command = vec!["go".to_string(), "vet".to_string(), "./...".to_string()];

    // Act & Assert
    assert_ok!(orchestrator.run_step(&command, true).await);
    assert!(log.is_empty());

    assert_matches!(orchestrator.run_step(&command, false).await, Err(HarnessError::CommandFailed { .. }));
    assert_eq!(log.lines(), vec!["go vet ./..."]);
    assert_eq!(log.calls()[0].dir.as_deref(), Some(TestFixtures::workdir().as_path()));
}
