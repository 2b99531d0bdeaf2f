//! Scripted tool output and fixed paths used across the test suites

use std::path::PathBuf;

/// Standard test data and fixtures
pub struct TestFixtures;

impl TestFixtures {
    /// Working directory the orchestrator believes it runs in
    pub const WORKDIR: &'static str = "/src";
    pub const OUTPUT: &'static str = "dist";

    pub const APP_PACKAGE: &'static str = "example.com/repo/app";
    pub const APP_FOO_PACKAGE: &'static str = "example.com/repo/app/foo";
    pub const SVC_PACKAGE: &'static str = "example.com/repo/svc";

    /// Program nested under `cmd/` in a module whose own name is `app`
    pub const NESTED_ROOT: &'static str = "cmd/app";
    pub const NESTED_PACKAGE: &'static str = "github.com/org/app/cmd/app";
    pub const NESTED_FOO_PACKAGE: &'static str = "github.com/org/app/cmd/app/foo";

    pub const IMAGE_ID: &'static str = "3f2a1b9c7d";
    pub const CONTAINER_ID: &'static str = "a1b2c3d4";

    pub fn workdir() -> PathBuf {
        PathBuf::from(Self::WORKDIR)
    }

    /// `go list` output for a tree with two programs and one library
    pub fn entry_points() -> Vec<String> {
        vec![
            "main:/src/app".to_string(),
            "util:/src/util".to_string(),
            "main:/src/svc".to_string(),
        ]
    }

    /// Test listing command line for a root relative to [`Self::WORKDIR`]
    pub fn listing(root: &str) -> String {
        format!("go test --list .* -json ./{root}/...")
    }

    pub fn output_event(package: &str, output: &str) -> String {
        format!(r#"{{"Time":"2024-01-01T10:00:00Z","Action":"output","Package":"{package}","Output":"{output}"}}"#)
    }

    pub fn skip_event(package: &str) -> String {
        format!(r#"{{"Time":"2024-01-01T10:00:00Z","Action":"skip","Package":"{package}","Elapsed":0}}"#)
    }

    /// Listing of `app`: root package and `foo` both have tests
    pub fn app_events() -> Vec<String> {
        vec![
            Self::output_event(Self::APP_PACKAGE, "TestFoo\\n"),
            Self::output_event(Self::APP_FOO_PACKAGE, "TestBar\\nTestBaz\\n"),
            Self::output_event(Self::APP_FOO_PACKAGE, "ok  \\texample.com/repo/app/foo\\t0.002s\\n"),
        ]
    }

    /// Listing of `svc`: a single package without tests
    pub fn svc_events() -> Vec<String> {
        vec![Self::skip_event(Self::SVC_PACKAGE)]
    }

    /// Listing of [`Self::NESTED_ROOT`]: root package and `foo` both have tests
    pub fn nested_events() -> Vec<String> {
        vec![
            Self::output_event(Self::NESTED_PACKAGE, "TestMain\\n"),
            Self::output_event(Self::NESTED_FOO_PACKAGE, "TestFoo\\n"),
        ]
    }

    pub fn image_build_output() -> Vec<String> {
        vec![
            "Step 1/2 : FROM golang".to_string(),
            " ---> 0123456789ab".to_string(),
            format!("Successfully built {}", Self::IMAGE_ID),
        ]
    }

    pub fn ps_output() -> Vec<String> {
        vec![
            "CONTAINER ID   IMAGE        COMMAND".to_string(),
            format!("{}   {}   \"/bin/testrig test\"", Self::CONTAINER_ID, Self::IMAGE_ID),
        ]
    }

    /// Stand-in for the identity authority programs: `sh fake.sh <role> <action> ...`
    pub const FAKE_AUTHORITY: &'static str = r#"role="$1"; action="$2"; shift 2
log="@LOG@"
case "$action" in
  run) exec sleep 30 ;;
  healthcheck) true ;;
  token) echo "Token: tok-123" ;;
  entry) echo "$*" >> "$log/entries.log" ;;
  *) exit 64 ;;
esac
"#;
}
