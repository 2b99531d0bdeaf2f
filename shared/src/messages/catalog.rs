//! Test package catalog entries and the test-binary naming contract
//!
//! The host compiles every test package into `<dist>/<out_name>` and the test
//! context later recovers the owning application from the file name alone, so
//! both sides must agree on [`test_binary_name`] bit for bit.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

use crate::errors::{SharedError, SharedResult};

/// Suffix of every compiled test binary
pub const TEST_BINARY_SUFFIX: &str = ".test";

static NON_ALPHANUMERIC: OnceLock<Regex> = OnceLock::new();

fn non_alphanumeric() -> &'static Regex {
    NON_ALPHANUMERIC.get_or_init(|| Regex::new("[^A-Za-z0-9]+").expect("static pattern"))
}

/// Output binary name for the package at `rel_path` under root command `cmd_name`
pub fn test_binary_name(cmd_name: &str, rel_path: &str) -> String {
    if rel_path.is_empty() {
        return format!("{cmd_name}{TEST_BINARY_SUFFIX}");
    }
    let collapsed = non_alphanumeric().replace_all(rel_path, "-");
    format!("{cmd_name}-{collapsed}{TEST_BINARY_SUFFIX}")
}

/// Split a test binary file name back into `(cmd_name, rel_path)`.
///
/// Lossy: every separator in the relative path comes back as `/`.
pub fn parse_test_binary_name(file_name: &str) -> SharedResult<(String, String)> {
    let stem = file_name
        .strip_suffix(TEST_BINARY_SUFFIX)
        .filter(|stem| !stem.is_empty() && !stem.starts_with('-'))
        .ok_or_else(|| SharedError::InvalidBinaryName {
            name: file_name.to_string(),
        })?;

    match stem.split_once('-') {
        Some((cmd_name, rel)) => Ok((cmd_name.to_string(), rel.replace('-', "/"))),
        None => Ok((stem.to_string(), String::new())),
    }
}

/// One discovered test package
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct PackageInfo {
    /// Package identifier as reported by the listing tool
    pub package: String,
    /// Path of the package relative to its build root, empty for the root itself
    pub rel_path: String,
    /// Discovered test names in report order
    pub tests: Vec<String>,
    /// Derived output binary name
    pub out_name: String,
}

impl PackageInfo {
    pub fn new(package: impl Into<String>, cmd_name: &str, rel_path: impl Into<String>) -> Self {
        let rel_path = rel_path.into();
        let out_name = test_binary_name(cmd_name, &rel_path);
        Self {
            package: package.into(),
            rel_path,
            tests: Vec::new(),
            out_name,
        }
    }

    pub fn has_tests(&self) -> bool {
        !self.tests.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_package_name() {
        assert_eq!(test_binary_name("svc", "foo/bar"), "svc-foo-bar.test");
    }

    #[test]
    fn test_root_package_name() {
        assert_eq!(test_binary_name("svc", ""), "svc.test");
    }

    #[test]
    fn test_runs_of_separators_collapse() {
        assert_eq!(test_binary_name("svc", "pkg/.internal__x/v2"), "svc-pkg-internal-x-v2.test");
    }

    #[test]
    fn test_parse_binary_names() {
        assert_eq!(
            parse_test_binary_name("svc-foo-bar.test").unwrap(),
            ("svc".to_string(), "foo/bar".to_string())
        );
        assert_eq!(parse_test_binary_name("svc.test").unwrap(), ("svc".to_string(), String::new()));
        assert!(parse_test_binary_name("svc").is_err());
        assert!(parse_test_binary_name(".test").is_err());
        assert!(parse_test_binary_name("-foo.test").is_err());
    }

    #[test]
    fn test_package_info_derives_name_once() {
        let info = PackageInfo::new("example.com/svc/foo", "svc", "foo");
        assert_eq!(info.out_name, "svc-foo.test");
        assert!(!info.has_tests());
    }
}
