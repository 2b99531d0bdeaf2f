//! Core shared types and identifiers

use serde::{Deserialize, Serialize};
use std::fmt;

/// Logical component emitting a log line or owning a child process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Component {
    /// Top-level command dispatch
    Harness,
    /// Program and test-binary compilation
    Builder,
    /// Package and test enumeration
    Discovery,
    /// Identity authority server process
    AuthorityServer,
    /// Identity authority agent process
    AuthorityAgent,
    /// Test binary execution inside the test context
    Runner,
    /// Container engine invocations
    Container,
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Component::Harness => write!(f, "harness"),
            Component::Builder => write!(f, "builder"),
            Component::Discovery => write!(f, "discovery"),
            Component::AuthorityServer => write!(f, "authority-server"),
            Component::AuthorityAgent => write!(f, "authority-agent"),
            Component::Runner => write!(f, "runner"),
            Component::Container => write!(f, "container"),
        }
    }
}

/// Environment variable names shared between the host and the test context
pub mod env {
    /// When `true`, build steps are skipped (set for builds nested inside an image build)
    pub const SKIP_BUILD: &str = "TESTRIG_SKIP_BUILD";
    /// Debugger listen address for test binaries run inside the test context
    pub const TEST_DEBUG: &str = "TESTRIG_TEST_DEBUG";
    /// Restricts the container-side run to a single test binary
    pub const TEST_PACKAGE: &str = "TESTRIG_TEST_PACKAGE";
    /// Workload API socket exposed once the identity agent is healthy
    pub const ENDPOINT_SOCKET: &str = "SPIFFE_ENDPOINT_SOCKET";

    /// Returns true when the named variable is set to a truthy value
    pub fn is_truthy(name: &str) -> bool {
        std::env::var(name)
            .map(|value| matches!(value.trim().to_lowercase().as_str(), "true" | "1" | "yes"))
            .unwrap_or(false)
    }
}
