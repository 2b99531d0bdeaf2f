//! testrig library: build and test Go programs against a local identity authority
//!
//! The harness discovers program roots and their test packages, builds them
//! concurrently, and runs the compiled tests inside a container next to a
//! freshly booted workload identity authority (server + agent).

pub mod config;
pub mod core;
pub mod error;
pub mod services;
pub mod traits;

// Re-export commonly used types
pub use core::{BuildOptions, BuildOrchestrator, TestRunOptions, ToolchainEnv};
pub use error::{HarnessError, HarnessResult};
pub use services::{
    AuthorityConfig, AuthorityEndpoint, AuthorityState, CommandSpec, ExitOutcome, IdentityAuthority, ProcessHandle,
    Supervisor,
};
pub use traits::{CommandRunner, MockCommandRunner};
