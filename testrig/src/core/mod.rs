//! Build, listing and test orchestration
//!
//! Thin coupling layer over the services: everything here reaches external
//! programs only through [`CommandRunner`](crate::traits::CommandRunner).

pub mod build;
pub mod listing;
pub mod test_runner;
pub mod toolchain;

pub use build::{BuildOptions, BuildOrchestrator, FirstError};
pub use test_runner::{TestBinary, TestRunOptions, AUTHORITY_READY};
pub use toolchain::ToolchainEnv;
