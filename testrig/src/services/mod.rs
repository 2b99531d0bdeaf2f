//! Service implementations
//!
//! Everything that touches external programs lives here: the supervised
//! process and its runner, toolchain discovery, the identity authority and
//! container engine helpers.

pub mod authority;
pub mod command;
pub mod container;
pub mod discovery;
pub mod output_handler;
pub mod process;
pub mod supervisor;

#[cfg(test)]
mod tests;

// Re-export all service implementations
pub use authority::{AuthorityConfig, AuthorityEndpoint, AuthorityState, IdentityAuthority, TeardownCause};
pub use command::CommandSpec;
pub use discovery::{find_entry_points, find_tests, PackageCatalog};
pub use process::{ExitOutcome, ProcessHandle, ProcessMonitor, ProcessState};
pub use supervisor::Supervisor;
