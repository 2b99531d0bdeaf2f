//! Shared types for the testrig build/test harness
//!
//! Contains the contracts that must agree between the build host and the test
//! context: component identities, environment variable names, the test-binary
//! naming rule and the test-listing event format.

pub mod errors;
pub mod logging;
pub mod messages;
pub mod types;

pub use errors::*;
pub use types::*;

pub use messages::{
    parse_test_binary_name, test_binary_name, PackageInfo, TestAction, TestEvent, TEST_BINARY_SUFFIX,
};
