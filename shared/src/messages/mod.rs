//! Message types crossing the harness boundary
//!
//! - `events`: structured records read from the test-listing tool
//! - `catalog`: discovered test packages and the binary naming contract

pub mod catalog;
pub mod events;

pub use catalog::{parse_test_binary_name, test_binary_name, PackageInfo, TEST_BINARY_SUFFIX};
pub use events::{TestAction, TestEvent};
