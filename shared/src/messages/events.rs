//! Structured test-listing events
//!
//! One JSON object per line, as emitted by the test tool's `-json` listing mode.

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

use crate::errors::{SharedError, SharedResult};

/// Action carried by a [`TestEvent`]
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TestAction {
    /// A line of test output; test names are reported this way during listing
    Output,
    /// The package has no runnable tests
    Skip,
    #[default]
    #[serde(other)]
    Other,
}

/// Single structured record from a test-listing run
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
#[serde(rename_all = "PascalCase", default)]
pub struct TestEvent {
    pub time: Option<DateTime<FixedOffset>>,
    pub action: TestAction,
    pub package: String,
    pub test: Option<String>,
    /// Seconds
    pub elapsed: f64,
    pub output: String,
}

impl TestEvent {
    /// Prefix every discoverable test function name starts with
    pub const TEST_NAME_PREFIX: &'static str = "Test";

    /// Decode one line of listing output
    pub fn parse(line: &str) -> SharedResult<Self> {
        serde_json::from_str(line).map_err(|e| SharedError::DeserializationError {
            message: format!("{e}: {line}"),
        })
    }

    /// Test names announced by an `output` event, in payload order
    pub fn announced_tests(&self) -> impl Iterator<Item = &str> {
        self.output
            .trim()
            .split('\n')
            .filter(|line| line.starts_with(Self::TEST_NAME_PREFIX))
    }
}
