//! Common test utilities shared by the unit and integration suites

#![allow(dead_code)]

pub mod fixtures;
pub mod helpers;

pub use fixtures::TestFixtures;
pub use helpers::{Call, CallLog, RunnerBuilder, TestHelpers};
