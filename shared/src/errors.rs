//! Shared error types for the build/test harness

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SharedError {
    #[error("Deserialization failed: {message}")]
    DeserializationError { message: String },

    #[error("Not a test binary name: {name}")]
    InvalidBinaryName { name: String },
}

pub type SharedResult<T> = Result<T, SharedError>;
