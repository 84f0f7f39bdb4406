//! Shared error types used across gallery-storage crates.

use thiserror::Error;

/// Timestamp parsing errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Invalid timestamp '{value}': {message}")]
pub struct TimestampError {
    /// The value that failed to parse.
    pub value: String,
    /// Parser message.
    pub message: String,
}

/// Raised when an image class string is neither `original` nor `final`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Unknown image class: {0}")]
pub struct ClassParseError(pub String);
