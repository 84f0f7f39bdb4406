//! Shared types and utilities for gallery storage accounting.
//!
//! This crate provides common functionality used across the gallery-storage crates:
//! - Image class partitioning (originals vs. finals)
//! - ISO-8601 timestamp handling and an injectable clock
//! - Display formatting for byte counts
//! - Shared constants and error types

pub mod class;
pub mod constants;
pub mod error;
pub mod format;
pub mod time;

// Re-export commonly used items at crate root
pub use class::ImageClass;
pub use constants::*;
pub use error::{ClassParseError, TimestampError};
pub use format::{bytes_to_mb, format_mb};
pub use time::{
    format_timestamp, next_fencing_timestamp, parse_timestamp, Clock, ManualClock, SystemClock,
    Timestamp,
};
