//! Byte-count display helpers.

use crate::constants::BYTES_PER_MB;

/// Convert bytes to megabytes (1024²).
///
/// # Arguments
/// * `bytes` - Byte count
pub fn bytes_to_mb(bytes: u64) -> f64 {
    bytes as f64 / BYTES_PER_MB as f64
}

/// Format bytes as megabytes with two decimals, e.g. `"1.50"`.
///
/// # Arguments
/// * `bytes` - Byte count
pub fn format_mb(bytes: u64) -> String {
    format!("{:.2}", bytes_to_mb(bytes))
}
