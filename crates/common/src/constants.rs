//! Shared constants used across gallery-storage crates.

/// Freshness window for persisted counters (5 minutes).
/// Reads younger than this are served from the gallery record without recomputing.
pub const DEFAULT_CACHE_TTL_MS: u64 = 5 * 60 * 1000;

/// Absolute byte difference a losing reconciliation tolerates before retrying.
/// Absorbs objects written or deleted while a listing was in flight.
pub const DEFAULT_RECONCILE_TOLERANCE_BYTES: u64 = 1024;

/// Upper bound on listing/query pages per aggregation.
/// Exceeding it fails the aggregation rather than returning a partial sum.
pub const DEFAULT_MAX_PAGES: u32 = 10_000;

/// Default number of galleries reconciled concurrently by batch callers.
pub const DEFAULT_RECONCILE_CONCURRENCY: usize = 8;

/// Bytes per megabyte for display formatting (1024²).
pub const BYTES_PER_MB: u64 = 1024 * 1024;

/// Bytes per gigabyte (1024³).
pub const BYTES_PER_GB: u64 = 1024 * 1024 * 1024;

/// Object key segment holding original uploads.
pub const ORIGINALS_SEGMENT: &str = "originals";

/// Object key segment holding delivered finals.
pub const FINALS_SEGMENT: &str = "final";
