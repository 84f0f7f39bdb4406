//! Shared data structures for storage accounting.

use gallery_storage_common::{
    format_mb, ImageClass, Timestamp, DEFAULT_CACHE_TTL_MS, DEFAULT_MAX_PAGES,
    DEFAULT_RECONCILE_CONCURRENCY, DEFAULT_RECONCILE_TOLERANCE_BYTES,
};
use serde::{Deserialize, Serialize};

use crate::limits::PlanSelection;

/// Persisted storage counters and plan ceilings for one gallery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GalleryStorageRecord {
    /// Gallery identifier (primary key).
    pub gallery_id: String,
    /// Bytes used by original uploads.
    #[serde(default)]
    pub originals_bytes_used: u64,
    /// Bytes used by delivered finals.
    #[serde(default)]
    pub finals_bytes_used: u64,
    /// Legacy total, always `originals + finals` after a commit.
    #[serde(default)]
    pub bytes_used: u64,
    /// Time of the last successful reconciliation write.
    #[serde(default, rename = "lastBytesUsedRecalculatedAt")]
    pub last_recalculated_at: Option<Timestamp>,
    /// Plan ceiling for originals.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub originals_limit_bytes: Option<u64>,
    /// Plan ceiling for finals.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finals_limit_bytes: Option<u64>,
    /// Legacy single ceiling.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_limit_bytes: Option<u64>,
    /// Chosen plan; `None` while the gallery is a draft.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<PlanSelection>,
    /// Whether client selection is enabled (affects pricing).
    #[serde(default)]
    pub selection_enabled: bool,
}

impl GalleryStorageRecord {
    /// Create a freshly created gallery record with empty counters.
    ///
    /// # Arguments
    /// * `gallery_id` - Gallery identifier
    pub fn new(gallery_id: impl Into<String>) -> Self {
        Self {
            gallery_id: gallery_id.into(),
            originals_bytes_used: 0,
            finals_bytes_used: 0,
            bytes_used: 0,
            last_recalculated_at: None,
            originals_limit_bytes: None,
            finals_limit_bytes: None,
            storage_limit_bytes: None,
            plan: None,
            selection_enabled: false,
        }
    }

    /// Set plan ceilings.
    pub fn with_limits(mut self, originals: Option<u64>, finals: Option<u64>) -> Self {
        self.originals_limit_bytes = originals;
        self.finals_limit_bytes = finals;
        self
    }

    /// Set the chosen plan.
    pub fn with_plan(mut self, plan: PlanSelection) -> Self {
        self.plan = Some(plan);
        self
    }

    /// Set client selection eligibility.
    pub fn with_selection_enabled(mut self, enabled: bool) -> Self {
        self.selection_enabled = enabled;
        self
    }

    /// Set persisted counters as of a given reconciliation time.
    pub fn with_counters(mut self, totals: StorageTotals, at: Option<Timestamp>) -> Self {
        self.originals_bytes_used = totals.originals_bytes;
        self.finals_bytes_used = totals.finals_bytes;
        self.bytes_used = totals.total();
        self.last_recalculated_at = at;
        self
    }

    /// Persisted counters as totals.
    pub fn totals(&self) -> StorageTotals {
        StorageTotals::new(self.originals_bytes_used, self.finals_bytes_used)
    }

    /// Persisted usage for one class.
    pub fn bytes_used_for(&self, class: ImageClass) -> u64 {
        self.totals().get(class)
    }

    /// Ceiling for one class. Originals fall back to the legacy single
    /// ceiling for galleries created before per-class limits existed.
    pub fn limit_for(&self, class: ImageClass) -> Option<u64> {
        match class {
            ImageClass::Original => self.originals_limit_bytes.or(self.storage_limit_bytes),
            ImageClass::Final => self.finals_limit_bytes,
        }
    }

    /// Milliseconds since the last reconciliation.
    ///
    /// # Returns
    /// `None` if the gallery was never reconciled. A timestamp in the future
    /// (clock skew) reads as age zero.
    pub fn cache_age_ms(&self, now: Timestamp) -> Option<u64> {
        self.last_recalculated_at
            .map(|at| (now - at).num_milliseconds().max(0) as u64)
    }
}

/// Byte totals for both image classes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageTotals {
    /// Bytes of originals.
    pub originals_bytes: u64,
    /// Bytes of finals.
    pub finals_bytes: u64,
}

impl StorageTotals {
    /// Create totals.
    pub fn new(originals_bytes: u64, finals_bytes: u64) -> Self {
        Self {
            originals_bytes,
            finals_bytes,
        }
    }

    /// Combined total.
    pub fn total(&self) -> u64 {
        self.originals_bytes.saturating_add(self.finals_bytes)
    }

    /// Bytes for one class.
    pub fn get(&self, class: ImageClass) -> u64 {
        match class {
            ImageClass::Original => self.originals_bytes,
            ImageClass::Final => self.finals_bytes,
        }
    }

    /// Set bytes for one class.
    pub fn set(&mut self, class: ImageClass, bytes: u64) {
        match class {
            ImageClass::Original => self.originals_bytes = bytes,
            ImageClass::Final => self.finals_bytes = bytes,
        }
    }

    /// Sum of per-class absolute differences.
    pub fn discrepancy(&self, other: &StorageTotals) -> u64 {
        self.originals_bytes
            .abs_diff(other.originals_bytes)
            .saturating_add(self.finals_bytes.abs_diff(other.finals_bytes))
    }
}

/// Storage usage as returned to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageSnapshot {
    /// Gallery identifier.
    pub gallery_id: String,
    /// Bytes used by originals.
    pub originals_bytes_used: u64,
    /// Bytes used by finals.
    pub finals_bytes_used: u64,
    /// Originals ceiling, if a plan is set.
    pub originals_limit_bytes: Option<u64>,
    /// Finals ceiling, if a plan is set.
    pub finals_limit_bytes: Option<u64>,
    /// Time of the reconciliation these numbers come from.
    #[serde(rename = "lastBytesUsedRecalculatedAt")]
    pub last_recalculated_at: Option<Timestamp>,
    /// Served from persisted counters without recomputing.
    pub cached: bool,
    /// Age of the persisted counters when served from cache.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_age_ms: Option<u64>,
    /// Recompute failed and the persisted counters were served instead.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub stale: bool,
}

impl StorageSnapshot {
    /// Build a snapshot from a gallery record.
    ///
    /// # Arguments
    /// * `record` - Source record
    /// * `cached` - Whether the counters were served without recomputing
    /// * `cache_age_ms` - Measured age of the counters, for cached reads
    pub fn from_record(
        record: &GalleryStorageRecord,
        cached: bool,
        cache_age_ms: Option<u64>,
    ) -> Self {
        Self {
            gallery_id: record.gallery_id.clone(),
            originals_bytes_used: record.originals_bytes_used,
            finals_bytes_used: record.finals_bytes_used,
            originals_limit_bytes: record.limit_for(ImageClass::Original),
            finals_limit_bytes: record.limit_for(ImageClass::Final),
            last_recalculated_at: record.last_recalculated_at,
            cached,
            cache_age_ms,
            stale: false,
        }
    }

    /// Mark the snapshot as a stale fallback.
    pub fn into_stale(mut self) -> Self {
        self.stale = true;
        self
    }

    /// Combined bytes used.
    pub fn bytes_used(&self) -> u64 {
        self.originals_bytes_used
            .saturating_add(self.finals_bytes_used)
    }

    /// Human-readable megabyte values for display callers.
    pub fn display(&self) -> SnapshotDisplay {
        SnapshotDisplay {
            originals_mb: format_mb(self.originals_bytes_used),
            finals_mb: format_mb(self.finals_bytes_used),
            total_mb: format_mb(self.bytes_used()),
            originals_limit_mb: self.originals_limit_bytes.map(format_mb),
            finals_limit_mb: self.finals_limit_bytes.map(format_mb),
        }
    }
}

/// Megabyte strings with two decimals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotDisplay {
    pub originals_mb: String,
    pub finals_mb: String,
    pub total_mb: String,
    pub originals_limit_mb: Option<String>,
    pub finals_limit_mb: Option<String>,
}

/// Which backend the size aggregator reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AggregationStrategy {
    /// List objects under the gallery prefix and sum their sizes.
    Enumeration {
        /// Bucket holding gallery images.
        bucket: String,
    },
    /// Query the per-image index and sum the `size` attribute.
    IndexQuery {
        /// Image metadata table.
        table: String,
        /// Secondary index keyed by gallery id.
        index: String,
    },
}

impl Default for AggregationStrategy {
    fn default() -> Self {
        AggregationStrategy::IndexQuery {
            table: "images".into(),
            index: "galleryId-index".into(),
        }
    }
}

/// Configuration for the accounting engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccountingSettings {
    /// Freshness window for persisted counters in milliseconds.
    pub cache_ttl_ms: u64,
    /// Byte difference a losing reconciliation accepts without retrying.
    pub reconcile_tolerance_bytes: u64,
    /// Maximum listing/query pages per aggregation.
    pub max_pages: u32,
    /// Maximum galleries reconciled at once by batch reconciliation.
    pub reconcile_concurrency: usize,
    /// Aggregation backend.
    pub strategy: AggregationStrategy,
}

impl Default for AccountingSettings {
    fn default() -> Self {
        Self {
            cache_ttl_ms: DEFAULT_CACHE_TTL_MS,
            reconcile_tolerance_bytes: DEFAULT_RECONCILE_TOLERANCE_BYTES,
            max_pages: DEFAULT_MAX_PAGES,
            reconcile_concurrency: DEFAULT_RECONCILE_CONCURRENCY,
            strategy: AggregationStrategy::default(),
        }
    }
}

impl AccountingSettings {
    /// Create settings with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the cache TTL.
    pub fn with_cache_ttl_ms(mut self, ttl_ms: u64) -> Self {
        self.cache_ttl_ms = ttl_ms;
        self
    }

    /// Set the reconciliation tolerance.
    pub fn with_tolerance_bytes(mut self, bytes: u64) -> Self {
        self.reconcile_tolerance_bytes = bytes;
        self
    }

    /// Set the page budget.
    pub fn with_max_pages(mut self, max_pages: u32) -> Self {
        self.max_pages = max_pages;
        self
    }

    /// Set the batch reconciliation concurrency.
    pub fn with_reconcile_concurrency(mut self, concurrency: usize) -> Self {
        self.reconcile_concurrency = concurrency;
        self
    }

    /// Set the aggregation backend.
    pub fn with_strategy(mut self, strategy: AggregationStrategy) -> Self {
        self.strategy = strategy;
        self
    }
}
