//! Gallery record store backend trait.

use async_trait::async_trait;
use gallery_storage_common::Timestamp;

use super::error::RecordStoreError;
use crate::types::{GalleryStorageRecord, StorageTotals};

/// New counter values and the timestamp fencing them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterUpdate {
    /// Freshly aggregated totals.
    pub totals: StorageTotals,
    /// Recalculation timestamp; must be strictly later than the stored one.
    pub recalculated_at: Timestamp,
}

impl CounterUpdate {
    /// Create a counter update.
    pub fn new(totals: StorageTotals, recalculated_at: Timestamp) -> Self {
        Self {
            totals,
            recalculated_at,
        }
    }
}

/// Result of a conditional counter write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionalWrite {
    /// The precondition held and the counters were written.
    Applied,
    /// The stored timestamp was not earlier than ours, or the gallery is missing.
    ConditionFailed,
}

/// Pluggable backend for gallery storage records.
#[async_trait]
pub trait GalleryRecordStore: Send + Sync {
    /// Load a gallery record.
    ///
    /// # Arguments
    /// * `gallery_id` - Gallery identifier
    ///
    /// # Returns
    /// The record, or `None` if the gallery does not exist.
    async fn get(&self, gallery_id: &str) -> Result<Option<GalleryStorageRecord>, RecordStoreError>;

    /// Write counters if the stored recalculation timestamp is absent or
    /// strictly earlier than `update.recalculated_at`.
    ///
    /// Writes `originalsBytesUsed`, `finalsBytesUsed`, the legacy `bytesUsed`
    /// and the timestamp in one atomic operation. Never creates a record.
    ///
    /// Backends that compare the stored timestamp as a string rely on every
    /// writer using the canonical `format_timestamp` form; `get` rejects any
    /// other form as `InvalidRecord`.
    ///
    /// # Arguments
    /// * `gallery_id` - Gallery identifier
    /// * `update` - Counters and fencing timestamp
    async fn update_counters_if_newer(
        &self,
        gallery_id: &str,
        update: &CounterUpdate,
    ) -> Result<ConditionalWrite, RecordStoreError>;
}
