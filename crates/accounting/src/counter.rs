//! Reconciled counter store.
//!
//! Commits freshly aggregated totals through the record store's conditional
//! write. The commit timestamp is the fencing token: a commit lands only if it
//! is strictly later than the stored one, so concurrent reconciliations of the
//! same gallery resolve to "latest computed timestamp wins" without any lock.

use std::sync::Arc;

use gallery_storage_common::{next_fencing_timestamp, Clock, Timestamp};

use crate::error::AccountingError;
use crate::records::{ConditionalWrite, CounterUpdate, GalleryRecordStore};
use crate::types::{GalleryStorageRecord, StorageTotals};

/// Result of a counter commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    /// Our totals are now the stored totals.
    Applied {
        /// Timestamp the commit carried.
        recalculated_at: Timestamp,
    },
    /// A commit with a later timestamp got there first.
    SupersededBy(GalleryStorageRecord),
}

/// Persists reconciled totals with timestamp fencing.
pub struct CounterStore {
    records: Arc<dyn GalleryRecordStore>,
    clock: Arc<dyn Clock>,
}

impl CounterStore {
    /// Create a counter store.
    ///
    /// # Arguments
    /// * `records` - Gallery record backend
    /// * `clock` - Source of commit timestamps
    pub fn new(records: Arc<dyn GalleryRecordStore>, clock: Arc<dyn Clock>) -> Self {
        Self { records, clock }
    }

    /// The clock commits are stamped with.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Load a gallery record.
    ///
    /// # Errors
    /// `NotFound` if the gallery does not exist.
    pub async fn load(&self, gallery_id: &str) -> Result<GalleryStorageRecord, AccountingError> {
        self.records
            .get(gallery_id)
            .await?
            .ok_or_else(|| AccountingError::NotFound {
                gallery_id: gallery_id.to_string(),
            })
    }

    /// Commit totals for a gallery.
    ///
    /// The commit is stamped with the current time, or one millisecond past
    /// `observed_prior` if the clock has not yet moved beyond it.
    ///
    /// # Arguments
    /// * `gallery_id` - Gallery identifier
    /// * `totals` - Freshly aggregated totals
    /// * `observed_prior` - Latest recalculation timestamp this caller has seen
    ///
    /// # Returns
    /// `Applied`, or `SupersededBy` with the record as it stands after the
    /// winning commit.
    ///
    /// # Errors
    /// `NotFound` if the gallery does not exist.
    pub async fn commit(
        &self,
        gallery_id: &str,
        totals: StorageTotals,
        observed_prior: Option<Timestamp>,
    ) -> Result<CommitOutcome, AccountingError> {
        let recalculated_at: Timestamp = next_fencing_timestamp(self.clock.now(), observed_prior);
        let update: CounterUpdate = CounterUpdate::new(totals, recalculated_at);

        match self
            .records
            .update_counters_if_newer(gallery_id, &update)
            .await?
        {
            ConditionalWrite::Applied => {
                log::debug!(
                    "Committed storage for gallery {}: originals={} finals={} at {}",
                    gallery_id,
                    totals.originals_bytes,
                    totals.finals_bytes,
                    recalculated_at
                );
                Ok(CommitOutcome::Applied { recalculated_at })
            }
            ConditionalWrite::ConditionFailed => {
                let current: GalleryStorageRecord = self.load(gallery_id).await?;
                log::debug!(
                    "Commit at {} for gallery {} superseded by {:?}",
                    recalculated_at,
                    gallery_id,
                    current.last_recalculated_at
                );
                Ok(CommitOutcome::SupersededBy(current))
            }
        }
    }
}
