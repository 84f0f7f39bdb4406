//! Reconciliation: aggregate, commit, and settle races.
//!
//! A reconciliation that loses the commit race compares its totals with the
//! winner's. Within tolerance it defers to the winner. Beyond tolerance it
//! re-aggregates and commits exactly once more; losing again is logged and
//! accepted, which bounds latency and prevents retry storms.

use std::collections::HashSet;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use gallery_storage_common::{
    Timestamp, DEFAULT_RECONCILE_CONCURRENCY, DEFAULT_RECONCILE_TOLERANCE_BYTES,
};

use crate::aggregate::SizeAggregator;
use crate::counter::{CommitOutcome, CounterStore};
use crate::error::AccountingError;
use crate::types::{GalleryStorageRecord, StorageTotals};

/// How a reconciliation settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Our totals were committed.
    Applied { recalculated_at: Timestamp },
    /// We lost the race but the winner's totals were within tolerance.
    DeferredToWinner { discrepancy_bytes: u64 },
    /// We lost the race, retried once, and lost again.
    RetryLost { discrepancy_bytes: u64 },
}

/// Summary of one reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Gallery identifier.
    pub gallery_id: String,
    /// Totals from the last aggregation this reconciliation performed.
    pub totals: StorageTotals,
    /// Commit attempts made (1 or 2).
    pub attempts: u32,
    /// How it settled.
    pub outcome: ReconcileOutcome,
}

impl ReconcileReport {
    /// Whether a second aggregation and commit were attempted.
    pub fn retried(&self) -> bool {
        self.attempts > 1
    }
}

/// An object-store or index change that invalidates a gallery's counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageEvent {
    /// An image was uploaded or a final was delivered.
    ObjectUploaded { gallery_id: String, key: String },
    /// An image was deleted.
    ObjectDeleted { gallery_id: String, key: String },
    /// A batch delete finished.
    BatchDeleteCompleted { gallery_id: String },
}

impl StorageEvent {
    /// Build an upload/delete event from an object key of the form
    /// `{galleryId}/...`.
    ///
    /// # Returns
    /// `None` if the key has no gallery segment.
    pub fn from_object_key(key: &str, deleted: bool) -> Option<Self> {
        let (gallery_id, rest) = key.split_once('/')?;
        if gallery_id.is_empty() || rest.is_empty() {
            return None;
        }
        let gallery_id: String = gallery_id.to_string();
        let key: String = key.to_string();
        Some(if deleted {
            StorageEvent::ObjectDeleted { gallery_id, key }
        } else {
            StorageEvent::ObjectUploaded { gallery_id, key }
        })
    }

    /// Gallery the event applies to.
    pub fn gallery_id(&self) -> &str {
        match self {
            StorageEvent::ObjectUploaded { gallery_id, .. }
            | StorageEvent::ObjectDeleted { gallery_id, .. }
            | StorageEvent::BatchDeleteCompleted { gallery_id } => gallery_id,
        }
    }
}

/// Recomputes gallery totals and commits them through the counter store.
pub struct Reconciler {
    aggregator: Arc<dyn SizeAggregator>,
    counters: CounterStore,
    tolerance_bytes: u64,
    max_concurrency: usize,
}

impl Reconciler {
    /// Create a reconciler with the default tolerance and batch concurrency.
    ///
    /// # Arguments
    /// * `aggregator` - Size aggregation strategy
    /// * `counters` - Counter store to commit through
    pub fn new(aggregator: Arc<dyn SizeAggregator>, counters: CounterStore) -> Self {
        Self {
            aggregator,
            counters,
            tolerance_bytes: DEFAULT_RECONCILE_TOLERANCE_BYTES,
            max_concurrency: DEFAULT_RECONCILE_CONCURRENCY,
        }
    }

    /// Set the byte discrepancy a losing reconciliation accepts.
    pub fn with_tolerance_bytes(mut self, tolerance_bytes: u64) -> Self {
        self.tolerance_bytes = tolerance_bytes;
        self
    }

    /// Set how many galleries [`reconcile_many`](Self::reconcile_many) runs at once.
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    /// The counter store.
    pub fn counters(&self) -> &CounterStore {
        &self.counters
    }

    /// Load a gallery record and reconcile it.
    ///
    /// # Errors
    /// `NotFound`, `AggregationFailed`, or a record store error.
    pub async fn reconcile_gallery(&self, gallery_id: &str) -> Result<ReconcileReport, AccountingError> {
        let record: GalleryStorageRecord = self.counters.load(gallery_id).await?;
        self.reconcile(&record).await
    }

    /// Reconcile a gallery whose record the caller already holds.
    ///
    /// # Arguments
    /// * `record` - Current record; its timestamp seeds the fencing token
    ///
    /// # Errors
    /// `AggregationFailed` if either class cannot be summed (nothing is
    /// written), `NotFound`, or a record store error.
    pub async fn reconcile(&self, record: &GalleryStorageRecord) -> Result<ReconcileReport, AccountingError> {
        let gallery_id: &str = &record.gallery_id;
        let totals: StorageTotals = self.aggregator.aggregate_all(gallery_id).await?;

        let winner: GalleryStorageRecord = match self
            .counters
            .commit(gallery_id, totals, record.last_recalculated_at)
            .await?
        {
            CommitOutcome::Applied { recalculated_at } => {
                return Ok(ReconcileReport {
                    gallery_id: gallery_id.to_string(),
                    totals,
                    attempts: 1,
                    outcome: ReconcileOutcome::Applied { recalculated_at },
                });
            }
            CommitOutcome::SupersededBy(winner) => winner,
        };

        let discrepancy_bytes: u64 = totals.discrepancy(&winner.totals());
        if discrepancy_bytes <= self.tolerance_bytes {
            log::debug!(
                "Gallery {} reconciliation superseded; winner within {} bytes",
                gallery_id,
                discrepancy_bytes
            );
            return Ok(ReconcileReport {
                gallery_id: gallery_id.to_string(),
                totals,
                attempts: 1,
                outcome: ReconcileOutcome::DeferredToWinner { discrepancy_bytes },
            });
        }

        log::info!(
            "Gallery {} reconciliation superseded with {} byte discrepancy (tolerance {}); retrying once",
            gallery_id,
            discrepancy_bytes,
            self.tolerance_bytes
        );

        let retry_totals: StorageTotals = self.aggregator.aggregate_all(gallery_id).await?;
        match self
            .counters
            .commit(gallery_id, retry_totals, winner.last_recalculated_at)
            .await?
        {
            CommitOutcome::Applied { recalculated_at } => Ok(ReconcileReport {
                gallery_id: gallery_id.to_string(),
                totals: retry_totals,
                attempts: 2,
                outcome: ReconcileOutcome::Applied { recalculated_at },
            }),
            CommitOutcome::SupersededBy(second) => {
                let discrepancy_bytes: u64 = retry_totals.discrepancy(&second.totals());
                log::warn!(
                    "Gallery {} reconciliation retry superseded again ({} byte discrepancy); accepting stored totals",
                    gallery_id,
                    discrepancy_bytes
                );
                Ok(ReconcileReport {
                    gallery_id: gallery_id.to_string(),
                    totals: retry_totals,
                    attempts: 2,
                    outcome: ReconcileOutcome::RetryLost { discrepancy_bytes },
                })
            }
        }
    }

    /// Reconcile in response to a storage event.
    ///
    /// Failures are logged and skipped; the next event or read refreshes
    /// the counters.
    pub async fn handle_event(&self, event: &StorageEvent) -> Option<ReconcileReport> {
        match self.reconcile_gallery(event.gallery_id()).await {
            Ok(report) => Some(report),
            Err(e) => {
                log::warn!(
                    "Skipping reconciliation for {:?} (retryable: {}): {}",
                    event,
                    e.is_retryable(),
                    e
                );
                None
            }
        }
    }

    /// Reconcile several galleries concurrently.
    ///
    /// At most `max_concurrency` reconciliations are in flight. Duplicate ids
    /// are reconciled once. Results are returned in completion order.
    ///
    /// # Arguments
    /// * `gallery_ids` - Galleries to reconcile
    pub async fn reconcile_many(
        &self,
        gallery_ids: &[String],
    ) -> Vec<(String, Result<ReconcileReport, AccountingError>)> {
        let mut seen: HashSet<&str> = HashSet::new();
        let unique: Vec<&str> = gallery_ids
            .iter()
            .map(String::as_str)
            .filter(|id| seen.insert(*id))
            .collect();

        stream::iter(unique)
            .map(|gallery_id| async move {
                (gallery_id.to_string(), self.reconcile_gallery(gallery_id).await)
            })
            .buffer_unordered(self.max_concurrency)
            .collect()
            .await
    }
}
