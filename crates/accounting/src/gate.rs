//! Cache-or-recompute gate.
//!
//! Reads are served from the persisted counters while they are younger than
//! the TTL. Older (or never reconciled) counters, and every forced read,
//! trigger a reconciliation whose committed result is re-read and returned.
//! Callers that gate money or quota always force.

use std::sync::Arc;

use gallery_storage_common::{Clock, Timestamp, DEFAULT_CACHE_TTL_MS};

use crate::aggregate::SizeAggregator;
use crate::counter::CounterStore;
use crate::error::AccountingError;
use crate::records::GalleryRecordStore;
use crate::reconcile::Reconciler;
use crate::types::{AccountingSettings, GalleryStorageRecord, StorageSnapshot};

/// What to do when a recompute cannot aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Surface `AggregationFailed`. Required for enforcement paths.
    FailClosed,
    /// Serve the persisted counters, flagged `stale`. For display reads.
    StaleOnFailure,
}

/// Serves storage snapshots, recomputing when the cache is stale.
pub struct StorageGate {
    reconciler: Arc<Reconciler>,
    ttl_ms: u64,
}

impl StorageGate {
    /// Create a gate with the default 5 minute TTL.
    ///
    /// # Arguments
    /// * `reconciler` - Reconciler used on cache misses
    pub fn new(reconciler: Arc<Reconciler>) -> Self {
        Self {
            reconciler,
            ttl_ms: DEFAULT_CACHE_TTL_MS,
        }
    }

    /// Wire a gate from settings and collaborators.
    ///
    /// # Arguments
    /// * `settings` - TTL and tolerance
    /// * `records` - Gallery record backend
    /// * `aggregator` - Size aggregation strategy
    /// * `clock` - Time source for cache age and commit stamps
    pub fn from_settings(
        settings: &AccountingSettings,
        records: Arc<dyn GalleryRecordStore>,
        aggregator: Arc<dyn SizeAggregator>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let reconciler: Reconciler = Reconciler::new(aggregator, CounterStore::new(records, clock))
            .with_tolerance_bytes(settings.reconcile_tolerance_bytes)
            .with_max_concurrency(settings.reconcile_concurrency);
        Self::new(Arc::new(reconciler)).with_ttl_ms(settings.cache_ttl_ms)
    }

    /// Set the cache TTL.
    pub fn with_ttl_ms(mut self, ttl_ms: u64) -> Self {
        self.ttl_ms = ttl_ms;
        self
    }

    /// The reconciler behind the gate.
    pub fn reconciler(&self) -> &Arc<Reconciler> {
        &self.reconciler
    }

    /// Storage snapshot for a gallery; aggregation failures are surfaced.
    ///
    /// # Arguments
    /// * `gallery_id` - Gallery identifier
    /// * `force_recalc` - Bypass the cache
    ///
    /// # Errors
    /// `NotFound`, `AggregationFailed`, or a record store error.
    pub async fn get_storage(
        &self,
        gallery_id: &str,
        force_recalc: bool,
    ) -> Result<StorageSnapshot, AccountingError> {
        self.get_storage_with_policy(gallery_id, force_recalc, FailurePolicy::FailClosed)
            .await
    }

    /// Storage snapshot for a gallery with an explicit failure policy.
    ///
    /// # Arguments
    /// * `gallery_id` - Gallery identifier
    /// * `force_recalc` - Bypass the cache
    /// * `policy` - Behaviour when the recompute cannot aggregate
    pub async fn get_storage_with_policy(
        &self,
        gallery_id: &str,
        force_recalc: bool,
        policy: FailurePolicy,
    ) -> Result<StorageSnapshot, AccountingError> {
        let record: GalleryStorageRecord = self.counters().load(gallery_id).await?;
        self.get_storage_for_record(&record, force_recalc, policy)
            .await
    }

    /// Storage snapshot for a record the caller already loaded.
    ///
    /// # Arguments
    /// * `record` - Current gallery record
    /// * `force_recalc` - Bypass the cache
    /// * `policy` - Behaviour when the recompute cannot aggregate
    pub async fn get_storage_for_record(
        &self,
        record: &GalleryStorageRecord,
        force_recalc: bool,
        policy: FailurePolicy,
    ) -> Result<StorageSnapshot, AccountingError> {
        let now: Timestamp = self.counters().clock().now();
        let cache_age_ms: Option<u64> = record.cache_age_ms(now);

        if !force_recalc {
            if let Some(age) = cache_age_ms.filter(|age| *age < self.ttl_ms) {
                log::debug!("Storage cache hit for gallery {} ({}ms old)", record.gallery_id, age);
                return Ok(StorageSnapshot::from_record(record, true, Some(age)));
            }
        }

        match self.recompute(record).await {
            Ok(fresh) => Ok(StorageSnapshot::from_record(&fresh, false, None)),
            Err(e @ AccountingError::AggregationFailed { .. })
                if policy == FailurePolicy::StaleOnFailure =>
            {
                log::warn!(
                    "Serving stale storage for gallery {}: {}",
                    record.gallery_id,
                    e
                );
                Ok(StorageSnapshot::from_record(record, true, cache_age_ms).into_stale())
            }
            Err(e) => Err(e),
        }
    }

    /// Force a reconciliation and return the committed record.
    ///
    /// # Errors
    /// `NotFound`, `AggregationFailed`, or a record store error.
    pub async fn refresh(&self, gallery_id: &str) -> Result<GalleryStorageRecord, AccountingError> {
        let record: GalleryStorageRecord = self.counters().load(gallery_id).await?;
        self.recompute(&record).await
    }

    async fn recompute(
        &self,
        record: &GalleryStorageRecord,
    ) -> Result<GalleryStorageRecord, AccountingError> {
        self.reconciler.reconcile(record).await?;
        self.counters().load(&record.gallery_id).await
    }

    fn counters(&self) -> &CounterStore {
        self.reconciler.counters()
    }
}
