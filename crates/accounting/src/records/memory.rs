//! In-memory gallery record store.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use gallery_storage_common::Timestamp;

use super::backend::{ConditionalWrite, CounterUpdate, GalleryRecordStore};
use super::error::RecordStoreError;
use crate::types::GalleryStorageRecord;

/// Record store backed by a map, with a log of applied commit timestamps.
#[derive(Debug, Default)]
pub struct MemoryGalleryStore {
    records: Mutex<HashMap<String, GalleryStorageRecord>>,
    applied: Mutex<Vec<(String, Timestamp)>>,
}

impl MemoryGalleryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a gallery record (gallery creation, plan changes).
    pub fn insert(&self, record: GalleryStorageRecord) {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        records.insert(record.gallery_id.clone(), record);
    }

    /// Timestamps of applied commits for one gallery, in commit order.
    pub fn applied_commits(&self, gallery_id: &str) -> Vec<Timestamp> {
        let applied = self.applied.lock().unwrap_or_else(|e| e.into_inner());
        applied
            .iter()
            .filter(|(id, _)| id == gallery_id)
            .map(|(_, ts)| *ts)
            .collect()
    }
}

#[async_trait]
impl GalleryRecordStore for MemoryGalleryStore {
    async fn get(&self, gallery_id: &str) -> Result<Option<GalleryStorageRecord>, RecordStoreError> {
        let records = self.records.lock().map_err(|_| RecordStoreError::LockPoisoned)?;
        Ok(records.get(gallery_id).cloned())
    }

    async fn update_counters_if_newer(
        &self,
        gallery_id: &str,
        update: &CounterUpdate,
    ) -> Result<ConditionalWrite, RecordStoreError> {
        let mut records = self.records.lock().map_err(|_| RecordStoreError::LockPoisoned)?;
        let Some(record) = records.get_mut(gallery_id) else {
            return Ok(ConditionalWrite::ConditionFailed);
        };

        let newer: bool = record
            .last_recalculated_at
            .map_or(true, |stored| stored < update.recalculated_at);
        if !newer {
            return Ok(ConditionalWrite::ConditionFailed);
        }

        record.originals_bytes_used = update.totals.originals_bytes;
        record.finals_bytes_used = update.totals.finals_bytes;
        record.bytes_used = update.totals.total();
        record.last_recalculated_at = Some(update.recalculated_at);

        let mut applied = self.applied.lock().map_err(|_| RecordStoreError::LockPoisoned)?;
        applied.push((gallery_id.to_string(), update.recalculated_at));
        Ok(ConditionalWrite::Applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StorageTotals;
    use chrono::{Duration, TimeZone, Utc};

    fn t0() -> Timestamp {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_first_commit_applies() {
        let store: MemoryGalleryStore = MemoryGalleryStore::new();
        store.insert(GalleryStorageRecord::new("g1"));

        let update: CounterUpdate = CounterUpdate::new(StorageTotals::new(10, 5), t0());
        let outcome: ConditionalWrite = store.update_counters_if_newer("g1", &update).await.unwrap();
        assert_eq!(outcome, ConditionalWrite::Applied);

        let record: GalleryStorageRecord = store.get("g1").await.unwrap().unwrap();
        assert_eq!(record.bytes_used, 15);
        assert_eq!(record.last_recalculated_at, Some(t0()));
    }

    #[tokio::test]
    async fn test_equal_or_older_rejected() {
        let store: MemoryGalleryStore = MemoryGalleryStore::new();
        store.insert(
            GalleryStorageRecord::new("g1").with_counters(StorageTotals::new(1, 1), Some(t0())),
        );

        let same: CounterUpdate = CounterUpdate::new(StorageTotals::new(9, 9), t0());
        let older: CounterUpdate =
            CounterUpdate::new(StorageTotals::new(9, 9), t0() - Duration::milliseconds(1));
        assert_eq!(
            store.update_counters_if_newer("g1", &same).await.unwrap(),
            ConditionalWrite::ConditionFailed
        );
        assert_eq!(
            store.update_counters_if_newer("g1", &older).await.unwrap(),
            ConditionalWrite::ConditionFailed
        );
        assert_eq!(
            store.get("g1").await.unwrap().unwrap().totals(),
            StorageTotals::new(1, 1)
        );
    }

    #[tokio::test]
    async fn test_missing_gallery_not_created() {
        let store: MemoryGalleryStore = MemoryGalleryStore::new();
        let update: CounterUpdate = CounterUpdate::new(StorageTotals::new(1, 1), t0());
        assert_eq!(
            store.update_counters_if_newer("ghost", &update).await.unwrap(),
            ConditionalWrite::ConditionFailed
        );
        assert!(store.get("ghost").await.unwrap().is_none());
    }
}
