//! End-to-end tests for storage accounting.
//!
//! Covers:
//! - aggregation scenarios for both strategies
//! - reconciliation idempotence and timestamp monotonicity
//! - cache TTL boundary
//! - tolerance-gated retry when a commit loses a race
//! - limit validation with upgrade suggestions

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use gallery_storage::memory::{MemoryImageIndex, MemoryObjectStore};
use gallery_storage::{
    aggregator_for, AccountingError, AccountingSettings, AggregationStrategy, ConditionalWrite,
    CounterStore, CounterUpdate, EnumerationAggregator, FailurePolicy, GalleryRecordStore,
    GalleryStorageRecord, LimitCheck, LimitValidator, MemoryGalleryStore, PlanCatalog,
    PlanDuration, PlanSelection, ReconcileOutcome, ReconcileReport, Reconciler, RecordStoreError,
    SizeAggregator, SqliteGalleryStore, StorageGate, StorageSnapshot, StorageTotals,
};
use gallery_storage_common::{
    Clock, ImageClass, ManualClock, Timestamp, BYTES_PER_GB, DEFAULT_CACHE_TTL_MS,
};

const GB: u64 = BYTES_PER_GB;

fn t0() -> Timestamp {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
}

fn enumeration_settings() -> AccountingSettings {
    AccountingSettings::default().with_strategy(AggregationStrategy::Enumeration {
        bucket: "gallery-images".into(),
    })
}

/// Both backends populated with the same gallery contents.
struct Backends {
    objects: Arc<MemoryObjectStore>,
    index: Arc<MemoryImageIndex>,
}

impl Backends {
    fn new() -> Self {
        Self {
            objects: Arc::new(MemoryObjectStore::new().with_page_size(2)),
            index: Arc::new(MemoryImageIndex::new().with_page_size(2)),
        }
    }

    /// Store an object; index rows exist only for originals and order finals.
    fn put(&self, gallery_id: &str, relative: &str, size: u64) {
        let key: String = format!("{}/{}", gallery_id, relative);
        self.objects.put(key.clone(), size);
        for class in ImageClass::ALL {
            if gallery_storage::counts_toward(gallery_id, class, &key) {
                self.index.put(gallery_id, &key, class, size);
            }
        }
    }

    fn aggregator(&self, settings: &AccountingSettings) -> Arc<dyn SizeAggregator> {
        aggregator_for(settings, self.objects.clone(), self.index.clone())
    }

    fn strategies(&self) -> Vec<Arc<dyn SizeAggregator>> {
        vec![
            self.aggregator(&enumeration_settings()),
            self.aggregator(&AccountingSettings::default()),
        ]
    }
}

#[tokio::test]
async fn scenario_a_originals_only() {
    let backends: Backends = Backends::new();
    backends.put("g1", "originals/a.jpg", 100);
    backends.put("g1", "originals/b.jpg", 200);
    backends.put("g1", "originals/c.jpg", 300);

    for aggregator in backends.strategies() {
        assert_eq!(aggregator.aggregate("g1", ImageClass::Original).await.unwrap(), 600);
        assert_eq!(aggregator.aggregate("g1", ImageClass::Final).await.unwrap(), 0);
    }
}

#[tokio::test]
async fn scenario_b_finals_exclude_previews() {
    let backends: Backends = Backends::new();
    backends.put("g1", "final/o1/a.jpg", 50);
    backends.put("g1", "final/o1/previews/a.jpg", 10);
    backends.put("g1", "final/o2/b.jpg", 70);

    for aggregator in backends.strategies() {
        assert_eq!(aggregator.aggregate("g1", ImageClass::Final).await.unwrap(), 120);
    }
}

struct Engine {
    clock: Arc<ManualClock>,
    records: Arc<MemoryGalleryStore>,
    gate: Arc<StorageGate>,
}

fn engine(backends: &Backends, settings: &AccountingSettings) -> Engine {
    let clock: Arc<ManualClock> = Arc::new(ManualClock::new(t0()));
    let records: Arc<MemoryGalleryStore> = Arc::new(MemoryGalleryStore::new());
    let gate: StorageGate = StorageGate::from_settings(
        settings,
        records.clone(),
        backends.aggregator(settings),
        clock.clone(),
    );
    Engine {
        clock,
        records,
        gate: Arc::new(gate),
    }
}

#[tokio::test]
async fn reconciliation_is_idempotent() {
    let backends: Backends = Backends::new();
    backends.put("g1", "originals/a.jpg", 100);
    backends.put("g1", "final/o1/a.jpg", 40);
    let e: Engine = engine(&backends, &AccountingSettings::default());
    e.records.insert(GalleryStorageRecord::new("g1"));

    let first: StorageSnapshot = e.gate.get_storage("g1", true).await.unwrap();
    let second: StorageSnapshot = e.gate.get_storage("g1", true).await.unwrap();

    assert_eq!(first.originals_bytes_used, second.originals_bytes_used);
    assert_eq!(first.finals_bytes_used, second.finals_bytes_used);
    assert_eq!(second.bytes_used(), 140);
    // Same wall-clock millisecond, yet the second commit still moved forward
    assert!(second.last_recalculated_at > first.last_recalculated_at);
}

#[tokio::test]
async fn cache_ttl_boundary() {
    let backends: Backends = Backends::new();
    backends.put("g1", "originals/a.jpg", 500);
    let e: Engine = engine(&backends, &AccountingSettings::default());
    e.records.insert(
        GalleryStorageRecord::new("g1").with_counters(StorageTotals::new(100, 0), Some(t0())),
    );

    e.clock.set(t0() + Duration::milliseconds(DEFAULT_CACHE_TTL_MS as i64 - 1));
    let hit: StorageSnapshot = e.gate.get_storage("g1", false).await.unwrap();
    assert!(hit.cached);
    assert_eq!(hit.cache_age_ms, Some(299_999));
    assert_eq!(hit.originals_bytes_used, 100);

    e.clock.set(t0() + Duration::milliseconds(DEFAULT_CACHE_TTL_MS as i64 + 1));
    let miss: StorageSnapshot = e.gate.get_storage("g1", false).await.unwrap();
    assert!(!miss.cached);
    assert_eq!(miss.originals_bytes_used, 500);
}

#[tokio::test]
async fn forced_read_bypasses_fresh_cache() {
    let backends: Backends = Backends::new();
    backends.put("g1", "originals/a.jpg", 500);
    let e: Engine = engine(&backends, &AccountingSettings::default());
    e.records.insert(
        GalleryStorageRecord::new("g1").with_counters(StorageTotals::new(100, 0), Some(t0())),
    );

    let snapshot: StorageSnapshot = e.gate.get_storage("g1", true).await.unwrap();
    assert!(!snapshot.cached);
    assert_eq!(snapshot.originals_bytes_used, 500);
}

#[tokio::test]
async fn prefetched_record_entry_point() {
    let backends: Backends = Backends::new();
    backends.put("g1", "originals/a.jpg", 500);
    let e: Engine = engine(&backends, &AccountingSettings::default());
    let record: GalleryStorageRecord =
        GalleryStorageRecord::new("g1").with_counters(StorageTotals::new(100, 0), Some(t0()));
    e.records.insert(record.clone());

    let cached: StorageSnapshot = e
        .gate
        .get_storage_for_record(&record, false, FailurePolicy::FailClosed)
        .await
        .unwrap();
    assert!(cached.cached);
    assert_eq!(e.records.applied_commits("g1").len(), 0);

    let fresh: StorageSnapshot = e
        .gate
        .get_storage_for_record(&record, true, FailurePolicy::FailClosed)
        .await
        .unwrap();
    assert_eq!(fresh.originals_bytes_used, 500);
}

#[tokio::test]
async fn monotonic_timestamps_under_concurrent_commits() {
    let store: Arc<MemoryGalleryStore> = Arc::new(MemoryGalleryStore::new());
    store.insert(GalleryStorageRecord::new("g1"));

    let offsets_ms: Vec<i64> = vec![500, 300, 800, 800, 100, 1000, 900, 200, 700, 1000];
    let mut handles = Vec::new();
    for (i, offset) in offsets_ms.iter().enumerate() {
        let store: Arc<MemoryGalleryStore> = store.clone();
        let update: CounterUpdate = CounterUpdate::new(
            StorageTotals::new(i as u64, 0),
            t0() + Duration::milliseconds(*offset),
        );
        handles.push(tokio::spawn(async move {
            store.update_counters_if_newer("g1", &update).await.unwrap()
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let applied: Vec<Timestamp> = store.applied_commits("g1");
    assert!(applied.windows(2).all(|w| w[0] < w[1]));

    let max: Timestamp = t0() + Duration::milliseconds(1000);
    assert_eq!(applied.last(), Some(&max));
    let record: GalleryStorageRecord = store.get("g1").await.unwrap().unwrap();
    assert_eq!(record.last_recalculated_at, Some(max));
}

/// A commit that lands just before ours, with side effects on the backend.
struct Race {
    winner: CounterUpdate,
    delete_keys: Vec<String>,
}

/// Record store that lets a competing reconciliation win before each write.
struct RacingStore {
    inner: Arc<MemoryGalleryStore>,
    objects: Arc<MemoryObjectStore>,
    races: Mutex<VecDeque<Race>>,
    writes: AtomicUsize,
}

impl RacingStore {
    fn new(inner: Arc<MemoryGalleryStore>, objects: Arc<MemoryObjectStore>, races: Vec<Race>) -> Self {
        Self {
            inner,
            objects,
            races: Mutex::new(races.into()),
            writes: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl GalleryRecordStore for RacingStore {
    async fn get(&self, gallery_id: &str) -> Result<Option<GalleryStorageRecord>, RecordStoreError> {
        self.inner.get(gallery_id).await
    }

    async fn update_counters_if_newer(
        &self,
        gallery_id: &str,
        update: &CounterUpdate,
    ) -> Result<ConditionalWrite, RecordStoreError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let race: Option<Race> = self.races.lock().unwrap().pop_front();
        if let Some(race) = race {
            for key in &race.delete_keys {
                self.objects.delete(key);
            }
            let outcome = self.inner.update_counters_if_newer(gallery_id, &race.winner).await?;
            assert_eq!(outcome, ConditionalWrite::Applied);
        }
        self.inner.update_counters_if_newer(gallery_id, update).await
    }
}

struct RaceFixture {
    objects: Arc<MemoryObjectStore>,
    inner: Arc<MemoryGalleryStore>,
    store: Arc<RacingStore>,
    reconciler: Reconciler,
}

fn race_fixture(races: impl FnOnce(&Arc<MemoryObjectStore>) -> Vec<Race>) -> RaceFixture {
    let objects: Arc<MemoryObjectStore> = Arc::new(MemoryObjectStore::new());
    let inner: Arc<MemoryGalleryStore> = Arc::new(MemoryGalleryStore::new());
    inner.insert(GalleryStorageRecord::new("g1"));
    let store: Arc<RacingStore> =
        Arc::new(RacingStore::new(inner.clone(), objects.clone(), races(&objects)));
    let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(t0()));
    let reconciler: Reconciler = Reconciler::new(
        Arc::new(EnumerationAggregator::new(objects.clone(), "bucket")),
        CounterStore::new(store.clone(), clock),
    );
    RaceFixture {
        objects,
        inner,
        store,
        reconciler,
    }
}

#[tokio::test]
async fn scenario_d_loser_retries_once_after_mid_scan_delete() {
    let t2: Timestamp = t0() + Duration::seconds(2);
    let f: RaceFixture = race_fixture(|objects| {
        objects.put("g1/originals/keep.jpg", 10_000);
        objects.put("g1/originals/deleted.jpg", 2000);
        // The winner scanned after the delete
        vec![Race {
            winner: CounterUpdate::new(StorageTotals::new(10_000, 0), t2),
            delete_keys: vec!["g1/originals/deleted.jpg".into()],
        }]
    });

    let report: ReconcileReport = f.reconciler.reconcile_gallery("g1").await.unwrap();

    assert_eq!(report.attempts, 2);
    assert!(report.retried());
    assert_eq!(report.totals, StorageTotals::new(10_000, 0));
    let t3: Timestamp = match report.outcome {
        ReconcileOutcome::Applied { recalculated_at } => recalculated_at,
        other => panic!("expected applied retry, got {:?}", other),
    };
    assert!(t3 > t2);
    assert_eq!(f.inner.applied_commits("g1"), vec![t2, t3]);
    // Loser's first write, then the retry
    assert_eq!(f.store.writes.load(Ordering::SeqCst), 2);
    assert_eq!(f.objects.pages_served(), 4);
}

#[tokio::test]
async fn within_tolerance_no_retry() {
    let t2: Timestamp = t0() + Duration::seconds(2);
    let f: RaceFixture = race_fixture(|objects| {
        objects.put("g1/originals/a.jpg", 10_000);
        vec![Race {
            winner: CounterUpdate::new(StorageTotals::new(10_000 - 1024, 0), t2),
            delete_keys: Vec::new(),
        }]
    });

    let report: ReconcileReport = f.reconciler.reconcile_gallery("g1").await.unwrap();

    assert_eq!(report.attempts, 1);
    assert_eq!(
        report.outcome,
        ReconcileOutcome::DeferredToWinner {
            discrepancy_bytes: 1024
        }
    );
    assert_eq!(f.store.writes.load(Ordering::SeqCst), 1);
    let record: GalleryStorageRecord = f.inner.get("g1").await.unwrap().unwrap();
    assert_eq!(record.originals_bytes_used, 10_000 - 1024);
}

#[tokio::test]
async fn beyond_tolerance_exactly_one_retry() {
    let t2: Timestamp = t0() + Duration::seconds(2);
    let f: RaceFixture = race_fixture(|objects| {
        objects.put("g1/originals/a.jpg", 10_000);
        vec![Race {
            winner: CounterUpdate::new(StorageTotals::new(10_000 - 1025, 0), t2),
            delete_keys: Vec::new(),
        }]
    });

    let report: ReconcileReport = f.reconciler.reconcile_gallery("g1").await.unwrap();
    assert_eq!(report.attempts, 2);
    assert_eq!(f.store.writes.load(Ordering::SeqCst), 2);
    let record: GalleryStorageRecord = f.inner.get("g1").await.unwrap().unwrap();
    assert_eq!(record.originals_bytes_used, 10_000);
}

#[tokio::test]
async fn second_loss_is_accepted() {
    let t2: Timestamp = t0() + Duration::seconds(2);
    let t4: Timestamp = t0() + Duration::seconds(10);
    let f: RaceFixture = race_fixture(|objects| {
        objects.put("g1/originals/a.jpg", 10_000);
        vec![
            Race {
                winner: CounterUpdate::new(StorageTotals::new(5000, 0), t2),
                delete_keys: Vec::new(),
            },
            Race {
                winner: CounterUpdate::new(StorageTotals::new(6000, 0), t4),
                delete_keys: Vec::new(),
            },
        ]
    });

    let report: ReconcileReport = f.reconciler.reconcile_gallery("g1").await.unwrap();
    assert_eq!(report.attempts, 2);
    assert_eq!(
        report.outcome,
        ReconcileOutcome::RetryLost {
            discrepancy_bytes: 4000
        }
    );
    // No third attempt
    assert_eq!(f.store.writes.load(Ordering::SeqCst), 2);
    let record: GalleryStorageRecord = f.inner.get("g1").await.unwrap().unwrap();
    assert_eq!(record.originals_bytes_used, 6000);
    assert_eq!(record.last_recalculated_at, Some(t4));
}

fn validator(backends: &Backends) -> (Engine, LimitValidator) {
    let e: Engine = engine(backends, &AccountingSettings::default());
    let validator: LimitValidator = LimitValidator::new(e.gate.clone(), PlanCatalog::default());
    (e, validator)
}

#[tokio::test]
async fn scenario_c_over_limit_suggests_next_tier() {
    let backends: Backends = Backends::new();
    backends.put("g1", "originals/big.raw", 9 * GB + GB / 2);
    let (e, validator) = validator(&backends);
    e.records.insert(
        GalleryStorageRecord::new("g1")
            .with_limits(Some(10 * GB), Some(10 * GB))
            .with_plan(PlanSelection::new("10GB-3m", PlanDuration::ThreeMonths))
            .with_selection_enabled(true),
    );

    let check: LimitCheck = validator.validate("g1", GB).await.unwrap();

    assert!(!check.within_limit);
    assert_eq!(check.projected_usage, 10 * GB + GB / 2);
    assert_eq!(check.excess_bytes, GB / 2);
    let tier = check.suggested_tier.unwrap();
    assert_eq!(tier.plan_key, "25GB-3m");
    assert_eq!(tier.duration, PlanDuration::ThreeMonths);
    assert!(tier.storage_limit_bytes >= 10 * GB + GB / 2);
}

#[tokio::test]
async fn validation_ignores_fresh_cache() {
    let backends: Backends = Backends::new();
    backends.put("g1", "originals/a.jpg", 2 * GB);
    let (e, validator) = validator(&backends);
    // Cached counters claim the gallery is nearly empty
    e.records.insert(
        GalleryStorageRecord::new("g1")
            .with_counters(StorageTotals::new(1, 0), Some(t0()))
            .with_limits(Some(3 * GB), None)
            .with_plan(PlanSelection::new("3GB-1m", PlanDuration::OneMonth)),
    );

    let check: LimitCheck = validator.validate("g1", 2 * GB).await.unwrap();
    assert!(!check.within_limit);
    assert_eq!(check.excess_bytes, GB);
}

#[tokio::test]
async fn draft_gallery_always_within_limit() {
    let backends: Backends = Backends::new();
    backends.put("g1", "originals/a.jpg", 50 * GB);
    let (e, validator) = validator(&backends);
    e.records.insert(GalleryStorageRecord::new("g1"));

    let check: LimitCheck = validator.validate("g1", 50 * GB).await.unwrap();
    assert!(check.within_limit);
    assert_eq!(check.limit_bytes, None);
}

#[tokio::test]
async fn ensure_within_limit_returns_limit_exceeded() {
    let backends: Backends = Backends::new();
    backends.put("g1", "originals/a.jpg", GB);
    let (e, validator) = validator(&backends);
    e.records.insert(
        GalleryStorageRecord::new("g1")
            .with_limits(Some(GB), None)
            .with_plan(PlanSelection::new("1GB-12m", PlanDuration::TwelveMonths)),
    );

    let err: AccountingError = validator
        .ensure_within_limit("g1", ImageClass::Original, 1)
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 413);
    match err {
        AccountingError::LimitExceeded { check, .. } => {
            assert_eq!(check.excess_bytes, 1);
            assert_eq!(check.suggested_tier.unwrap().plan_key, "3GB-12m");
        }
        other => panic!("unexpected error: {other}"),
    }

    let ok: LimitCheck = validator
        .ensure_within_limit("g1", ImageClass::Original, 0)
        .await
        .unwrap();
    assert!(ok.within_limit);
}

#[tokio::test]
async fn validation_fails_closed() {
    let objects: Arc<MemoryObjectStore> = Arc::new(MemoryObjectStore::new().failing_on_page(1));
    let records: Arc<MemoryGalleryStore> = Arc::new(MemoryGalleryStore::new());
    records.insert(
        GalleryStorageRecord::new("g1")
            .with_counters(StorageTotals::new(0, 0), Some(t0()))
            .with_limits(Some(GB), None),
    );
    let gate: StorageGate = StorageGate::from_settings(
        &enumeration_settings(),
        records,
        Arc::new(EnumerationAggregator::new(objects, "gallery-images")),
        Arc::new(ManualClock::new(t0())),
    );
    let validator: LimitValidator = LimitValidator::new(Arc::new(gate), PlanCatalog::default());

    let err: AccountingError = validator.validate("g1", 1).await.unwrap_err();
    assert!(matches!(
        err,
        AccountingError::AggregationFailed {
            class: ImageClass::Original,
            ..
        }
    ));
}

#[tokio::test]
async fn sqlite_backed_gate() {
    let dir = tempfile::tempdir().unwrap();
    let records: Arc<SqliteGalleryStore> =
        Arc::new(SqliteGalleryStore::open(&dir.path().join("galleries.db")).unwrap());
    records
        .upsert_gallery(&GalleryStorageRecord::new("g1").with_limits(Some(GB), Some(GB)))
        .unwrap();

    let backends: Backends = Backends::new();
    backends.put("g1", "originals/a.jpg", 100);
    backends.put("g1", "final/o1/a.jpg", 50);
    backends.put("g1", "final/o1/thumbs/a.jpg", 5);

    let clock: Arc<ManualClock> = Arc::new(ManualClock::new(t0()));
    let gate: StorageGate = StorageGate::from_settings(
        &AccountingSettings::default(),
        records.clone(),
        backends.aggregator(&enumeration_settings()),
        clock.clone(),
    );

    let first: StorageSnapshot = gate.get_storage("g1", false).await.unwrap();
    assert!(!first.cached);
    assert_eq!((first.originals_bytes_used, first.finals_bytes_used), (100, 50));

    clock.advance_ms(1000);
    let second: StorageSnapshot = gate.get_storage("g1", false).await.unwrap();
    assert!(second.cached);
    assert_eq!(second.cache_age_ms, Some(1000));

    let stored: GalleryStorageRecord = records.get("g1").await.unwrap().unwrap();
    assert_eq!(stored.bytes_used, 150);
}
