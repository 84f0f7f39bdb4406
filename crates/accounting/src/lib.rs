//! Storage accounting and reconciliation for photo galleries.
//!
//! This crate tracks how many bytes of originals and finals each gallery
//! uses, keeps those counters consistent with the backing object store or
//! image index despite concurrent uploads and deletes, and enforces plan
//! limits before uploads are admitted.
//!
//! # Components
//!
//! - **Size Aggregator** - sums a gallery's bytes per image class, by object
//!   enumeration or by index query
//! - **Counter Store** - commits totals through a timestamp-fenced
//!   conditional write
//! - **Reconciler** - aggregates, commits, and settles lost races with a
//!   tolerance check and at most one retry
//! - **Storage Gate** - serves cached counters within a TTL, recomputes
//!   otherwise
//! - **Limit Validator** - admits or rejects uploads against the plan and
//!   suggests an upgrade
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use gallery_storage::{aggregator_for, AccountingSettings, FailurePolicy, StorageGate};
//! use gallery_storage_common::SystemClock;
//!
//! let settings = AccountingSettings::default();
//! let aggregator = aggregator_for(&settings, lister, index);
//! let gate = StorageGate::from_settings(&settings, records, aggregator, Arc::new(SystemClock));
//!
//! // Dashboard read: cache-eligible, stale counters on backend failure
//! let snapshot = gate
//!     .get_storage_with_policy("gallery-1", false, FailurePolicy::StaleOnFailure)
//!     .await?;
//! ```

pub mod aggregate;
mod counter;
mod error;
mod gate;
pub mod limits;
pub mod memory;
pub mod records;
mod reconcile;
mod traits;
mod types;

pub use aggregate::{
    aggregator_for, counts_toward, EnumerationAggregator, IndexQueryAggregator, SizeAggregator,
};
pub use counter::{CommitOutcome, CounterStore};
pub use error::{AccountingError, StorageError};
pub use gate::{FailurePolicy, StorageGate};
pub use limits::{
    LimitCheck, LimitValidator, PlanCatalog, PlanDuration, PlanSelection, PlanTier,
    TierSuggestion,
};
pub use records::{
    ConditionalWrite, CounterUpdate, GalleryRecordStore, MemoryGalleryStore, RecordStoreError,
    SqliteGalleryStore,
};
pub use reconcile::{ReconcileOutcome, ReconcileReport, Reconciler, StorageEvent};
pub use traits::{
    CursorValue, ImageIndex, IndexCursor, IndexPage, ObjectInfo, ObjectLister, ObjectPage,
};
pub use types::{
    AccountingSettings, AggregationStrategy, GalleryStorageRecord, SnapshotDisplay,
    StorageSnapshot, StorageTotals,
};
