//! Persistence for gallery storage records.
//!
//! The record store is the only shared mutable state in the engine. Counter
//! fields change exclusively through
//! [`GalleryRecordStore::update_counters_if_newer`], a conditional write whose
//! precondition fences out any commit that is not strictly later than the one
//! already stored.

mod backend;
mod error;
mod memory;
mod sqlite;

pub use backend::{ConditionalWrite, CounterUpdate, GalleryRecordStore};
pub use error::RecordStoreError;
pub use memory::MemoryGalleryStore;
pub use sqlite::SqliteGalleryStore;
