//! SQLite backend for gallery storage records.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use gallery_storage_common::{format_timestamp, parse_timestamp, Timestamp};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::backend::{ConditionalWrite, CounterUpdate, GalleryRecordStore};
use super::error::RecordStoreError;
use crate::limits::{PlanDuration, PlanSelection};
use crate::types::GalleryStorageRecord;

/// SQLite-based gallery record store.
///
/// Timestamps are stored in their fixed-width RFC 3339 form, so the
/// conditional write can compare them as text.
pub struct SqliteGalleryStore {
    /// Database connection (protected by mutex for thread safety).
    conn: Mutex<Connection>,
    /// Table name (versioned for schema migrations).
    table_name: String,
}

/// Columns as stored, before validation.
struct StoredRow {
    gallery_id: String,
    originals_bytes_used: i64,
    finals_bytes_used: i64,
    bytes_used: i64,
    last_recalculated_at: Option<String>,
    originals_limit_bytes: Option<i64>,
    finals_limit_bytes: Option<i64>,
    storage_limit_bytes: Option<i64>,
    plan_key: Option<String>,
    plan_duration: Option<String>,
    selection_enabled: bool,
}

impl SqliteGalleryStore {
    /// Database schema version.
    const DB_VERSION: u32 = 1;

    /// Create or open a record store at the given path.
    ///
    /// # Arguments
    /// * `db_path` - Path to the SQLite database file
    ///
    /// # Errors
    /// Returns error if the database cannot be opened or initialized.
    pub fn open(db_path: &Path) -> Result<Self, RecordStoreError> {
        let conn: Connection =
            Connection::open(db_path).map_err(|e| RecordStoreError::Sqlite(e.to_string()))?;

        // WAL lets dashboard reads proceed while a reconciliation commits
        conn.execute_batch("PRAGMA journal_mode=WAL;")
            .map_err(|e| RecordStoreError::Sqlite(e.to_string()))?;

        conn.busy_timeout(std::time::Duration::from_secs(5))
            .map_err(|e| RecordStoreError::Sqlite(e.to_string()))?;

        Self::init(conn)
    }

    /// Create a store in a private in-memory database.
    pub fn open_in_memory() -> Result<Self, RecordStoreError> {
        let conn: Connection =
            Connection::open_in_memory().map_err(|e| RecordStoreError::Sqlite(e.to_string()))?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self, RecordStoreError> {
        let table_name: String = format!("gallery_storage_v{}", Self::DB_VERSION);

        let create_sql: String = format!(
            "CREATE TABLE IF NOT EXISTS {} (
                gallery_id TEXT PRIMARY KEY,
                originals_bytes_used INTEGER NOT NULL DEFAULT 0,
                finals_bytes_used INTEGER NOT NULL DEFAULT 0,
                bytes_used INTEGER NOT NULL DEFAULT 0,
                last_recalculated_at TEXT,
                originals_limit_bytes INTEGER,
                finals_limit_bytes INTEGER,
                storage_limit_bytes INTEGER,
                plan_key TEXT,
                plan_duration TEXT,
                selection_enabled INTEGER NOT NULL DEFAULT 0
            )",
            table_name
        );
        conn.execute(&create_sql, [])
            .map_err(|e| RecordStoreError::Sqlite(e.to_string()))?;

        Ok(Self {
            conn: Mutex::new(conn),
            table_name,
        })
    }

    /// Insert or replace a gallery record (gallery creation, plan changes).
    ///
    /// # Arguments
    /// * `record` - Record to store
    pub fn upsert_gallery(&self, record: &GalleryStorageRecord) -> Result<(), RecordStoreError> {
        let conn: MutexGuard<'_, Connection> = self.lock()?;
        conn.execute(
            &format!(
                "INSERT OR REPLACE INTO {} (
                    gallery_id, originals_bytes_used, finals_bytes_used, bytes_used,
                    last_recalculated_at, originals_limit_bytes, finals_limit_bytes,
                    storage_limit_bytes, plan_key, plan_duration, selection_enabled
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                self.table_name
            ),
            params![
                record.gallery_id,
                to_sql_int(record.originals_bytes_used),
                to_sql_int(record.finals_bytes_used),
                to_sql_int(record.bytes_used),
                record.last_recalculated_at.as_ref().map(format_timestamp),
                record.originals_limit_bytes.map(to_sql_int),
                record.finals_limit_bytes.map(to_sql_int),
                record.storage_limit_bytes.map(to_sql_int),
                record.plan.as_ref().map(|p| p.plan_key.clone()),
                record.plan.as_ref().map(|p| p.duration.as_str()),
                record.selection_enabled,
            ],
        )
        .map_err(|e| RecordStoreError::Sqlite(e.to_string()))?;
        Ok(())
    }

    /// Get the number of gallery records.
    pub fn count(&self) -> Result<usize, RecordStoreError> {
        let conn: MutexGuard<'_, Connection> = self.lock()?;
        let count: i64 = conn
            .query_row(
                &format!("SELECT COUNT(*) FROM {}", self.table_name),
                [],
                |row| row.get(0),
            )
            .map_err(|e| RecordStoreError::Sqlite(e.to_string()))?;
        Ok(count as usize)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, RecordStoreError> {
        self.conn.lock().map_err(|_| RecordStoreError::LockPoisoned)
    }
}

#[async_trait]
impl GalleryRecordStore for SqliteGalleryStore {
    async fn get(&self, gallery_id: &str) -> Result<Option<GalleryStorageRecord>, RecordStoreError> {
        let conn: MutexGuard<'_, Connection> = self.lock()?;

        let row: Option<StoredRow> = conn
            .query_row(
                &format!(
                    "SELECT gallery_id, originals_bytes_used, finals_bytes_used, bytes_used,
                            last_recalculated_at, originals_limit_bytes, finals_limit_bytes,
                            storage_limit_bytes, plan_key, plan_duration, selection_enabled
                     FROM {} WHERE gallery_id = ?",
                    self.table_name
                ),
                params![gallery_id],
                read_row,
            )
            .optional()
            .map_err(|e| RecordStoreError::Sqlite(e.to_string()))?;

        row.map(StoredRow::into_record).transpose()
    }

    async fn update_counters_if_newer(
        &self,
        gallery_id: &str,
        update: &CounterUpdate,
    ) -> Result<ConditionalWrite, RecordStoreError> {
        let conn: MutexGuard<'_, Connection> = self.lock()?;

        let changed: usize = conn
            .execute(
                &format!(
                    "UPDATE {} SET
                        originals_bytes_used = ?1,
                        finals_bytes_used = ?2,
                        bytes_used = ?3,
                        last_recalculated_at = ?4
                     WHERE gallery_id = ?5
                       AND (last_recalculated_at IS NULL OR last_recalculated_at < ?4)",
                    self.table_name
                ),
                params![
                    to_sql_int(update.totals.originals_bytes),
                    to_sql_int(update.totals.finals_bytes),
                    to_sql_int(update.totals.total()),
                    format_timestamp(&update.recalculated_at),
                    gallery_id,
                ],
            )
            .map_err(|e| RecordStoreError::Sqlite(e.to_string()))?;

        if changed == 1 {
            Ok(ConditionalWrite::Applied)
        } else {
            Ok(ConditionalWrite::ConditionFailed)
        }
    }
}

fn read_row(row: &Row<'_>) -> rusqlite::Result<StoredRow> {
    Ok(StoredRow {
        gallery_id: row.get(0)?,
        originals_bytes_used: row.get(1)?,
        finals_bytes_used: row.get(2)?,
        bytes_used: row.get(3)?,
        last_recalculated_at: row.get(4)?,
        originals_limit_bytes: row.get(5)?,
        finals_limit_bytes: row.get(6)?,
        storage_limit_bytes: row.get(7)?,
        plan_key: row.get(8)?,
        plan_duration: row.get(9)?,
        selection_enabled: row.get(10)?,
    })
}

impl StoredRow {
    fn into_record(self) -> Result<GalleryStorageRecord, RecordStoreError> {
        let gallery_id: String = self.gallery_id;
        let invalid = |message: String| RecordStoreError::InvalidRecord {
            gallery_id: gallery_id.clone(),
            message,
        };
        let bytes = |value: i64, column: &str| {
            u64::try_from(value).map_err(|_| invalid(format!("negative {}: {}", column, value)))
        };

        let last_recalculated_at: Option<Timestamp> = self
            .last_recalculated_at
            .as_deref()
            .map(|value| parse_timestamp(value).map_err(|e| invalid(e.to_string())))
            .transpose()?;

        let plan: Option<PlanSelection> = match (self.plan_key, self.plan_duration) {
            (Some(plan_key), Some(duration)) => {
                let duration: PlanDuration = duration.parse().map_err(invalid)?;
                Some(PlanSelection::new(plan_key, duration))
            }
            _ => None,
        };

        Ok(GalleryStorageRecord {
            originals_bytes_used: bytes(self.originals_bytes_used, "originals_bytes_used")?,
            finals_bytes_used: bytes(self.finals_bytes_used, "finals_bytes_used")?,
            bytes_used: bytes(self.bytes_used, "bytes_used")?,
            last_recalculated_at,
            originals_limit_bytes: self
                .originals_limit_bytes
                .map(|v| bytes(v, "originals_limit_bytes"))
                .transpose()?,
            finals_limit_bytes: self
                .finals_limit_bytes
                .map(|v| bytes(v, "finals_limit_bytes"))
                .transpose()?,
            storage_limit_bytes: self
                .storage_limit_bytes
                .map(|v| bytes(v, "storage_limit_bytes"))
                .transpose()?,
            plan,
            selection_enabled: self.selection_enabled,
            gallery_id: gallery_id.clone(),
        })
    }
}

/// SQLite integers are signed; byte counts beyond i64::MAX saturate.
fn to_sql_int(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}
