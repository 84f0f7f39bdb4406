//! Gallery record store error types.

use thiserror::Error;

/// Errors from a gallery record store backend.
#[derive(Error, Debug)]
pub enum RecordStoreError {
    /// SQLite database error.
    #[error("SQLite error: {0}")]
    Sqlite(String),

    /// DynamoDB error.
    #[error("DynamoDB error: {0}")]
    DynamoDb(String),

    /// A stored record could not be decoded, including timestamps that are
    /// not in canonical form.
    #[error("Invalid record for gallery {gallery_id}: {message}")]
    InvalidRecord { gallery_id: String, message: String },

    /// Backend lock was poisoned by a panicking writer.
    #[error("Record store lock poisoned")]
    LockPoisoned,
}
