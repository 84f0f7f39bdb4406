//! Error types for storage accounting.

use gallery_storage_common::ImageClass;
use thiserror::Error;

use crate::limits::LimitCheck;
use crate::records::RecordStoreError;

/// Errors raised by the backing collaborators (object listing, image index).
#[derive(Error, Debug, Clone)]
pub enum StorageError {
    /// Access denied to a bucket or table.
    #[error("Access denied to {resource}: {message}")]
    AccessDenied { resource: String, message: String },

    /// Network or service error.
    #[error("Network error: {message}")]
    NetworkError { message: String, retryable: bool },

    /// The backing store timed out.
    #[error("Timed out after {elapsed_ms}ms: {message}")]
    Timeout { message: String, elapsed_ms: u64 },

    /// Pagination did not terminate within the configured page budget.
    #[error("Pagination exceeded {max_pages} pages")]
    PageLimitExceeded { max_pages: u32 },

    /// The service returned something we cannot interpret.
    #[error("Invalid response: {message}")]
    InvalidResponse { message: String },

    /// Invalid configuration.
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    /// Other error.
    #[error("{message}")]
    Other { message: String },
}

impl StorageError {
    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            StorageError::NetworkError { retryable, .. } => *retryable,
            StorageError::Timeout { .. } => true,
            StorageError::AccessDenied { .. } => false,
            StorageError::PageLimitExceeded { .. } => false,
            StorageError::InvalidResponse { .. } => false,
            StorageError::InvalidConfig { .. } => false,
            StorageError::Other { .. } => false,
        }
    }
}

/// Errors surfaced by the accounting engine.
#[derive(Error, Debug)]
pub enum AccountingError {
    /// The gallery record does not exist.
    #[error("Gallery not found: {gallery_id}")]
    NotFound { gallery_id: String },

    /// Summing one image class failed; no partial total was used.
    #[error("Aggregating {class} bytes for gallery {gallery_id} failed: {source}")]
    AggregationFailed {
        gallery_id: String,
        class: ImageClass,
        #[source]
        source: StorageError,
    },

    /// The gallery record store failed.
    #[error("Gallery record store error: {0}")]
    RecordStore(#[from] RecordStoreError),

    /// An upload would exceed the gallery's plan limit.
    #[error(
        "Storage limit exceeded for gallery {gallery_id}: {} bytes projected, {} bytes over",
        .check.projected_usage,
        .check.excess_bytes
    )]
    LimitExceeded {
        gallery_id: String,
        class: ImageClass,
        check: Box<LimitCheck>,
    },
}

impl AccountingError {
    /// Create an aggregation failure for one class.
    ///
    /// # Arguments
    /// * `gallery_id` - Gallery being aggregated
    /// * `class` - Image class whose aggregation failed
    /// * `source` - Underlying collaborator error
    pub fn aggregation_failed(gallery_id: &str, class: ImageClass, source: StorageError) -> Self {
        AccountingError::AggregationFailed {
            gallery_id: gallery_id.to_string(),
            class,
            source,
        }
    }

    /// Whether retrying the same operation later may succeed.
    ///
    /// Only transient collaborator failures during aggregation qualify.
    pub fn is_retryable(&self) -> bool {
        match self {
            AccountingError::AggregationFailed { source, .. } => source.is_retryable(),
            _ => false,
        }
    }

    /// HTTP-equivalent status for API callers.
    pub fn status_code(&self) -> u16 {
        match self {
            AccountingError::NotFound { .. } => 404,
            AccountingError::AggregationFailed { .. } => 500,
            AccountingError::RecordStore(_) => 500,
            AccountingError::LimitExceeded { .. } => 413,
        }
    }
}
