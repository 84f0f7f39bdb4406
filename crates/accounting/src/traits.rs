//! Collaborator interfaces for the backing object store and image index.

use std::collections::HashMap;

use async_trait::async_trait;
use gallery_storage_common::ImageClass;

use crate::error::StorageError;

/// Information about a stored object from a listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    /// Object key.
    pub key: String,
    /// Object size in bytes.
    pub size: u64,
}

impl ObjectInfo {
    /// Create an object listing entry.
    pub fn new(key: impl Into<String>, size: u64) -> Self {
        Self {
            key: key.into(),
            size,
        }
    }
}

/// One page of a prefix listing.
#[derive(Debug, Clone, Default)]
pub struct ObjectPage {
    /// Objects on this page.
    pub objects: Vec<ObjectInfo>,
    /// Token for the next page; `None` when the listing is complete.
    pub next_continuation_token: Option<String>,
}

/// Paginated prefix listing over the object store.
#[async_trait]
pub trait ObjectLister: Send + Sync {
    /// List one page of objects whose key starts with `prefix`.
    ///
    /// # Arguments
    /// * `bucket` - Bucket name
    /// * `prefix` - Key prefix
    /// * `continuation_token` - Token returned by the previous page, if any
    async fn list_objects_page(
        &self,
        bucket: &str,
        prefix: &str,
        continuation_token: Option<&str>,
    ) -> Result<ObjectPage, StorageError>;
}

/// A key attribute of an index cursor, carried with its type.
///
/// Secondary index cursors include the base table's keys, which may be
/// numbers or binary as well as strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CursorValue {
    /// String attribute.
    S(String),
    /// Number attribute, kept in its decimal string form.
    N(String),
    /// Binary attribute.
    B(Vec<u8>),
}

impl CursorValue {
    /// The string value, if this is a string attribute.
    pub fn as_s(&self) -> Option<&str> {
        match self {
            CursorValue::S(s) => Some(s),
            _ => None,
        }
    }
}

/// Last-evaluated key of an index query.
pub type IndexCursor = HashMap<String, CursorValue>;

/// One page of projected image sizes.
#[derive(Debug, Clone, Default)]
pub struct IndexPage {
    /// `size` attribute of each matching image row.
    pub sizes: Vec<u64>,
    /// Cursor for the next page; `None` when the query is exhausted.
    pub last_evaluated_key: Option<IndexCursor>,
}

/// Paginated query over the per-image metadata index.
#[async_trait]
pub trait ImageIndex: Send + Sync {
    /// Query one page of image sizes for a gallery, filtered by class.
    ///
    /// Implementations project only the `size` attribute.
    ///
    /// # Arguments
    /// * `table` - Image table name
    /// * `index` - Secondary index keyed by gallery id
    /// * `gallery_id` - Partition key value
    /// * `class` - Required value of the `type` attribute
    /// * `exclusive_start_key` - Cursor returned by the previous page, if any
    async fn query_sizes(
        &self,
        table: &str,
        index: &str,
        gallery_id: &str,
        class: ImageClass,
        exclusive_start_key: Option<&IndexCursor>,
    ) -> Result<IndexPage, StorageError>;
}
