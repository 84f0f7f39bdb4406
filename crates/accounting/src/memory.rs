//! In-memory collaborators.
//!
//! Used by tests and local tooling. Both backends paginate like the real
//! services (a small page size forces continuation tokens) and can be told
//! to fail a page, so aggregation error paths are exercisable.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use gallery_storage_common::ImageClass;

use crate::error::StorageError;
use crate::traits::{
    CursorValue, ImageIndex, IndexCursor, IndexPage, ObjectInfo, ObjectLister, ObjectPage,
};

/// Default page size, matching the S3 and DynamoDB maximums closely enough.
const DEFAULT_PAGE_SIZE: usize = 1000;

/// Object store keyed by object key, holding sizes only.
#[derive(Debug)]
pub struct MemoryObjectStore {
    objects: RwLock<BTreeMap<String, u64>>,
    page_size: usize,
    fail_on_page: Option<usize>,
    pages_served: AtomicUsize,
}

impl Default for MemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryObjectStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            objects: RwLock::new(BTreeMap::new()),
            page_size: DEFAULT_PAGE_SIZE,
            fail_on_page: None,
            pages_served: AtomicUsize::new(0),
        }
    }

    /// Set the number of objects returned per page.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Fail the n-th page request (1-based, counted across all listings).
    pub fn failing_on_page(mut self, page: usize) -> Self {
        self.fail_on_page = Some(page);
        self
    }

    /// Store or overwrite an object.
    pub fn put(&self, key: impl Into<String>, size: u64) {
        let mut objects = self.objects.write().unwrap_or_else(|e| e.into_inner());
        objects.insert(key.into(), size);
    }

    /// Remove an object.
    pub fn delete(&self, key: &str) {
        let mut objects = self.objects.write().unwrap_or_else(|e| e.into_inner());
        objects.remove(key);
    }

    /// Number of page requests served so far.
    pub fn pages_served(&self) -> usize {
        self.pages_served.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectLister for MemoryObjectStore {
    async fn list_objects_page(
        &self,
        _bucket: &str,
        prefix: &str,
        continuation_token: Option<&str>,
    ) -> Result<ObjectPage, StorageError> {
        let page_number: usize = self.pages_served.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_on_page == Some(page_number) {
            return Err(StorageError::Timeout {
                message: format!("listing {} timed out", prefix),
                elapsed_ms: 30_000,
            });
        }

        let objects = self.objects.read().unwrap_or_else(|e| e.into_inner());
        let start: Bound<&str> = match continuation_token {
            Some(token) => Bound::Excluded(token),
            None => Bound::Included(prefix),
        };
        let end: Bound<&str> = Bound::Unbounded;

        let mut page: Vec<ObjectInfo> = objects
            .range::<str, _>((start, end))
            .take_while(|(key, _)| key.starts_with(prefix))
            .take(self.page_size + 1)
            .map(|(key, size)| ObjectInfo::new(key.clone(), *size))
            .collect();

        let next_continuation_token: Option<String> = if page.len() > self.page_size {
            page.truncate(self.page_size);
            page.last().map(|o| o.key.clone())
        } else {
            None
        };

        Ok(ObjectPage {
            objects: page,
            next_continuation_token,
        })
    }
}

/// One row of the in-memory image index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRow {
    pub gallery_id: String,
    pub key: String,
    pub class: ImageClass,
    pub size: u64,
}

/// Image metadata index keyed by `(gallery_id, key)`.
#[derive(Debug)]
pub struct MemoryImageIndex {
    rows: RwLock<BTreeMap<(String, String), ImageRow>>,
    page_size: usize,
    fail_on_page: Option<usize>,
    pages_served: AtomicUsize,
}

impl Default for MemoryImageIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryImageIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self {
            rows: RwLock::new(BTreeMap::new()),
            page_size: DEFAULT_PAGE_SIZE,
            fail_on_page: None,
            pages_served: AtomicUsize::new(0),
        }
    }

    /// Set the number of rows evaluated per page.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Fail the n-th page request (1-based).
    pub fn failing_on_page(mut self, page: usize) -> Self {
        self.fail_on_page = Some(page);
        self
    }

    /// Insert or overwrite an image row.
    pub fn put(&self, gallery_id: &str, key: &str, class: ImageClass, size: u64) {
        let mut rows = self.rows.write().unwrap_or_else(|e| e.into_inner());
        rows.insert(
            (gallery_id.to_string(), key.to_string()),
            ImageRow {
                gallery_id: gallery_id.to_string(),
                key: key.to_string(),
                class,
                size,
            },
        );
    }

    /// Remove an image row.
    pub fn delete(&self, gallery_id: &str, key: &str) {
        let mut rows = self.rows.write().unwrap_or_else(|e| e.into_inner());
        rows.remove(&(gallery_id.to_string(), key.to_string()));
    }

    /// Number of page requests served so far.
    pub fn pages_served(&self) -> usize {
        self.pages_served.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageIndex for MemoryImageIndex {
    async fn query_sizes(
        &self,
        _table: &str,
        _index: &str,
        gallery_id: &str,
        class: ImageClass,
        exclusive_start_key: Option<&IndexCursor>,
    ) -> Result<IndexPage, StorageError> {
        let page_number: usize = self.pages_served.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_on_page == Some(page_number) {
            return Err(StorageError::AccessDenied {
                resource: "images".into(),
                message: "query denied".into(),
            });
        }

        let rows = self.rows.read().unwrap_or_else(|e| e.into_inner());
        let start_key: String = exclusive_start_key
            .and_then(|cursor| cursor.get("key"))
            .and_then(CursorValue::as_s)
            .map(str::to_string)
            .unwrap_or_default();

        // Like DynamoDB, the page limit applies before the filter.
        let evaluated: Vec<&ImageRow> = rows
            .values()
            .filter(|row| row.gallery_id == gallery_id)
            .filter(|row| exclusive_start_key.is_none() || row.key > start_key)
            .take(self.page_size + 1)
            .collect();

        let has_more: bool = evaluated.len() > self.page_size;
        let evaluated: &[&ImageRow] = &evaluated[..evaluated.len().min(self.page_size)];

        let sizes: Vec<u64> = evaluated
            .iter()
            .filter(|row| row.class == class)
            .map(|row| row.size)
            .collect();

        let last_evaluated_key: Option<IndexCursor> = if has_more {
            evaluated.last().map(|row| {
                IndexCursor::from([
                    ("galleryId".to_string(), CursorValue::S(row.gallery_id.clone())),
                    ("key".to_string(), CursorValue::S(row.key.clone())),
                ])
            })
        } else {
            None
        };

        Ok(IndexPage {
            sizes,
            last_evaluated_key,
        })
    }
}
