//! Object-listing aggregation strategy.

use std::sync::Arc;

use async_trait::async_trait;
use gallery_storage_common::{ImageClass, DEFAULT_MAX_PAGES};

use super::{counts_toward, SizeAggregator};
use crate::error::{AccountingError, StorageError};
use crate::traits::{ObjectLister, ObjectPage};

/// Sums object sizes under a gallery's class prefix.
pub struct EnumerationAggregator {
    lister: Arc<dyn ObjectLister>,
    bucket: String,
    max_pages: u32,
}

impl EnumerationAggregator {
    /// Create an enumeration aggregator.
    ///
    /// # Arguments
    /// * `lister` - Object listing collaborator
    /// * `bucket` - Bucket holding gallery images
    pub fn new(lister: Arc<dyn ObjectLister>, bucket: impl Into<String>) -> Self {
        Self {
            lister,
            bucket: bucket.into(),
            max_pages: DEFAULT_MAX_PAGES,
        }
    }

    /// Set the page budget.
    pub fn with_max_pages(mut self, max_pages: u32) -> Self {
        self.max_pages = max_pages;
        self
    }
}

#[async_trait]
impl SizeAggregator for EnumerationAggregator {
    async fn aggregate(&self, gallery_id: &str, class: ImageClass) -> Result<u64, AccountingError> {
        let prefix: String = class.prefix(gallery_id);
        let mut total: u64 = 0;
        let mut continuation_token: Option<String> = None;
        let mut pages: u32 = 0;

        loop {
            if pages >= self.max_pages {
                return Err(AccountingError::aggregation_failed(
                    gallery_id,
                    class,
                    StorageError::PageLimitExceeded {
                        max_pages: self.max_pages,
                    },
                ));
            }

            let page: ObjectPage = self
                .lister
                .list_objects_page(&self.bucket, &prefix, continuation_token.as_deref())
                .await
                .map_err(|e| AccountingError::aggregation_failed(gallery_id, class, e))?;
            pages += 1;

            let page_bytes: u64 = page
                .objects
                .iter()
                .filter(|o| counts_toward(gallery_id, class, &o.key))
                .map(|o| o.size)
                .sum();
            total = total.saturating_add(page_bytes);

            match page.next_continuation_token {
                Some(token) if !token.is_empty() => continuation_token = Some(token),
                _ => break,
            }
        }

        log::debug!(
            "Enumerated {} {} bytes for gallery {} over {} page(s)",
            total,
            class,
            gallery_id,
            pages
        );
        Ok(total)
    }
}
