//! Index-query aggregation strategy.

use std::sync::Arc;

use async_trait::async_trait;
use gallery_storage_common::{ImageClass, DEFAULT_MAX_PAGES};

use super::SizeAggregator;
use crate::error::{AccountingError, StorageError};
use crate::traits::{ImageIndex, IndexCursor, IndexPage};

/// Sums the `size` attribute of a gallery's image rows.
pub struct IndexQueryAggregator {
    index: Arc<dyn ImageIndex>,
    table: String,
    index_name: String,
    max_pages: u32,
}

impl IndexQueryAggregator {
    /// Create an index-query aggregator.
    ///
    /// # Arguments
    /// * `index` - Image index collaborator
    /// * `table` - Image metadata table
    /// * `index_name` - Secondary index keyed by gallery id
    pub fn new(
        index: Arc<dyn ImageIndex>,
        table: impl Into<String>,
        index_name: impl Into<String>,
    ) -> Self {
        Self {
            index,
            table: table.into(),
            index_name: index_name.into(),
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
impl SizeAggregator for IndexQueryAggregator {
    async fn aggregate(&self, gallery_id: &str, class: ImageClass) -> Result<u64, AccountingError> {
        let mut total: u64 = 0;
        let mut cursor: Option<IndexCursor> = None;
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

            let page: IndexPage = self
                .index
                .query_sizes(
                    &self.table,
                    &self.index_name,
                    gallery_id,
                    class,
                    cursor.as_ref(),
                )
                .await
                .map_err(|e| AccountingError::aggregation_failed(gallery_id, class, e))?;
            pages += 1;

            total = total.saturating_add(page.sizes.iter().sum::<u64>());

            match page.last_evaluated_key {
                Some(key) if !key.is_empty() => cursor = Some(key),
                _ => break,
            }
        }

        log::debug!(
            "Queried {} {} bytes for gallery {} over {} page(s)",
            total,
            class,
            gallery_id,
            pages
        );
        Ok(total)
    }
}
