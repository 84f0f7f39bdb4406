//! Size aggregation over the backing store.
//!
//! Two interchangeable strategies compute a gallery's bytes per image class:
//!
//! - **Enumeration** lists objects under `{gallery}/originals/` or
//!   `{gallery}/final/` and sums their sizes. Finals only count when the key
//!   below the prefix is exactly `{orderId}/{filename}`, which excludes
//!   `previews/` and `thumbs/` derivatives.
//! - **Index query** sums the `size` attribute of image rows whose `type`
//!   matches the class.
//!
//! Either way a failed page aborts the class with
//! [`AccountingError::AggregationFailed`]; a partial sum is never returned.

mod enumeration;
mod index;

pub use enumeration::EnumerationAggregator;
pub use index::IndexQueryAggregator;

use std::sync::Arc;

use async_trait::async_trait;
use gallery_storage_common::ImageClass;

use crate::error::AccountingError;
use crate::traits::{ImageIndex, ObjectLister};
use crate::types::{AccountingSettings, AggregationStrategy, StorageTotals};

/// Computes the bytes a gallery uses for one image class.
#[async_trait]
pub trait SizeAggregator: Send + Sync {
    /// Total size in bytes of a gallery's images of the given class.
    ///
    /// # Arguments
    /// * `gallery_id` - Gallery identifier
    /// * `class` - Image class to sum
    ///
    /// # Errors
    /// `AggregationFailed` if any page of the listing or query fails.
    async fn aggregate(&self, gallery_id: &str, class: ImageClass) -> Result<u64, AccountingError>;

    /// Aggregate both classes, originals first.
    ///
    /// # Arguments
    /// * `gallery_id` - Gallery identifier
    async fn aggregate_all(&self, gallery_id: &str) -> Result<StorageTotals, AccountingError> {
        let mut totals: StorageTotals = StorageTotals::default();
        for class in ImageClass::ALL {
            let bytes: u64 = self.aggregate(gallery_id, class).await?;
            totals.set(class, bytes);
        }
        Ok(totals)
    }
}

/// Build the aggregator selected by `settings.strategy`.
///
/// # Arguments
/// * `settings` - Engine settings
/// * `lister` - Object listing collaborator (used by enumeration)
/// * `index` - Image index collaborator (used by index query)
pub fn aggregator_for(
    settings: &AccountingSettings,
    lister: Arc<dyn ObjectLister>,
    index: Arc<dyn ImageIndex>,
) -> Arc<dyn SizeAggregator> {
    match &settings.strategy {
        AggregationStrategy::Enumeration { bucket } => Arc::new(
            EnumerationAggregator::new(lister, bucket.clone()).with_max_pages(settings.max_pages),
        ),
        AggregationStrategy::IndexQuery { table, index: index_name } => Arc::new(
            IndexQueryAggregator::new(index, table.clone(), index_name.clone())
                .with_max_pages(settings.max_pages),
        ),
    }
}

/// Whether an object key counts toward a class total.
///
/// Originals count every object under the prefix. Finals require the
/// remainder to be exactly two non-empty segments (`{orderId}/{filename}`).
///
/// # Arguments
/// * `gallery_id` - Gallery identifier
/// * `class` - Image class being summed
/// * `key` - Object key from the listing
pub fn counts_toward(gallery_id: &str, class: ImageClass, key: &str) -> bool {
    let prefix: String = class.prefix(gallery_id);
    let Some(relative) = key.strip_prefix(prefix.as_str()) else {
        return false;
    };

    match class {
        ImageClass::Original => !relative.is_empty(),
        ImageClass::Final => {
            let segments: Vec<&str> = relative.split('/').collect();
            segments.len() == 2 && segments.iter().all(|s| !s.is_empty())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finals_two_segments_count() {
        assert!(counts_toward("g1", ImageClass::Final, "g1/final/ord1/photo.jpg"));
    }

    #[test]
    fn test_finals_nested_excluded() {
        assert!(!counts_toward("g1", ImageClass::Final, "g1/final/ord1/previews/photo.jpg"));
        assert!(!counts_toward("g1", ImageClass::Final, "g1/final/ord1/thumbs/photo.jpg"));
        assert!(!counts_toward("g1", ImageClass::Final, "g1/final/photo.jpg"));
        assert!(!counts_toward("g1", ImageClass::Final, "g1/final/ord1/"));
        assert!(!counts_toward("g1", ImageClass::Final, "g1/final//photo.jpg"));
    }

    #[test]
    fn test_originals_unfiltered() {
        assert!(counts_toward("g1", ImageClass::Original, "g1/originals/a.jpg"));
        assert!(counts_toward("g1", ImageClass::Original, "g1/originals/sub/a.jpg"));
        assert!(!counts_toward("g1", ImageClass::Original, "g1/originals/"));
    }

    #[test]
    fn test_other_gallery_excluded() {
        assert!(!counts_toward("g1", ImageClass::Original, "g10/originals/a.jpg"));
        assert!(!counts_toward("g1", ImageClass::Final, "g2/final/o1/a.jpg"));
    }
}
