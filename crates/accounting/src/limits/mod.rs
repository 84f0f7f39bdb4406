//! Plan limit enforcement.
//!
//! Validation always recomputes usage (the cache is never trusted when an
//! upload is being admitted) and fails closed if the recompute fails.

mod plans;

pub use plans::{
    PlanCatalog, PlanDuration, PlanSelection, PlanTier, TierSuggestion,
    DEFAULT_SELECTION_DISABLED_DISCOUNT_PERCENT,
};

use std::sync::Arc;

use gallery_storage_common::ImageClass;
use serde::Serialize;

use crate::error::AccountingError;
use crate::gate::StorageGate;
use crate::types::GalleryStorageRecord;

/// Outcome of a limit check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LimitCheck {
    /// Whether the projected usage fits.
    pub within_limit: bool,
    /// Fresh usage plus the pending upload.
    pub projected_usage: u64,
    /// Ceiling compared against; `None` for draft galleries.
    pub limit_bytes: Option<u64>,
    /// Bytes over the ceiling (zero when within limit).
    pub excess_bytes: u64,
    /// Cheapest plan that would fit, when over limit.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_tier: Option<TierSuggestion>,
}

impl LimitCheck {
    /// Compare projected usage against an optional ceiling.
    ///
    /// # Arguments
    /// * `current_bytes` - Fresh usage
    /// * `pending_bytes` - Size of the upload being admitted
    /// * `limit_bytes` - Ceiling; `None` means no plan yet
    pub fn evaluate(current_bytes: u64, pending_bytes: u64, limit_bytes: Option<u64>) -> Self {
        let projected_usage: u64 = current_bytes.saturating_add(pending_bytes);
        let excess_bytes: u64 = limit_bytes
            .map(|limit| projected_usage.saturating_sub(limit))
            .unwrap_or(0);
        Self {
            within_limit: excess_bytes == 0,
            projected_usage,
            limit_bytes,
            excess_bytes,
            suggested_tier: None,
        }
    }
}

/// Decides whether an upload fits the gallery's plan.
pub struct LimitValidator {
    gate: Arc<StorageGate>,
    catalog: PlanCatalog,
}

impl LimitValidator {
    /// Create a validator.
    ///
    /// # Arguments
    /// * `gate` - Gate used to force a fresh recompute
    /// * `catalog` - Plans for upgrade suggestions
    pub fn new(gate: Arc<StorageGate>, catalog: PlanCatalog) -> Self {
        Self { gate, catalog }
    }

    /// The plan catalog.
    pub fn catalog(&self) -> &PlanCatalog {
        &self.catalog
    }

    /// Check a pending originals upload.
    ///
    /// # Arguments
    /// * `gallery_id` - Gallery identifier
    /// * `pending_upload_bytes` - Size of the upload
    ///
    /// # Errors
    /// `NotFound`, `AggregationFailed` (fail closed), or a record store error.
    pub async fn validate(
        &self,
        gallery_id: &str,
        pending_upload_bytes: u64,
    ) -> Result<LimitCheck, AccountingError> {
        self.validate_upload(gallery_id, ImageClass::Original, pending_upload_bytes)
            .await
    }

    /// Check a pending upload of either class.
    ///
    /// Finals are checked against `finalsLimitBytes`; upgrade suggestions are
    /// only made for originals, which plans are sized by.
    pub async fn validate_upload(
        &self,
        gallery_id: &str,
        class: ImageClass,
        pending_upload_bytes: u64,
    ) -> Result<LimitCheck, AccountingError> {
        let record: GalleryStorageRecord = self.gate.refresh(gallery_id).await?;
        Ok(self.check_record(&record, class, pending_upload_bytes))
    }

    /// Like [`validate_upload`](Self::validate_upload), but an over-limit
    /// result is returned as `LimitExceeded`.
    pub async fn ensure_within_limit(
        &self,
        gallery_id: &str,
        class: ImageClass,
        pending_upload_bytes: u64,
    ) -> Result<LimitCheck, AccountingError> {
        let check: LimitCheck = self
            .validate_upload(gallery_id, class, pending_upload_bytes)
            .await?;
        if check.within_limit {
            Ok(check)
        } else {
            Err(AccountingError::LimitExceeded {
                gallery_id: gallery_id.to_string(),
                class,
                check: Box::new(check),
            })
        }
    }

    /// Evaluate a freshly reconciled record.
    ///
    /// # Arguments
    /// * `record` - Record with fresh counters
    /// * `class` - Class of the pending upload
    /// * `pending_upload_bytes` - Size of the upload
    pub fn check_record(
        &self,
        record: &GalleryStorageRecord,
        class: ImageClass,
        pending_upload_bytes: u64,
    ) -> LimitCheck {
        let limit: Option<u64> = record.limit_for(class);
        let mut check: LimitCheck =
            LimitCheck::evaluate(record.bytes_used_for(class), pending_upload_bytes, limit);

        if !check.within_limit && class == ImageClass::Original {
            check.suggested_tier = self.catalog.suggest_upgrade(
                check.projected_usage,
                record.plan.as_ref(),
                limit,
                record.selection_enabled,
            );
        }

        if !check.within_limit {
            log::debug!(
                "Gallery {} {} upload of {} bytes exceeds limit by {} bytes",
                record.gallery_id,
                class,
                pending_upload_bytes,
                check.excess_bytes
            );
        }
        check
    }
}
