//! DynamoDB gallery record store.

use std::collections::HashMap;

use async_trait::async_trait;
use aws_sdk_dynamodb::types::AttributeValue;
use aws_sdk_dynamodb::Client as DynamoClient;
use gallery_storage::{
    ConditionalWrite, CounterUpdate, GalleryRecordStore, GalleryStorageRecord, PlanDuration,
    PlanSelection, RecordStoreError,
};
use gallery_storage_common::{format_timestamp, parse_timestamp, Timestamp};

use crate::error::AwsError;

const UPDATE_EXPRESSION: &str = "SET originalsBytesUsed = :o, finalsBytesUsed = :f, \
     bytesUsed = :b, lastBytesUsedRecalculatedAt = :ts";

const CONDITION_EXPRESSION: &str = "attribute_exists(galleryId) AND \
     (attribute_not_exists(lastBytesUsedRecalculatedAt) OR lastBytesUsedRecalculatedAt < :ts)";

/// `GalleryRecordStore` backed by the DynamoDB galleries table.
///
/// Timestamps are stored as fixed-width RFC 3339 strings, so the string
/// comparison in the condition expression orders them by time.
#[derive(Debug, Clone)]
pub struct DynamoGalleryStore {
    client: DynamoClient,
    table_name: String,
    timeout_ms: u64,
}

impl DynamoGalleryStore {
    /// Create a store over an existing table.
    ///
    /// # Arguments
    /// * `client` - Pre-configured DynamoDB client
    /// * `table_name` - Galleries table, keyed by `galleryId`
    /// * `timeout_ms` - Operation timeout the client was configured with
    pub fn new(client: DynamoClient, table_name: impl Into<String>, timeout_ms: u64) -> Self {
        Self {
            client,
            table_name: table_name.into(),
            timeout_ms,
        }
    }

    /// Table name.
    pub fn table_name(&self) -> &str {
        &self.table_name
    }
}

#[async_trait]
impl GalleryRecordStore for DynamoGalleryStore {
    async fn get(&self, gallery_id: &str) -> Result<Option<GalleryStorageRecord>, RecordStoreError> {
        let response = self
            .client
            .get_item()
            .table_name(&self.table_name)
            .key("galleryId", AttributeValue::S(gallery_id.to_string()))
            .consistent_read(true)
            .send()
            .await
            .map_err(|err| AwsError::from_sdk(err, "GetItem", &self.table_name, self.timeout_ms))?;

        match response.item() {
            Some(item) => Ok(Some(record_from_item(gallery_id, item)?)),
            None => Ok(None),
        }
    }

    async fn update_counters_if_newer(
        &self,
        gallery_id: &str,
        update: &CounterUpdate,
    ) -> Result<ConditionalWrite, RecordStoreError> {
        let result = self
            .client
            .update_item()
            .table_name(&self.table_name)
            .key("galleryId", AttributeValue::S(gallery_id.to_string()))
            .update_expression(UPDATE_EXPRESSION)
            .condition_expression(CONDITION_EXPRESSION)
            .expression_attribute_values(":o", number(update.totals.originals_bytes))
            .expression_attribute_values(":f", number(update.totals.finals_bytes))
            .expression_attribute_values(":b", number(update.totals.total()))
            .expression_attribute_values(
                ":ts",
                AttributeValue::S(format_timestamp(&update.recalculated_at)),
            )
            .send()
            .await;

        match result {
            Ok(_) => Ok(ConditionalWrite::Applied),
            Err(err)
                if err
                    .as_service_error()
                    .map(|e| e.is_conditional_check_failed_exception())
                    .unwrap_or(false) =>
            {
                log::debug!(
                    "Conditional counter update for gallery {} rejected",
                    gallery_id
                );
                Ok(ConditionalWrite::ConditionFailed)
            }
            Err(err) => {
                Err(AwsError::from_sdk(err, "UpdateItem", &self.table_name, self.timeout_ms).into())
            }
        }
    }
}

fn number(value: u64) -> AttributeValue {
    AttributeValue::N(value.to_string())
}

/// Decode a galleries table item.
///
/// Counter attributes default to zero when absent; limits and the plan stay
/// `None`.
pub(crate) fn record_from_item(
    gallery_id: &str,
    item: &HashMap<String, AttributeValue>,
) -> Result<GalleryStorageRecord, AwsError> {
    let attrs: ItemReader<'_> = ItemReader { gallery_id, item };

    let last_recalculated_at: Option<Timestamp> = attrs
        .string("lastBytesUsedRecalculatedAt")?
        .map(|value| {
            parse_timestamp(value).map_err(|e| attrs.invalid("lastBytesUsedRecalculatedAt", e.to_string()))
        })
        .transpose()?;

    let plan: Option<PlanSelection> = match item.get("plan") {
        None | Some(AttributeValue::Null(_)) => None,
        Some(AttributeValue::M(plan)) => {
            let nested: ItemReader<'_> = ItemReader {
                gallery_id,
                item: plan,
            };
            let plan_key: &str = nested
                .string("planKey")?
                .ok_or_else(|| nested.missing("plan.planKey"))?;
            let duration: PlanDuration = nested
                .string("duration")?
                .ok_or_else(|| nested.missing("plan.duration"))?
                .parse::<PlanDuration>()
                .map_err(|e: String| nested.invalid("plan.duration", e))?;
            Some(PlanSelection::new(plan_key, duration))
        }
        Some(_) => return Err(attrs.invalid("plan", "expected a map".into())),
    };

    Ok(GalleryStorageRecord {
        gallery_id: gallery_id.to_string(),
        originals_bytes_used: attrs.number("originalsBytesUsed")?.unwrap_or(0),
        finals_bytes_used: attrs.number("finalsBytesUsed")?.unwrap_or(0),
        bytes_used: attrs.number("bytesUsed")?.unwrap_or(0),
        last_recalculated_at,
        originals_limit_bytes: attrs.number("originalsLimitBytes")?,
        finals_limit_bytes: attrs.number("finalsLimitBytes")?,
        storage_limit_bytes: attrs.number("storageLimitBytes")?,
        plan,
        selection_enabled: attrs.boolean("selectionEnabled")?.unwrap_or(false),
    })
}

struct ItemReader<'a> {
    gallery_id: &'a str,
    item: &'a HashMap<String, AttributeValue>,
}

impl<'a> ItemReader<'a> {
    fn missing(&self, attribute: &str) -> AwsError {
        AwsError::MissingAttribute {
            key: self.gallery_id.to_string(),
            attribute: attribute.to_string(),
        }
    }

    fn invalid(&self, attribute: &str, message: String) -> AwsError {
        AwsError::InvalidAttribute {
            key: self.gallery_id.to_string(),
            attribute: attribute.to_string(),
            message,
        }
    }

    fn string(&self, attribute: &str) -> Result<Option<&'a str>, AwsError> {
        match self.item.get(attribute) {
            None | Some(AttributeValue::Null(_)) => Ok(None),
            Some(AttributeValue::S(s)) => Ok(Some(s.as_str())),
            Some(_) => Err(self.invalid(attribute, "expected a string".into())),
        }
    }

    fn number(&self, attribute: &str) -> Result<Option<u64>, AwsError> {
        match self.item.get(attribute) {
            None | Some(AttributeValue::Null(_)) => Ok(None),
            Some(AttributeValue::N(n)) => n
                .parse::<u64>()
                .map(Some)
                .map_err(|e| self.invalid(attribute, format!("{}: {}", n, e))),
            Some(_) => Err(self.invalid(attribute, "expected a number".into())),
        }
    }

    fn boolean(&self, attribute: &str) -> Result<Option<bool>, AwsError> {
        match self.item.get(attribute) {
            None | Some(AttributeValue::Null(_)) => Ok(None),
            Some(AttributeValue::Bool(b)) => Ok(Some(*b)),
            Some(_) => Err(self.invalid(attribute, "expected a boolean".into())),
        }
    }
}
