//! DynamoDB image index queries.

use std::collections::HashMap;

use async_trait::async_trait;
use aws_sdk_dynamodb::types::AttributeValue;
use aws_sdk_dynamodb::Client as DynamoClient;
use aws_sdk_dynamodb::primitives::Blob;
use gallery_storage::{CursorValue, ImageIndex, IndexCursor, IndexPage, StorageError};
use gallery_storage_common::ImageClass;

use crate::error::AwsError;

/// `ImageIndex` backed by a DynamoDB secondary index keyed by `galleryId`.
#[derive(Debug, Clone)]
pub struct DynamoImageIndex {
    client: DynamoClient,
    timeout_ms: u64,
}

impl DynamoImageIndex {
    /// Create an index reader from an existing DynamoDB client.
    ///
    /// # Arguments
    /// * `client` - Pre-configured DynamoDB client
    /// * `timeout_ms` - Operation timeout the client was configured with
    pub fn new(client: DynamoClient, timeout_ms: u64) -> Self {
        Self { client, timeout_ms }
    }
}

#[async_trait]
impl ImageIndex for DynamoImageIndex {
    async fn query_sizes(
        &self,
        table: &str,
        index: &str,
        gallery_id: &str,
        class: ImageClass,
        exclusive_start_key: Option<&IndexCursor>,
    ) -> Result<IndexPage, StorageError> {
        // `size` and `type` are reserved words
        let request = self
            .client
            .query()
            .table_name(table)
            .index_name(index)
            .key_condition_expression("galleryId = :g")
            .filter_expression("#type = :t")
            .projection_expression("#size")
            .expression_attribute_names("#type", "type")
            .expression_attribute_names("#size", "size")
            .expression_attribute_values(":g", AttributeValue::S(gallery_id.to_string()))
            .expression_attribute_values(":t", AttributeValue::S(class.as_str().to_string()))
            .set_exclusive_start_key(exclusive_start_key.map(cursor_to_key));

        let response = request.send().await.map_err(|err| {
            AwsError::from_sdk(
                err,
                "Query",
                &format!("{}/{}", table, index),
                self.timeout_ms,
            )
        })?;

        let mut sizes: Vec<u64> = Vec::with_capacity(response.items().len());
        for item in response.items() {
            sizes.push(parse_size(gallery_id, item)?);
        }

        let last_evaluated_key: Option<IndexCursor> = response
            .last_evaluated_key()
            .map(|key| key_to_cursor(gallery_id, key))
            .transpose()?;

        Ok(IndexPage {
            sizes,
            last_evaluated_key,
        })
    }
}

/// Rebuild the exclusive start key from a cursor.
fn cursor_to_key(cursor: &IndexCursor) -> HashMap<String, AttributeValue> {
    cursor
        .iter()
        .map(|(k, v)| {
            let value: AttributeValue = match v {
                CursorValue::S(s) => AttributeValue::S(s.clone()),
                CursorValue::N(n) => AttributeValue::N(n.clone()),
                CursorValue::B(b) => AttributeValue::B(Blob::new(b.clone())),
            };
            (k.clone(), value)
        })
        .collect()
}

/// Capture a last-evaluated key. Key attributes are always S, N, or B.
fn key_to_cursor(
    gallery_id: &str,
    key: &HashMap<String, AttributeValue>,
) -> Result<IndexCursor, StorageError> {
    key.iter()
        .map(|(name, value)| {
            let cursor_value: CursorValue = match value {
                AttributeValue::S(s) => CursorValue::S(s.clone()),
                AttributeValue::N(n) => CursorValue::N(n.clone()),
                AttributeValue::B(b) => CursorValue::B(b.as_ref().to_vec()),
                _ => {
                    return Err(StorageError::from(AwsError::InvalidAttribute {
                        key: gallery_id.to_string(),
                        attribute: name.clone(),
                        message: "cursor attributes must be strings, numbers, or binary".into(),
                    }))
                }
            };
            Ok((name.clone(), cursor_value))
        })
        .collect()
}

/// Read the projected `size` of an image row. Rows without one count as zero.
fn parse_size(gallery_id: &str, item: &HashMap<String, AttributeValue>) -> Result<u64, StorageError> {
    match item.get("size") {
        None => Ok(0),
        Some(AttributeValue::N(n)) => n.parse::<u64>().map_err(|e| {
            AwsError::InvalidAttribute {
                key: gallery_id.to_string(),
                attribute: "size".into(),
                message: format!("{}: {}", n, e),
            }
            .into()
        }),
        Some(_) => Err(AwsError::InvalidAttribute {
            key: gallery_id.to_string(),
            attribute: "size".into(),
            message: "expected a number".into(),
        }
        .into()),
    }
}
