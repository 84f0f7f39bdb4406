//! S3 prefix listing.

use async_trait::async_trait;
use aws_sdk_s3::Client as S3Client;
use gallery_storage::{ObjectInfo, ObjectLister, ObjectPage, StorageError};

use crate::error::AwsError;

/// `ObjectLister` backed by S3 `ListObjectsV2`.
#[derive(Debug, Clone)]
pub struct S3ObjectLister {
    /// The underlying S3 client.
    s3_client: S3Client,
    /// Expected bucket owner for security validation.
    expected_bucket_owner: Option<String>,
    /// Timeout reported when a call times out.
    timeout_ms: u64,
}

impl S3ObjectLister {
    /// Create a lister from an existing S3 client.
    ///
    /// # Arguments
    /// * `s3_client` - Pre-configured S3 client
    /// * `timeout_ms` - Operation timeout the client was configured with
    pub fn new(s3_client: S3Client, timeout_ms: u64) -> Self {
        Self {
            s3_client,
            expected_bucket_owner: None,
            timeout_ms,
        }
    }

    /// Require the bucket to be owned by this account.
    pub fn with_expected_bucket_owner(mut self, owner: impl Into<String>) -> Self {
        self.expected_bucket_owner = Some(owner.into());
        self
    }
}

#[async_trait]
impl ObjectLister for S3ObjectLister {
    async fn list_objects_page(
        &self,
        bucket: &str,
        prefix: &str,
        continuation_token: Option<&str>,
    ) -> Result<ObjectPage, StorageError> {
        let mut request = self
            .s3_client
            .list_objects_v2()
            .bucket(bucket)
            .prefix(prefix);

        if let Some(ref owner) = self.expected_bucket_owner {
            request = request.expected_bucket_owner(owner);
        }

        if let Some(token) = continuation_token {
            request = request.continuation_token(token);
        }

        let response = request.send().await.map_err(|err| {
            AwsError::from_sdk(
                err,
                "ListObjectsV2",
                &format!("s3://{}/{}", bucket, prefix),
                self.timeout_ms,
            )
        })?;

        let objects: Vec<ObjectInfo> = response
            .contents()
            .iter()
            .filter_map(|obj| {
                let key: &str = obj.key()?;
                Some(ObjectInfo::new(
                    key,
                    obj.size().map(|s| s.max(0) as u64).unwrap_or(0),
                ))
            })
            .collect();

        let next_continuation_token: Option<String> = if response.is_truncated() == Some(true) {
            let token: Option<String> = response.next_continuation_token().map(str::to_string);
            if token.is_none() {
                return Err(StorageError::InvalidResponse {
                    message: format!(
                        "truncated listing of s3://{}/{} without a continuation token",
                        bucket, prefix
                    ),
                });
            }
            token
        } else {
            None
        };

        log::debug!(
            "Listed {} objects under s3://{}/{} (more: {})",
            objects.len(),
            bucket,
            prefix,
            next_continuation_token.is_some()
        );

        Ok(ObjectPage {
            objects,
            next_continuation_token,
        })
    }
}
