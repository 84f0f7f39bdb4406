//! Error types for the AWS backends.

use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use gallery_storage::{RecordStoreError, StorageError};
use thiserror::Error;

/// Service error codes that mean the caller lacks permission.
const ACCESS_DENIED_CODES: &[&str] = &["AccessDenied", "AccessDeniedException", "Forbidden"];

/// Service error codes that are worth retrying.
const THROTTLING_CODES: &[&str] = &[
    "ProvisionedThroughputExceededException",
    "RequestLimitExceeded",
    "ThrottlingException",
    "SlowDown",
    "InternalServerError",
    "InternalError",
];

/// Errors specific to the AWS backends.
#[derive(Error, Debug)]
pub enum AwsError {
    /// AWS SDK error.
    #[error("AWS SDK error during {operation}: {message}")]
    SdkError {
        operation: String,
        message: String,
        retryable: bool,
    },

    /// Caller is not permitted to access the resource.
    #[error("Access denied to {resource}: {message}")]
    AccessDenied { resource: String, message: String },

    /// Operation exceeded the configured timeout.
    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    /// A required attribute was missing from an item.
    #[error("Item for {key} is missing attribute {attribute}")]
    MissingAttribute { key: String, attribute: String },

    /// An attribute had the wrong type or an unparseable value.
    #[error("Item for {key} has invalid attribute {attribute}: {message}")]
    InvalidAttribute {
        key: String,
        attribute: String,
        message: String,
    },

    /// Configuration error.
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl AwsError {
    /// Classify an SDK failure.
    ///
    /// # Arguments
    /// * `err` - Error returned by `send()`
    /// * `operation` - Operation name for the message, e.g. `ListObjectsV2`
    /// * `resource` - Bucket, prefix, or table the operation targeted
    /// * `timeout_ms` - Configured operation timeout
    pub(crate) fn from_sdk<E, R>(
        err: SdkError<E, R>,
        operation: &str,
        resource: &str,
        timeout_ms: u64,
    ) -> Self
    where
        E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
        R: std::fmt::Debug,
    {
        let code: Option<String> = match &err {
            SdkError::TimeoutError(_) => {
                return AwsError::Timeout {
                    operation: operation.to_string(),
                    timeout_ms,
                };
            }
            SdkError::ServiceError(ctx) => ctx.err().code().map(str::to_string),
            _ => None,
        };
        let message: String = DisplayErrorContext(&err).to_string();

        match code.as_deref() {
            Some(c) if ACCESS_DENIED_CODES.contains(&c) => AwsError::AccessDenied {
                resource: resource.to_string(),
                message,
            },
            Some(c) => AwsError::SdkError {
                operation: operation.to_string(),
                message,
                retryable: THROTTLING_CODES.contains(&c),
            },
            // Dispatch and response failures never reached a service verdict
            None => AwsError::SdkError {
                operation: operation.to_string(),
                message,
                retryable: true,
            },
        }
    }
}

impl From<AwsError> for StorageError {
    fn from(err: AwsError) -> Self {
        match err {
            AwsError::SdkError {
                message, retryable, ..
            } => StorageError::NetworkError { message, retryable },
            AwsError::AccessDenied { resource, message } => {
                StorageError::AccessDenied { resource, message }
            }
            AwsError::Timeout {
                operation,
                timeout_ms,
            } => StorageError::Timeout {
                message: format!("{} timed out", operation),
                elapsed_ms: timeout_ms,
            },
            err @ (AwsError::MissingAttribute { .. } | AwsError::InvalidAttribute { .. }) => {
                StorageError::InvalidResponse {
                    message: err.to_string(),
                }
            }
            AwsError::ConfigError(message) => StorageError::InvalidConfig { message },
        }
    }
}

impl From<AwsError> for RecordStoreError {
    fn from(err: AwsError) -> Self {
        match err {
            AwsError::MissingAttribute { key, attribute } => RecordStoreError::InvalidRecord {
                gallery_id: key,
                message: format!("missing attribute {}", attribute),
            },
            AwsError::InvalidAttribute {
                key,
                attribute,
                message,
            } => RecordStoreError::InvalidRecord {
                gallery_id: key,
                message: format!("attribute {}: {}", attribute, message),
            },
            other => RecordStoreError::DynamoDb(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_maps_to_storage_timeout() {
        let err: StorageError = AwsError::Timeout {
            operation: "Query".into(),
            timeout_ms: 30_000,
        }
        .into();
        assert!(matches!(
            err,
            StorageError::Timeout {
                elapsed_ms: 30_000,
                ..
            }
        ));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_access_denied_is_not_retryable() {
        let err: StorageError = AwsError::AccessDenied {
            resource: "s3://bucket/g1/originals/".into(),
            message: "denied".into(),
        }
        .into();
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_bad_attribute_becomes_invalid_record() {
        let err: RecordStoreError = AwsError::InvalidAttribute {
            key: "g1".into(),
            attribute: "originalsBytesUsed".into(),
            message: "not a number".into(),
        }
        .into();
        match err {
            RecordStoreError::InvalidRecord {
                gallery_id,
                message,
            } => {
                assert_eq!(gallery_id, "g1");
                assert!(message.contains("originalsBytesUsed"));
            }
            other => panic!("unexpected: {other}"),
        }
    }

    #[test]
    fn test_sdk_error_becomes_dynamodb_error() {
        let err: RecordStoreError = AwsError::SdkError {
            operation: "UpdateItem".into(),
            message: "boom".into(),
            retryable: true,
        }
        .into();
        assert!(matches!(err, RecordStoreError::DynamoDb(_)));
    }
}
