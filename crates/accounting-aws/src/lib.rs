//! AWS backends for gallery storage accounting.
//!
//! This crate implements the accounting engine's collaborators with the AWS
//! SDK for Rust:
//!
//! - [`S3ObjectLister`] lists gallery prefixes with `ListObjectsV2`
//! - [`DynamoImageIndex`] queries the images table's gallery index
//! - [`DynamoGalleryStore`] reads gallery records and commits counters with a
//!   timestamp-fenced conditional `UpdateItem`
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use gallery_storage_aws::{AwsBackends, AwsSettings};
//! use gallery_storage_common::SystemClock;
//!
//! let settings = AwsSettings::from_env();
//! let accounting = settings.accounting_settings();
//! let backends = AwsBackends::connect(settings).await?;
//! let gate = backends.gate(&accounting, Arc::new(SystemClock));
//!
//! let snapshot = gate.get_storage("gallery-1", false).await?;
//! ```

mod client;
mod error;
mod index;
mod records;
mod s3;
mod settings;

pub use client::AwsBackends;
pub use error::AwsError;
pub use index::DynamoImageIndex;
pub use records::DynamoGalleryStore;
pub use s3::S3ObjectLister;
pub use settings::{AwsCredentials, AwsSettings, DEFAULT_OPERATION_TIMEOUT_MS};
