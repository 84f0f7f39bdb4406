//! Connection settings for the AWS backends.

use gallery_storage::{AccountingSettings, AggregationStrategy};

/// Default operation timeout applied to every SDK call.
pub const DEFAULT_OPERATION_TIMEOUT_MS: u64 = 30_000;

/// AWS credentials.
#[derive(Debug, Clone)]
pub struct AwsCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

/// Where gallery data lives in AWS.
#[derive(Debug, Clone)]
pub struct AwsSettings {
    /// AWS region.
    pub region: String,
    /// Static credentials; `None` uses the default provider chain.
    pub credentials: Option<AwsCredentials>,
    /// Bucket holding gallery objects.
    pub bucket: String,
    /// Table of gallery records, keyed by `galleryId`.
    pub galleries_table: String,
    /// Table of per-image metadata rows.
    pub images_table: String,
    /// Secondary index on the images table keyed by `galleryId`.
    pub images_index: String,
    /// Per-operation timeout in milliseconds.
    pub operation_timeout_ms: u64,
}

impl Default for AwsSettings {
    fn default() -> Self {
        Self {
            region: "us-east-1".into(),
            credentials: None,
            bucket: "galleries".into(),
            galleries_table: "galleries".into(),
            images_table: "images".into(),
            images_index: "galleryId-index".into(),
            operation_timeout_ms: DEFAULT_OPERATION_TIMEOUT_MS,
        }
    }
}

impl AwsSettings {
    /// Read settings from the process environment.
    ///
    /// Reads `AWS_REGION`, `BUCKET`, `GALLERIES_TABLE`, `IMAGES_TABLE`, and
    /// `IMAGES_GALLERY_INDEX`. Unset or empty variables keep their defaults.
    /// Credentials are left to the default provider chain.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build settings from an arbitrary variable lookup.
    ///
    /// # Arguments
    /// * `lookup` - Returns the value of a variable, if set
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let defaults: AwsSettings = AwsSettings::default();

        Self {
            region: var("AWS_REGION").unwrap_or(defaults.region),
            credentials: None,
            bucket: var("BUCKET").unwrap_or(defaults.bucket),
            galleries_table: var("GALLERIES_TABLE").unwrap_or(defaults.galleries_table),
            images_table: var("IMAGES_TABLE").unwrap_or(defaults.images_table),
            images_index: var("IMAGES_GALLERY_INDEX").unwrap_or(defaults.images_index),
            operation_timeout_ms: defaults.operation_timeout_ms,
        }
    }

    /// Use static credentials instead of the default provider chain.
    pub fn with_credentials(mut self, credentials: AwsCredentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Enumerate the bucket's prefixes.
    pub fn enumeration_strategy(&self) -> AggregationStrategy {
        AggregationStrategy::Enumeration {
            bucket: self.bucket.clone(),
        }
    }

    /// Query the images table's gallery index.
    pub fn index_strategy(&self) -> AggregationStrategy {
        AggregationStrategy::IndexQuery {
            table: self.images_table.clone(),
            index: self.images_index.clone(),
        }
    }

    /// Engine settings pointing the index strategy at these tables.
    pub fn accounting_settings(&self) -> AccountingSettings {
        AccountingSettings::default().with_strategy(self.index_strategy())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_from_lookup_reads_variables() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("AWS_REGION", "eu-west-1"),
            ("BUCKET", "photos-prod"),
            ("GALLERIES_TABLE", "galleries-prod"),
            ("IMAGES_TABLE", "images-prod"),
            ("IMAGES_GALLERY_INDEX", "byGallery"),
        ]);
        let settings: AwsSettings = AwsSettings::from_lookup(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(settings.region, "eu-west-1");
        assert_eq!(settings.bucket, "photos-prod");
        assert_eq!(settings.galleries_table, "galleries-prod");
        assert_eq!(
            settings.index_strategy(),
            AggregationStrategy::IndexQuery {
                table: "images-prod".into(),
                index: "byGallery".into(),
            }
        );
    }

    #[test]
    fn test_empty_variables_keep_defaults() {
        let settings: AwsSettings = AwsSettings::from_lookup(|k| match k {
            "BUCKET" => Some("  ".into()),
            _ => None,
        });
        let defaults: AwsSettings = AwsSettings::default();
        assert_eq!(settings.bucket, defaults.bucket);
        assert_eq!(settings.images_index, defaults.images_index);
        assert!(settings.credentials.is_none());
    }

    #[test]
    fn test_accounting_settings_use_index_strategy() {
        let settings: AwsSettings = AwsSettings::default();
        assert_eq!(
            settings.accounting_settings().strategy,
            settings.index_strategy()
        );
        assert_eq!(
            settings.enumeration_strategy(),
            AggregationStrategy::Enumeration {
                bucket: "galleries".into()
            }
        );
    }
}
