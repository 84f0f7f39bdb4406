//! Wiring of AWS clients into the accounting engine.

use std::sync::Arc;
use std::time::Duration;

use aws_config::timeout::TimeoutConfig;
use aws_config::{BehaviorVersion, SdkConfig};
use aws_credential_types::Credentials;
use aws_sdk_dynamodb::Client as DynamoClient;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::Client as S3Client;
use gallery_storage::{aggregator_for, AccountingSettings, SizeAggregator, StorageGate};
use gallery_storage_common::Clock;

use crate::error::AwsError;
use crate::index::DynamoImageIndex;
use crate::records::DynamoGalleryStore;
use crate::s3::S3ObjectLister;
use crate::settings::AwsSettings;

/// S3 and DynamoDB collaborators for one deployment.
#[derive(Debug, Clone)]
pub struct AwsBackends {
    settings: AwsSettings,
    lister: Arc<S3ObjectLister>,
    index: Arc<DynamoImageIndex>,
    records: Arc<DynamoGalleryStore>,
}

impl AwsBackends {
    /// Load SDK configuration and create the clients.
    ///
    /// # Arguments
    /// * `settings` - Region, optional static credentials, and table names
    ///
    /// # Errors
    /// Returns `AwsError::ConfigError` if a required setting is empty.
    pub async fn connect(settings: AwsSettings) -> Result<Self, AwsError> {
        validate(&settings)?;

        let timeout: TimeoutConfig = TimeoutConfig::builder()
            .operation_timeout(Duration::from_millis(settings.operation_timeout_ms))
            .build();

        let config_loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(settings.region.clone()))
            .timeout_config(timeout);

        let config_loader = if let Some(ref creds) = settings.credentials {
            let credentials = Credentials::new(
                &creds.access_key_id,
                &creds.secret_access_key,
                creds.session_token.clone(),
                None,
                "gallery-storage",
            );
            config_loader.credentials_provider(credentials)
        } else {
            config_loader
        };

        let sdk_config: SdkConfig = config_loader.load().await;
        log::info!(
            "Connected storage accounting to bucket {} and table {} in {}",
            settings.bucket,
            settings.galleries_table,
            settings.region
        );
        Ok(Self::from_sdk_config(&sdk_config, settings))
    }

    /// Create the clients from an existing SDK configuration.
    ///
    /// # Arguments
    /// * `sdk_config` - Shared SDK configuration
    /// * `settings` - Table names and timeout
    pub fn from_sdk_config(sdk_config: &SdkConfig, settings: AwsSettings) -> Self {
        let s3_client: S3Client = S3Client::new(sdk_config);
        let dynamo_client: DynamoClient = DynamoClient::new(sdk_config);
        let timeout_ms: u64 = settings.operation_timeout_ms;

        Self {
            lister: Arc::new(S3ObjectLister::new(s3_client, timeout_ms)),
            index: Arc::new(DynamoImageIndex::new(dynamo_client.clone(), timeout_ms)),
            records: Arc::new(DynamoGalleryStore::new(
                dynamo_client,
                settings.galleries_table.clone(),
                timeout_ms,
            )),
            settings,
        }
    }

    /// Settings these backends were created with.
    pub fn settings(&self) -> &AwsSettings {
        &self.settings
    }

    /// S3 prefix lister.
    pub fn lister(&self) -> Arc<S3ObjectLister> {
        self.lister.clone()
    }

    /// Image index reader.
    pub fn index(&self) -> Arc<DynamoImageIndex> {
        self.index.clone()
    }

    /// Gallery record store.
    pub fn records(&self) -> Arc<DynamoGalleryStore> {
        self.records.clone()
    }

    /// Aggregator for the strategy selected in `accounting`.
    pub fn aggregator(&self, accounting: &AccountingSettings) -> Arc<dyn SizeAggregator> {
        aggregator_for(accounting, self.lister.clone(), self.index.clone())
    }

    /// Build a storage gate over these backends.
    ///
    /// # Arguments
    /// * `accounting` - TTL, tolerance, and aggregation strategy
    /// * `clock` - Time source
    pub fn gate(&self, accounting: &AccountingSettings, clock: Arc<dyn Clock>) -> StorageGate {
        StorageGate::from_settings(
            accounting,
            self.records.clone(),
            self.aggregator(accounting),
            clock,
        )
    }
}

fn validate(settings: &AwsSettings) -> Result<(), AwsError> {
    let required: [(&str, &str); 5] = [
        ("region", settings.region.as_str()),
        ("bucket", settings.bucket.as_str()),
        ("galleries_table", settings.galleries_table.as_str()),
        ("images_table", settings.images_table.as_str()),
        ("images_index", settings.images_index.as_str()),
    ];
    for (name, value) in required {
        if value.trim().is_empty() {
            return Err(AwsError::ConfigError(format!("{} must not be empty", name)));
        }
    }
    if settings.operation_timeout_ms == 0 {
        return Err(AwsError::ConfigError(
            "operation_timeout_ms must be positive".into(),
        ));
    }
    Ok(())
}
