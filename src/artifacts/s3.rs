//! S3-compatible object storage.

use std::path::Path;

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use tracing::{debug, info};

use super::{ArtifactError, ArtifactStore, StorageSettings};

/// Uploads artifacts to one bucket. Credentials come from the default AWS chain.
#[derive(Clone)]
pub struct S3ArtifactStore {
    client: Client,
    bucket: String,
}

impl S3ArtifactStore {
    pub async fn connect(bucket: String, settings: &StorageSettings) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = &settings.region {
            loader = loader.region(Region::new(region.clone()));
        }
        if let Some(endpoint) = &settings.endpoint_url {
            loader = loader.endpoint_url(endpoint);
        }
        let sdk_config = loader.load().await;

        let client = Client::from_conf(
            aws_sdk_s3::config::Builder::from(&sdk_config)
                .force_path_style(settings.endpoint_url.is_some())
                .build(),
        );
        info!("Publishing artifacts to s3://{}", bucket);
        Self { client, bucket }
    }
}

#[async_trait]
impl ArtifactStore for S3ArtifactStore {
    async fn publish(
        &self,
        key: &str,
        source: &Path,
        content_type: &str,
    ) -> Result<String, ArtifactError> {
        let data = tokio::fs::read(source)
            .await
            .map_err(|source_err| ArtifactError::Read {
                path: source.to_path_buf(),
                source: source_err,
            })?;
        let size = data.len();

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| ArtifactError::Store {
                key: key.to_string(),
                reason: DisplayErrorContext(&e).to_string(),
            })?;

        debug!("Uploaded {} ({} bytes) to s3://{}", key, size, self.bucket);
        Ok(format!("s3://{}/{}", self.bucket, key))
    }
}
