use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use std::time::Duration;
use tracing::{info, instrument};

use crate::errors::StorageError;

/// Thin wrapper over the S3 SDK client, bound to a single bucket for the
/// life of the process. Supports any S3-compatible endpoint (MinIO, R2,
/// Turso's own object-storage offering) via `S3_ENDPOINT_URL`; when unset,
/// `aws-config` resolves the standard AWS endpoint from the region.
#[derive(Clone)]
pub struct StorageClient {
    inner: Client,
    bucket: String,
}

impl StorageClient {
    #[instrument(skip(endpoint_url))]
    pub async fn connect(bucket: String, region: &str, endpoint_url: Option<&str>) -> Self {
        info!(bucket, region, "connecting to object storage");
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest()).region(aws_sdk_s3::config::Region::new(region.to_string()));
        if let Some(url) = endpoint_url {
            loader = loader.endpoint_url(url.to_string());
        }
        let shared_config = loader.load().await;
        let mut s3_config = aws_sdk_s3::config::Builder::from(&shared_config);
        if endpoint_url.is_some() {
            // S3-compatible endpoints address buckets by path, not by
            // bucket-name subdomain.
            s3_config = s3_config.force_path_style(true);
        }
        Self { inner: Client::from_conf(s3_config.build()), bucket }
    }

    #[instrument(skip(self, body))]
    pub async fn put(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<(), StorageError> {
        self.inner
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| StorageError::Put(e.to_string()))?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let output = self
            .inner
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| StorageError::Get(e.to_string()))?;
        let bytes = output.body.collect().await.map_err(|e| StorageError::Get(e.to_string()))?;
        Ok(bytes.to_vec())
    }

    #[instrument(skip(self))]
    pub async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.inner
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| StorageError::Delete(e.to_string()))?;
        Ok(())
    }

    /// A time-boxed download link for clients that shouldn't proxy the
    /// blob through the control plane (report exports, large agent
    /// binaries). `accessibleOrgIds` must already have been checked by the
    /// caller before this is minted.
    #[instrument(skip(self))]
    pub async fn presigned_get_url(&self, key: &str, expires_in: Duration) -> Result<String, StorageError> {
        let presigning = PresigningConfig::expires_in(expires_in).map_err(|e| StorageError::Presign(e.to_string()))?;
        let presigned = self
            .inner
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(presigning)
            .await
            .map_err(|e| StorageError::Presign(e.to_string()))?;
        Ok(presigned.uri().to_string())
    }
}
