//! S3-backed object store.

use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_s3::presigning::PresigningConfig;
use chrono::Utc;

use super::{GetObjectRequest, ObjectStore, PresignedUrl, RangedObject, DOWNLOAD_URL_EXPIRY_SECS};
use crate::{DepotError, Result};

/// Production object store over the S3 SDK client.
pub struct S3ObjectStore {
    client: aws_sdk_s3::Client,
}

impl S3ObjectStore {
    /// Create a new store over the given S3 client.
    pub fn new(client: aws_sdk_s3::Client) -> Self {
        Self { client }
    }

    fn get_object_builder(
        &self,
        request: &GetObjectRequest,
    ) -> aws_sdk_s3::operation::get_object::builders::GetObjectFluentBuilder {
        let mut builder = self
            .client
            .get_object()
            .bucket(&request.bucket)
            .key(&request.key)
            .response_content_disposition(&request.content_disposition);
        if let Some(range) = &request.range {
            builder = builder.range(range);
        }
        builder
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn presign_get(&self, request: &GetObjectRequest) -> Result<PresignedUrl> {
        let config = PresigningConfig::expires_in(Duration::from_secs(DOWNLOAD_URL_EXPIRY_SECS))
            .map_err(|e| DepotError::ObjectStorage(e.to_string()))?;

        let presigned = self
            .get_object_builder(request)
            .presigned(config)
            .await
            .map_err(|e| DepotError::ObjectStorage(e.to_string()))?;

        Ok(PresignedUrl {
            url: presigned.uri().to_string(),
            expires_at: Utc::now() + chrono::Duration::seconds(DOWNLOAD_URL_EXPIRY_SECS as i64),
        })
    }

    async fn get_object_ranged(&self, request: &GetObjectRequest) -> Result<RangedObject> {
        let response = self
            .get_object_builder(request)
            .send()
            .await
            .map_err(|e| DepotError::ObjectStorage(e.to_string()))?;

        let accept_ranges = response.accept_ranges().map(str::to_string);
        let content_length = response.content_length();
        let content_range = response.content_range().map(str::to_string);
        // Partial responses carry Content-Range; a range covering the whole
        // object comes back as a plain 200.
        let status = if content_range.is_some() { 206 } else { 200 };

        let body = response
            .body
            .collect()
            .await
            .map_err(|e| DepotError::ObjectStorage(e.to_string()))?
            .into_bytes()
            .to_vec();

        Ok(RangedObject {
            status,
            body,
            accept_ranges,
            content_length,
            content_range,
        })
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| DepotError::ObjectStorage(e.to_string()))?;
        Ok(())
    }
}
