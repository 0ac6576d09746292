//! Object storage access for DEPOT.
//!
//! The download broker and the entity model talk to storage through the
//! [`ObjectStore`] trait; the production implementation wraps the S3 SDK.

mod s3;

pub use s3::S3ObjectStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::Result;

/// Presigned download URLs are valid for 36 hours.
pub const DOWNLOAD_URL_EXPIRY_SECS: u64 = 36 * 60 * 60;

/// Parameters for one object GET, presigned or relayed.
#[derive(Debug, Clone)]
pub struct GetObjectRequest {
    pub bucket: String,
    pub key: String,
    /// Response Content-Disposition to bake into the URL.
    pub content_disposition: String,
    /// Raw `Range` header value passed through from the caller.
    pub range: Option<String>,
}

/// A presigned URL and the expiry it was signed with.
#[derive(Debug, Clone)]
pub struct PresignedUrl {
    pub url: String,
    pub expires_at: DateTime<Utc>,
}

/// A ranged object fetched server-side for relaying.
///
/// `status` is 206 for partial content, 200 when the range covered the
/// whole object.
#[derive(Debug, Clone)]
pub struct RangedObject {
    pub status: u16,
    pub body: Vec<u8>,
    pub accept_ranges: Option<String>,
    pub content_length: Option<i64>,
    pub content_range: Option<String>,
}

/// Object store operations the broker needs.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Build a presigned GET for the object.
    async fn presign_get(&self, request: &GetObjectRequest) -> Result<PresignedUrl>;

    /// Fetch the object (or the requested range of it) server-side.
    async fn get_object_ranged(&self, request: &GetObjectRequest) -> Result<RangedObject>;

    /// Delete an object. Callers treat failures as best-effort.
    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()>;
}
