//! Upload/download credential issuance.
//!
//! A credential record ties a storage location (bucket/key) to an optional
//! short-lived federation token scoped to exactly that object. Records are
//! kept per file in propsheets keyed by [`StorageRecordKey`], one for the
//! primary object and one per extra-file format.

use async_trait::async_trait;
use aws_sdk_sts::operation::RequestId;
use aws_sdk_sts::primitives::DateTimeFormat;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::StorageConfig;
use crate::{DepotError, Result};

/// The only storage service this subsystem brokers for.
pub const SUPPORTED_SERVICE: &str = "s3";

/// Propsheet key for a storage record.
///
/// Serialized as `external` for the primary object and `external<format
/// uuid>` for extra files, matching what earlier deployments stored.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum StorageRecordKey {
    Primary,
    ExtraFile(String),
}

impl StorageRecordKey {
    /// The sheet key this record is stored under.
    pub fn sheet_key(&self) -> String {
        match self {
            StorageRecordKey::Primary => "external".to_string(),
            StorageRecordKey::ExtraFile(format_uuid) => format!("external{format_uuid}"),
        }
    }

    /// Parse a sheet key back into a record key. Returns None for sheet
    /// keys that are not storage records.
    pub fn parse(sheet_key: &str) -> Option<Self> {
        let rest = sheet_key.strip_prefix("external")?;
        if rest.is_empty() {
            Some(StorageRecordKey::Primary)
        } else {
            Some(StorageRecordKey::ExtraFile(rest.to_string()))
        }
    }
}

/// A federation token with its provenance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadCredentials {
    #[serde(rename = "AccessKeyId")]
    pub access_key_id: String,
    #[serde(rename = "SecretAccessKey")]
    pub secret_access_key: String,
    #[serde(rename = "SessionToken")]
    pub session_token: String,
    #[serde(rename = "Expiration")]
    pub expiration: String,
    pub upload_url: String,
    pub federated_user_arn: String,
    pub federated_user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub s3_encrypt_key_id: Option<String>,
    pub request_id: String,
    pub key: String,
}

/// External storage record: location plus any outstanding write grant.
///
/// `upload_credentials` is None when no grant is outstanding, as for files
/// already resident in storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalCreds {
    pub service: String,
    pub bucket: String,
    pub key: String,
    pub upload_credentials: Option<UploadCredentials>,
}

impl ExternalCreds {
    /// A location-only record with no write grant.
    pub fn location_only(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            service: SUPPORTED_SERVICE.to_string(),
            bucket: bucket.into(),
            key: key.into(),
            upload_credentials: None,
        }
    }
}

/// What the issued policy allows on the object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    /// `s3:PutObject` — upload grants.
    Write,
    /// `s3:GetObject` — read grants for command-line tooling.
    Read,
}

impl AccessMode {
    fn action(&self) -> &'static str {
        match self {
            AccessMode::Write => "s3:PutObject",
            AccessMode::Read => "s3:GetObject",
        }
    }
}

/// Managed encryption key coordinates for the optional KMS grant.
#[derive(Debug, Clone, Copy)]
pub struct KmsGrant<'a> {
    pub region: &'a str,
    pub account_number: &'a str,
    pub key_id: &'a str,
}

/// Build the least-privilege policy for one object, optionally extended
/// with the managed-encryption-key grant.
pub fn build_policy(bucket: &str, key: &str, mode: AccessMode, kms: Option<KmsGrant>) -> Value {
    let mut statements = vec![json!({
        "Effect": "Allow",
        "Action": mode.action(),
        "Resource": format!("arn:aws:s3:::{bucket}/{key}"),
    })];
    if let Some(grant) = kms {
        statements.push(json!({
            "Effect": "Allow",
            "Action": [
                "kms:Encrypt",
                "kms:Decrypt",
                "kms:ReEncrypt*",
                "kms:GenerateDataKey*",
                "kms:DescribeKey"
            ],
            "Resource": format!(
                "arn:aws:kms:{}:{}:key/{}",
                grant.region, grant.account_number, grant.key_id
            ),
        }));
    }
    json!({
        "Version": "2012-10-17",
        "Statement": statements,
    })
}

/// Issues scoped, time-bounded storage credentials.
///
/// Callers do not retry: a failed issuance aborts the triggering write.
#[async_trait]
pub trait CredentialIssuer: Send + Sync {
    /// Obtain a storage record for `bucket`/`key`. With `name == None` the
    /// record is location-only and no remote call is made.
    async fn issue(
        &self,
        bucket: &str,
        key: &str,
        name: Option<&str>,
        mode: AccessMode,
    ) -> Result<ExternalCreds>;
}

/// Production issuer backed by the STS federation-token API.
pub struct StsCredentialIssuer {
    client: aws_sdk_sts::Client,
    storage: StorageConfig,
}

impl StsCredentialIssuer {
    /// Create a new issuer over the given STS client.
    pub fn new(client: aws_sdk_sts::Client, storage: StorageConfig) -> Self {
        Self { client, storage }
    }

    fn kms_grant(&self) -> Option<KmsGrant<'_>> {
        match (&self.storage.s3_encrypt_key_id, &self.storage.account_number) {
            (Some(key_id), Some(account_number)) => Some(KmsGrant {
                region: &self.storage.region,
                account_number,
                key_id,
            }),
            _ => None,
        }
    }
}

#[async_trait]
impl CredentialIssuer for StsCredentialIssuer {
    async fn issue(
        &self,
        bucket: &str,
        key: &str,
        name: Option<&str>,
        mode: AccessMode,
    ) -> Result<ExternalCreds> {
        let name = match name {
            Some(name) => name,
            None => return Ok(ExternalCreds::location_only(bucket, key)),
        };

        let policy = build_policy(bucket, key, mode, self.kms_grant());
        let response = self
            .client
            .get_federation_token()
            .name(name)
            .policy(policy.to_string())
            .send()
            .await
            .map_err(|e| DepotError::CredentialIssuance(e.to_string()))?;

        let credentials = response.credentials().ok_or_else(|| {
            DepotError::CredentialIssuance(
                "federation token response carried no credentials".to_string(),
            )
        })?;
        let federated_user = response.federated_user().ok_or_else(|| {
            DepotError::CredentialIssuance(
                "federation token response carried no federated user".to_string(),
            )
        })?;

        let expiration = credentials
            .expiration()
            .fmt(DateTimeFormat::DateTime)
            .unwrap_or_else(|_| credentials.expiration().secs().to_string());

        Ok(ExternalCreds {
            service: SUPPORTED_SERVICE.to_string(),
            bucket: bucket.to_string(),
            key: key.to_string(),
            upload_credentials: Some(UploadCredentials {
                access_key_id: credentials.access_key_id().to_string(),
                secret_access_key: credentials.secret_access_key().to_string(),
                session_token: credentials.session_token().to_string(),
                expiration,
                upload_url: format!("s3://{bucket}/{key}"),
                federated_user_arn: federated_user.arn().to_string(),
                federated_user_id: federated_user.federated_user_id().to_string(),
                s3_encrypt_key_id: self.storage.s3_encrypt_key_id.clone(),
                request_id: response.request_id().unwrap_or_default().to_string(),
                key: key.to_string(),
            }),
        })
    }
}
