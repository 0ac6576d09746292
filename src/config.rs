//! Configuration module for DEPOT.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::{DepotError, Result};

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind.
    #[serde(default = "default_host")]
    pub host: String,
    /// Port number to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    6543
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String {
    "data/depot.db".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Object storage configuration.
///
/// Two buckets are canonical: the upload bucket that submitted files land
/// in, and the workflow-output bucket that pipeline results land in. A
/// stored location naming any other bucket is reconciled against these at
/// download time.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Bucket for submitted file uploads.
    #[serde(default = "default_upload_bucket")]
    pub file_upload_bucket: String,
    /// Bucket for workflow output files.
    #[serde(default = "default_wfout_bucket")]
    pub file_wfout_bucket: String,
    /// AWS region used for KMS grant ARNs.
    #[serde(default = "default_region")]
    pub region: String,
    /// Managed encryption key id; when set, issued upload policies carry a
    /// KMS grant for it. Must be paired with `account_number`.
    #[serde(default)]
    pub s3_encrypt_key_id: Option<String>,
    /// AWS account number owning the encryption key.
    #[serde(default)]
    pub account_number: Option<String>,
}

fn default_upload_bucket() -> String {
    "depot-files".to_string()
}

fn default_wfout_bucket() -> String {
    "depot-wfout".to_string()
}

fn default_region() -> String {
    "us-east-1".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            file_upload_bucket: default_upload_bucket(),
            file_wfout_bucket: default_wfout_bucket(),
            region: default_region(),
            s3_encrypt_key_id: None,
            account_number: None,
        }
    }
}

/// Download brokering configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DownloadConfig {
    /// Base URL of the download proxy used for clients outside the trusted
    /// network (e.g. an Axel-redirect host). Empty disables proxying.
    #[serde(default)]
    pub proxy_base: Option<String>,
    /// Client IPs considered inside the trusted network; these are
    /// redirected straight to object storage.
    #[serde(default)]
    pub trusted_client_ips: Vec<String>,
}

/// Google Analytics reporting configuration.
///
/// Absent `ga4_secret` disables reporting entirely.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AnalyticsConfig {
    /// GA4 Measurement Protocol API secret.
    #[serde(default)]
    pub ga4_secret: Option<String>,
    /// Hostname to `[property_id, tracker_id]` mapping; the entry under
    /// `"default"` is used when the request host has no mapping.
    #[serde(default)]
    pub hostname_tracker_ids: HashMap<String, Vec<String>>,
}

/// Web API configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct WebConfig {
    /// Secret key for JWT verification.
    #[serde(default = "default_jwt_secret")]
    pub jwt_secret: String,
    /// Allowed CORS origins. Empty allows none.
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

fn default_jwt_secret() -> String {
    "change-me".to_string()
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            jwt_secret: default_jwt_secret(),
            cors_origins: Vec::new(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Optional log file path; console-only when absent.
    #[serde(default)]
    pub file: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub download: DownloadConfig,
    #[serde(default)]
    pub analytics: AnalyticsConfig,
    #[serde(default)]
    pub web: WebConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        toml::from_str(&content).map_err(|e| DepotError::Config(e.to_string()))
    }
}
