//! DEPOT - Data External-Object Portal
//!
//! A metadata portal plugin for S3-backed scientific file storage: File
//! entities with external-storage credential bookkeeping, upload/download
//! brokering over presigned URLs, write-time validators, and download
//! analytics reporting.

pub mod analytics;
pub mod config;
pub mod datetime;
pub mod db;
pub mod error;
pub mod file;
pub mod format;
pub mod logging;
pub mod storage;
pub mod web;

pub use config::Config;
pub use db::{Database, IndexQueueRepository, ItemRecord, ItemRepository, UniqueKey};
pub use error::{DepotError, Result};
pub use file::{
    show_upload_credentials, AccessMode, CredentialIssuer, ExternalCreds, FileClass, FileItem,
    FileProperties, FileService, FileStatus, StorageRecordKey, StsCredentialIssuer,
    UploadCredentials,
};
pub use format::{FileFormat, FormatRegistry};
pub use storage::{ObjectStore, S3ObjectStore};
