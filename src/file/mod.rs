//! File entity model and its external-object-storage subsystem.
//!
//! This module owns the hard parts of DEPOT: the File lifecycle (when
//! upload credentials are issued and rotated), extra-file bookkeeping,
//! bidirectional related-file symmetry, and the write-time validators.

pub mod creds;
pub mod model;
pub mod status;
pub mod types;
pub mod validators;

pub use creds::{
    AccessMode, CredentialIssuer, ExternalCreds, StorageRecordKey, StsCredentialIssuer,
    UploadCredentials, SUPPORTED_SERVICE,
};
pub use model::{
    show_upload_credentials, unique_keys_for, upload_principal_name, FileItem, FileService,
    PropagationOutcome, PropagationResult, UpdateReport,
};
pub use status::FileStatus;
pub use types::{
    inverse_relationship, ExtraFile, FileClass, FileProperties, RelatedFile, RelationshipType,
};
pub use validators::{
    validate_file_write, ValidationContext, ValidationError, ValidationErrors,
};
