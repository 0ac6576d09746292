//! File lifecycle states.

use serde::{Deserialize, Serialize};

/// Lifecycle state of a File entity.
///
/// Files are never hard-deleted by this subsystem; "deleted" is just
/// another state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileStatus {
    #[serde(rename = "uploading")]
    Uploading,
    #[serde(rename = "to be uploaded by workflow")]
    ToBeUploadedByWorkflow,
    #[serde(rename = "upload failed")]
    UploadFailed,
    #[serde(rename = "uploaded")]
    Uploaded,
    #[serde(rename = "released")]
    Released,
    #[serde(rename = "in review")]
    InReview,
    #[serde(rename = "archived")]
    Archived,
    #[serde(rename = "restricted")]
    Restricted,
    #[serde(rename = "replaced")]
    Replaced,
    #[serde(rename = "deleted")]
    Deleted,
}

impl FileStatus {
    /// Whether this status is in the awaiting-upload family: the states in
    /// which upload credentials are issued and shown to editors.
    pub fn is_awaiting_upload(&self) -> bool {
        matches!(
            self,
            FileStatus::Uploading | FileStatus::ToBeUploadedByWorkflow | FileStatus::UploadFailed
        )
    }

    /// The wire representation of this status.
    pub fn as_str(&self) -> &'static str {
        match self {
            FileStatus::Uploading => "uploading",
            FileStatus::ToBeUploadedByWorkflow => "to be uploaded by workflow",
            FileStatus::UploadFailed => "upload failed",
            FileStatus::Uploaded => "uploaded",
            FileStatus::Released => "released",
            FileStatus::InReview => "in review",
            FileStatus::Archived => "archived",
            FileStatus::Restricted => "restricted",
            FileStatus::Replaced => "replaced",
            FileStatus::Deleted => "deleted",
        }
    }
}

impl std::fmt::Display for FileStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_awaiting_upload_family() {
        assert!(FileStatus::Uploading.is_awaiting_upload());
        assert!(FileStatus::ToBeUploadedByWorkflow.is_awaiting_upload());
        assert!(FileStatus::UploadFailed.is_awaiting_upload());
        assert!(!FileStatus::Uploaded.is_awaiting_upload());
        assert!(!FileStatus::Replaced.is_awaiting_upload());
        assert!(!FileStatus::Deleted.is_awaiting_upload());
    }

    #[test]
    fn test_serde_round_trip_spaces() {
        let status: FileStatus =
            serde_json::from_str("\"to be uploaded by workflow\"").unwrap();
        assert_eq!(status, FileStatus::ToBeUploadedByWorkflow);
        assert_eq!(
            serde_json::to_string(&status).unwrap(),
            "\"to be uploaded by workflow\""
        );
    }

    #[test]
    fn test_display_matches_wire() {
        assert_eq!(FileStatus::UploadFailed.to_string(), "upload failed");
        assert_eq!(FileStatus::InReview.to_string(), "in review");
    }
}
