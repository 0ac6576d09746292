//! Request/response DTOs for the DEPOT Web API.

use serde::Deserialize;
use serde_json::Value;
use validator::Validate;

use crate::web::error::ApiError;

/// Shape checks applied to a file write body ahead of the domain validator
/// chain. Unknown fields ride through untouched; only the named fields are
/// constrained here.
#[derive(Debug, Default, Deserialize, Validate)]
pub struct FileWriteShape {
    #[validate(length(equal = 32, message = "md5sum must be a 32-character hex digest"))]
    pub md5sum: Option<String>,
    #[validate(length(
        equal = 32,
        message = "content_md5sum must be a 32-character hex digest"
    ))]
    pub content_md5sum: Option<String>,
    #[validate(length(max = 255, message = "filename must be at most 255 characters"))]
    pub filename: Option<String>,
    #[validate(length(min = 1, message = "accession must not be empty"))]
    pub accession: Option<String>,
}

/// Validate the shape of a pending write body.
pub fn check_write_shape(body: &Value) -> Result<(), ApiError> {
    let shape: FileWriteShape = serde_json::from_value(body.clone())
        .map_err(|e| ApiError::bad_request(format!("Invalid JSON body: {e}")))?;
    shape.validate().map_err(ApiError::from_validation_errors)
}

/// Query parameters accepted by file write routes.
#[derive(Debug, Default, Deserialize)]
pub struct WriteQuery {
    /// `validate=false` bypasses the validator chain (elevated permission).
    pub validate: Option<String>,
    /// Presence bypasses the md5 uniqueness validator.
    pub force_md5: Option<String>,
    /// `check_only=true` dry-runs validation without persisting.
    pub check_only: Option<String>,
}

impl WriteQuery {
    pub fn skip_validation(&self) -> bool {
        self.validate.as_deref().is_some_and(|v| !asbool(v))
    }

    pub fn force_md5(&self) -> bool {
        self.force_md5.is_some()
    }

    pub fn check_only(&self) -> bool {
        self.check_only.as_deref().is_some_and(asbool)
    }
}

/// Query parameters accepted by the download route.
#[derive(Debug, Default, Deserialize)]
pub struct DownloadQuery {
    /// `soft=true` returns a structured descriptor instead of redirecting.
    pub soft: Option<String>,
}

impl DownloadQuery {
    pub fn soft(&self) -> bool {
        self.soft.as_deref().is_some_and(asbool)
    }
}

/// Truthy string values, as the platform's query parsing treats them.
pub fn asbool(value: &str) -> bool {
    matches!(
        value.to_ascii_lowercase().as_str(),
        "true" | "t" | "yes" | "y" | "on" | "1"
    )
}

/// Standard success envelope wrapping rendered items.
pub fn result_envelope(rendered: Value) -> Value {
    serde_json::json!({
        "status": "success",
        "@type": ["result"],
        "@graph": [rendered],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_asbool() {
        assert!(asbool("true"));
        assert!(asbool("True"));
        assert!(asbool("1"));
        assert!(asbool("yes"));
        assert!(!asbool("false"));
        assert!(!asbool("0"));
        assert!(!asbool(""));
    }

    #[test]
    fn test_write_query_flags() {
        let query = WriteQuery {
            validate: Some("false".to_string()),
            force_md5: Some(String::new()),
            check_only: Some("true".to_string()),
        };
        assert!(query.skip_validation());
        assert!(query.force_md5());
        assert!(query.check_only());

        let query = WriteQuery::default();
        assert!(!query.skip_validation());
        assert!(!query.force_md5());
        assert!(!query.check_only());

        // validate=true is not a bypass
        let query = WriteQuery {
            validate: Some("true".to_string()),
            ..Default::default()
        };
        assert!(!query.skip_validation());
    }

    #[test]
    fn test_check_write_shape() {
        assert!(check_write_shape(&json!({"filename": "reads.bam"})).is_ok());
        assert!(check_write_shape(&json!({"md5sum": "d41d8cd98f00b204e9800998ecf8427e"})).is_ok());
        assert!(check_write_shape(&json!({"md5sum": "short"})).is_err());
        assert!(check_write_shape(&json!({"accession": ""})).is_err());
    }

    #[test]
    fn test_result_envelope() {
        let envelope = result_envelope(json!({"uuid": "u-1"}));
        assert_eq!(envelope["status"], "success");
        assert_eq!(envelope["@graph"][0]["uuid"], "u-1");
    }
}
