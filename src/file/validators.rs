//! Write-time validators for File entities.
//!
//! Each validator inspects the pending write's not-yet-persisted JSON body
//! and either passes silently or appends a structured error. All of them
//! run on every write; errors accumulate and the caller rejects the write
//! with the full list attached.

use serde_json::Value;
use sqlx::SqlitePool;

use crate::db::ItemRepository;
use crate::format::FormatRegistry;
use crate::{DepotError, Result};

use super::types::{FileClass, FileProperties};

/// One accumulated validation error: where it was found, a short name, and
/// the human-readable description.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ValidationError {
    pub location: String,
    pub name: String,
    pub description: String,
}

/// Error accumulator for one pending write.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ValidationErrors {
    errors: Vec<ValidationError>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, location: &str, name: &str, description: impl Into<String>) {
        self.errors.push(ValidationError {
            location: location.to_string(),
            name: name.to_string(),
            description: description.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn errors(&self) -> &[ValidationError] {
        &self.errors
    }

    pub fn into_errors(self) -> Vec<ValidationError> {
        self.errors
    }
}

/// Context a validator chain runs against.
pub struct ValidationContext<'a> {
    pub pool: &'a SqlitePool,
    /// Concrete type of the entity being written.
    pub class: FileClass,
    /// Existing properties when validating a PATCH/PUT; None on POST.
    pub current: Option<&'a FileProperties>,
    /// The entity's uuid when one exists already.
    pub current_uuid: Option<&'a str>,
    /// `force_md5` query parameter: bypass the checksum-uniqueness check.
    pub force_md5: bool,
}

impl<'a> ValidationContext<'a> {
    fn formats(&self) -> FormatRegistry<'a> {
        FormatRegistry::new(self.pool)
    }

    fn repo(&self) -> ItemRepository<'a> {
        ItemRepository::new(self.pool)
    }

    fn current_str(&self, field: &str) -> Option<&str> {
        self.current.and_then(|props| match field {
            "filename" => props.filename.as_deref(),
            "file_format" => props.file_format.as_deref(),
            "md5sum" => props.md5sum.as_deref(),
            _ => None,
        })
    }
}

/// Run the whole validator chain. None of the validators short-circuit each
/// other; errors accumulate across all of them.
pub async fn validate_file_write(
    ctx: &ValidationContext<'_>,
    body: &Value,
    errors: &mut ValidationErrors,
) -> Result<()> {
    validate_file_filename(ctx, body, errors).await?;
    validate_extra_file_format(ctx, body, errors).await?;
    validate_file_format_validity_for_file_type(ctx, body, errors).await?;
    validate_processed_file_unique_md5_with_bypass(ctx, body, errors).await?;
    validate_processed_file_produced_from_field(ctx, body, errors).await?;
    Ok(())
}

/// Filename must agree with the declared (or existing) file format.
pub async fn validate_file_filename(
    ctx: &ValidationContext<'_>,
    body: &Value,
    errors: &mut ValidationErrors,
) -> Result<()> {
    let filename = match body.get("filename").and_then(Value::as_str) {
        Some(filename) => filename,
        None => match ctx.current_str("filename") {
            Some(filename) => filename,
            None => return Ok(()),
        },
    };

    let format_ref = body
        .get("file_format")
        .and_then(Value::as_str)
        .or_else(|| ctx.current_str("file_format"));

    let format = match format_ref {
        Some(reference) => ctx.formats().get(reference).await?,
        None => None,
    };
    let Some(format) = format else {
        errors.add(
            "body",
            "File: no format",
            format!("Problem getting file_format for {filename}"),
        );
        return Ok(());
    };

    if format.matches_filename(filename) {
        return Ok(());
    }

    let extensions = format
        .allowed_extensions()
        .iter()
        .map(|ext| format!("'.{ext}'"))
        .collect::<Vec<_>>()
        .join(", ");
    errors.add(
        "body",
        "File: invalid extension",
        format!(
            "Filename {filename} extension does not agree with specified file format. \
             Valid extension(s): {extensions}"
        ),
    );
    Ok(())
}

/// Extra-file formats must be known, pairwise distinct, distinct from the
/// parent format, and drawn from the parent format's allowed set.
pub async fn validate_extra_file_format(
    ctx: &ValidationContext<'_>,
    body: &Value,
    errors: &mut ValidationErrors,
) -> Result<()> {
    let extras = match body.get("extra_files").and_then(Value::as_array) {
        Some(extras) if !extras.is_empty() => extras,
        _ => return Ok(()),
    };

    let format_ref = body
        .get("file_format")
        .and_then(Value::as_str)
        .or_else(|| ctx.current_str("file_format"));
    let parent_format = match format_ref {
        Some(reference) => ctx.formats().get(reference).await?,
        None => None,
    };
    let Some(parent_format) = parent_format else {
        errors.add(
            "body",
            "File: no extra_file format",
            "Can't find parent file format for extra_files",
        );
        return Ok(());
    };

    if parent_format.extrafile_formats.is_empty() {
        errors.add(
            "body",
            "File: invalid extra files",
            format!(
                "File with format {} should not have extra_files",
                parent_format.file_format
            ),
        );
        return Ok(());
    }

    let mut valid_format_uuids = Vec::new();
    for allowed in &parent_format.extrafile_formats {
        let Some(allowed_format) = ctx.formats().get(allowed).await? else {
            // a format item referencing unknown formats is broken
            // configuration, not user input
            return Err(DepotError::Config(format!(
                "FileFormat Item {} contains unknown FileFormats in the extrafile_formats property",
                parent_format.uuid
            )));
        };
        valid_format_uuids.push(allowed_format.uuid);
    }

    let mut seen_formats: Vec<String> = Vec::new();
    for extra in extras {
        let Some(eformat) = extra.get("file_format").and_then(Value::as_str) else {
            // will fail the required extra_file.file_format
            return Ok(());
        };
        let Some(eformat_item) = ctx.formats().get(eformat).await? else {
            errors.add(
                "body",
                "File: invalid extra_file format",
                format!("'{eformat}' not a valid or known file format"),
            );
            break;
        };
        if seen_formats.contains(&eformat_item.uuid) {
            errors.add(
                "body",
                "File: invalid extra_file formats",
                format!(
                    "Multple extra files with '{eformat}' format cannot be submitted at the \
                     same time"
                ),
            );
            break;
        }
        seen_formats.push(eformat_item.uuid.clone());
        if eformat_item.uuid == parent_format.uuid {
            errors.add(
                "body",
                "File: invalid extra_file formats",
                format!(
                    "'{}' format cannot be the same for file and extra_file",
                    parent_format.file_format
                ),
            );
            break;
        }
        if !valid_format_uuids.contains(&eformat_item.uuid) {
            errors.add(
                "body",
                "File: invalid extra_file formats",
                format!(
                    "'{}' not a valid extrafile_format for '{}'",
                    eformat, parent_format.file_format
                ),
            );
        }
    }
    Ok(())
}

/// The declared file format must list this entity's concrete type among
/// its valid item types.
pub async fn validate_file_format_validity_for_file_type(
    ctx: &ValidationContext<'_>,
    body: &Value,
    errors: &mut ValidationErrors,
) -> Result<()> {
    let Some(reference) = body.get("file_format").and_then(Value::as_str) else {
        return Ok(());
    };
    let Some(format) = ctx.formats().get(reference).await? else {
        // item level validation will take care of generating the error
        return Ok(());
    };
    let file_type = ctx.class.type_name();
    if !format.valid_item_types.iter().any(|t| t == file_type) {
        errors.add(
            "body",
            "File: invalid format",
            format!(
                "File format {} is not allowed for {}",
                format.file_format, file_type
            ),
        );
    }
    Ok(())
}

/// A new or changed md5sum on a processed file must not collide with
/// another non-replaced processed file's. Bypassed by `force_md5`; a value
/// unchanged from the current one is always allowed.
pub async fn validate_processed_file_unique_md5_with_bypass(
    ctx: &ValidationContext<'_>,
    body: &Value,
    errors: &mut ValidationErrors,
) -> Result<()> {
    if ctx.class != FileClass::Processed {
        return Ok(());
    }
    let Some(md5sum) = body.get("md5sum").and_then(Value::as_str) else {
        return Ok(());
    };
    if md5sum.is_empty() || ctx.force_md5 {
        return Ok(());
    }
    // we can of course patch / put to ourselves the same md5 we previously had
    if ctx.current_str("md5sum") == Some(md5sum) {
        return Ok(());
    }

    let collision = ctx
        .repo()
        .find_md5_collision(md5sum, FileClass::Processed.item_type(), ctx.current_uuid)
        .await?;
    if let Some(found) = collision {
        let accession = found
            .properties
            .get("accession")
            .and_then(Value::as_str)
            .unwrap_or(&found.uuid)
            .to_string();
        errors.add(
            "body",
            "File: non-unique md5sum",
            format!("md5sum {md5sum} already exists for accession {accession}"),
        );
    }
    Ok(())
}

/// Every id in `produced_from` must resolve to an existing file.
pub async fn validate_processed_file_produced_from_field(
    ctx: &ValidationContext<'_>,
    body: &Value,
    errors: &mut ValidationErrors,
) -> Result<()> {
    if ctx.class != FileClass::Processed {
        return Ok(());
    }
    let Some(produced_from) = body.get("produced_from").and_then(Value::as_array) else {
        return Ok(());
    };
    let repo = ctx.repo();
    for value in produced_from {
        let reference = value.as_str().unwrap_or_default();
        let record = match repo.get(reference).await? {
            Some(record) => Some(record),
            None => repo.get_by_unique_key("accession", reference).await?,
        };
        let is_file = record
            .map(|r| FileClass::from_item_type(&r.item_type).is_some())
            .unwrap_or(false);
        if !is_file {
            errors.add(
                "body",
                "File: invalid produced_from id",
                format!("'{reference}' not found"),
            );
        }
    }
    Ok(())
}
