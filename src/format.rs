//! FileFormat entity and registry.
//!
//! A FileFormat names the canonical filename extension for a format, the
//! alternates it tolerates, the item types allowed to use it, and the
//! formats its extra files may carry.

use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::db::{ItemRepository, PropsheetMap, UniqueKey};
use crate::Result;

/// Item type name for file formats in the store.
pub const FILE_FORMAT_ITEM_TYPE: &str = "file_format";

/// A file format entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileFormat {
    /// Stable identifier; filled from the item record, not the property
    /// document.
    #[serde(default)]
    pub uuid: String,
    /// Format name, e.g. "bam", "zip", "other".
    pub file_format: String,
    /// Canonical filename extension. Empty for formats with no extension
    /// convention (e.g. "other").
    #[serde(default)]
    pub standard_file_extension: String,
    /// Alternate extensions also accepted for filenames.
    #[serde(default)]
    pub other_allowed_extensions: Vec<String>,
    /// Concrete item types allowed to use this format.
    #[serde(default)]
    pub valid_item_types: Vec<String>,
    /// Formats allowed for extra files attached to a file of this format.
    #[serde(default)]
    pub extrafile_formats: Vec<String>,
}

impl FileFormat {
    /// The canonical extension, or None when the format declares none.
    pub fn extension(&self) -> Option<&str> {
        if self.standard_file_extension.is_empty() {
            None
        } else {
            Some(&self.standard_file_extension)
        }
    }

    /// All extensions a filename of this format may end with.
    pub fn allowed_extensions(&self) -> Vec<&str> {
        let mut extensions: Vec<&str> = Vec::new();
        if !self.standard_file_extension.is_empty() {
            extensions.push(self.standard_file_extension.as_str());
        }
        for ext in &self.other_allowed_extensions {
            if !extensions.contains(&ext.as_str()) {
                extensions.push(ext.as_str());
            }
        }
        extensions
    }

    /// Whether a filename agrees with this format. Format "other" matches
    /// any filename unconditionally.
    pub fn matches_filename(&self, filename: &str) -> bool {
        if self.file_format == "other" {
            return true;
        }
        self.allowed_extensions()
            .iter()
            .any(|ext| filename.ends_with(&format!(".{ext}")))
    }
}

/// Registry resolving format references from the item store.
///
/// A reference may be a format name ("bam"), an item uuid, or a
/// `/file-formats/<name>/` path as embedded by clients.
pub struct FormatRegistry<'a> {
    repo: ItemRepository<'a>,
}

impl<'a> FormatRegistry<'a> {
    /// Create a new FormatRegistry over the given pool.
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self {
            repo: ItemRepository::new(pool),
        }
    }

    /// Strip a `/file-formats/<name>/` path down to its name segment.
    fn normalize(reference: &str) -> &str {
        reference
            .strip_prefix("/file-formats/")
            .map(|rest| rest.trim_end_matches('/'))
            .unwrap_or(reference)
    }

    /// Resolve a format reference. Returns None when nothing matches.
    pub async fn get(&self, reference: &str) -> Result<Option<FileFormat>> {
        let reference = Self::normalize(reference);

        let record = match self
            .repo
            .get_by_unique_key(FILE_FORMAT_ITEM_TYPE, reference)
            .await?
        {
            Some(record) => Some(record),
            None => match self.repo.get(reference).await? {
                Some(record) if record.item_type == FILE_FORMAT_ITEM_TYPE => Some(record),
                _ => None,
            },
        };

        record
            .map(|r| {
                let mut format: FileFormat = serde_json::from_value(r.properties)?;
                format.uuid = r.uuid;
                Ok(format)
            })
            .transpose()
    }

    /// Register a new format in the store.
    pub async fn create(&self, uuid: &str, format: &FileFormat) -> Result<FileFormat> {
        let mut properties = serde_json::to_value(format)?;
        if let Some(obj) = properties.as_object_mut() {
            obj.remove("uuid");
        }
        self.repo
            .create(
                uuid,
                FILE_FORMAT_ITEM_TYPE,
                &properties,
                &PropsheetMap::new(),
                &[UniqueKey::new(FILE_FORMAT_ITEM_TYPE, &format.file_format)],
            )
            .await?;
        let mut created = format.clone();
        created.uuid = uuid.to_string();
        Ok(created)
    }
}
