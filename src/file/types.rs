//! File domain types: concrete classes, property document, extra files,
//! and relation edges.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::status::FileStatus;

/// Concrete File subtypes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileClass {
    #[serde(rename = "file_processed")]
    Processed,
    #[serde(rename = "file_submitted")]
    Submitted,
    #[serde(rename = "file_reference")]
    Reference,
}

impl FileClass {
    /// Store-level item type name.
    pub fn item_type(&self) -> &'static str {
        match self {
            FileClass::Processed => "file_processed",
            FileClass::Submitted => "file_submitted",
            FileClass::Reference => "file_reference",
        }
    }

    /// Schema-level type name, as listed in a format's `valid_item_types`.
    pub fn type_name(&self) -> &'static str {
        match self {
            FileClass::Processed => "FileProcessed",
            FileClass::Submitted => "FileSubmitted",
            FileClass::Reference => "FileReference",
        }
    }

    /// Parse a store-level item type name.
    pub fn from_item_type(item_type: &str) -> Option<Self> {
        match item_type {
            "file_processed" => Some(FileClass::Processed),
            "file_submitted" => Some(FileClass::Submitted),
            "file_reference" => Some(FileClass::Reference),
            _ => None,
        }
    }
}

/// The known relationship types and their fixed inverses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationshipType {
    DerivedFrom,
    ParentOf,
    Supercedes,
    IsSupercededBy,
    PairedWith,
}

impl RelationshipType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationshipType::DerivedFrom => "derived from",
            RelationshipType::ParentOf => "parent of",
            RelationshipType::Supercedes => "supercedes",
            RelationshipType::IsSupercededBy => "is superceded by",
            RelationshipType::PairedWith => "paired with",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "derived from" => Some(RelationshipType::DerivedFrom),
            "parent of" => Some(RelationshipType::ParentOf),
            "supercedes" => Some(RelationshipType::Supercedes),
            "is superceded by" => Some(RelationshipType::IsSupercededBy),
            "paired with" => Some(RelationshipType::PairedWith),
            _ => None,
        }
    }

    /// The inverse relationship. `paired with` is self-inverse.
    pub fn inverse(&self) -> Self {
        match self {
            RelationshipType::DerivedFrom => RelationshipType::ParentOf,
            RelationshipType::ParentOf => RelationshipType::DerivedFrom,
            RelationshipType::Supercedes => RelationshipType::IsSupercededBy,
            RelationshipType::IsSupercededBy => RelationshipType::Supercedes,
            RelationshipType::PairedWith => RelationshipType::PairedWith,
        }
    }
}

/// Look up the inverse of a relationship type given on the wire.
///
/// Returns None for unknown types; callers log and skip those edges rather
/// than aborting the triggering write.
pub fn inverse_relationship(relationship_type: &str) -> Option<&'static str> {
    RelationshipType::parse(relationship_type).map(|r| r.inverse().as_str())
}

/// A relation edge to another File.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelatedFile {
    /// Relationship type; stored as given, inverted via the fixed map.
    pub relationship_type: String,
    /// The other file, by uuid or accession.
    pub file: String,
}

/// A sibling sub-artifact sharing the parent file's identity but carrying
/// its own format and storage object.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtraFile {
    /// Format reference; normalized to the format item's uuid on update.
    #[serde(default)]
    pub file_format: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accession: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    /// Derived download path, filled on update.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub href: Option<String>,
    /// Derived storage key, filled on update.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upload_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub md5sum: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<FileStatus>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// The File property document.
///
/// Only the fields this subsystem touches are named; everything else rides
/// along in `extra` untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileProperties {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accession: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_accession: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<FileStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub md5sum: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_md5sum: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dataset: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lab: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub produced_from: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_files: Vec<ExtraFile>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub related_files: Vec<RelatedFile>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl FileProperties {
    /// The accession used for naming: `accession`, falling back to
    /// `external_accession`.
    pub fn accession_or_external(&self) -> Option<&str> {
        self.accession
            .as_deref()
            .or(self.external_accession.as_deref())
    }
}
