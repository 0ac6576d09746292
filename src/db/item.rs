//! Item store row types.

use std::collections::BTreeMap;

use serde_json::Value;

/// A persisted item: stable identity, JSON property document, and a serial
/// number bumped on every update.
#[derive(Debug, Clone)]
pub struct ItemRecord {
    /// Stable unique identifier.
    pub uuid: String,
    /// Concrete item type name (e.g. "file_processed", "file_format").
    pub item_type: String,
    /// The item's property document.
    pub properties: Value,
    /// Serial id; increases monotonically with each update.
    pub sid: i64,
}

/// Side-channel attribute bags keyed by sheet key.
///
/// A BTreeMap keeps sheet iteration deterministic.
pub type PropsheetMap = BTreeMap<String, Value>;

/// An alternate identity registered for an item, e.g. `("accession",
/// "XYZ001")` or `("alias", "md5:abc...")`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniqueKey {
    pub name: String,
    pub value: String,
}

impl UniqueKey {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}
