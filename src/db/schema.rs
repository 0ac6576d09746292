//! Database schema and migrations for DEPOT.
//!
//! This module contains all database migrations that will be applied
//! sequentially when the database is first opened or upgraded.

/// Database migrations.
///
/// Each migration is a SQL script that will be executed in order.
/// The schema_version table tracks which migrations have been applied.
pub const MIGRATIONS: &[&str] = &[
    // v1: Initial schema - generic item store
    r#"
-- Items table: one row per entity, properties stored as JSON
CREATE TABLE items (
    uuid        TEXT PRIMARY KEY,
    item_type   TEXT NOT NULL,
    properties  TEXT NOT NULL,           -- JSON property document
    sid         INTEGER NOT NULL DEFAULT 1,  -- serial, bumped on every update
    created_at  TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at  TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX idx_items_item_type ON items(item_type);

-- Propsheets: side-channel attribute bags keyed by (item, sheet key).
-- Not part of the item's user-editable property document.
CREATE TABLE propsheets (
    item_uuid   TEXT NOT NULL REFERENCES items(uuid) ON DELETE CASCADE,
    sheet_key   TEXT NOT NULL,
    body        TEXT NOT NULL,           -- JSON
    PRIMARY KEY (item_uuid, sheet_key)
);

-- Unique keys: alternate identities (accession, md5 alias) per item
CREATE TABLE unique_keys (
    key_name    TEXT NOT NULL,
    key_value   TEXT NOT NULL,
    item_uuid   TEXT NOT NULL REFERENCES items(uuid) ON DELETE CASCADE,
    PRIMARY KEY (key_name, key_value)
);

CREATE INDEX idx_unique_keys_item ON unique_keys(item_uuid);
"#,
    // v2: Post-commit re-index queue
    r#"
-- Rows are consumed by the external indexing pipeline
CREATE TABLE index_queue (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    item_uuid   TEXT NOT NULL,
    sid         INTEGER NOT NULL,
    info        TEXT,
    queued_at   TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX idx_index_queue_item ON index_queue(item_uuid);
"#,
];
