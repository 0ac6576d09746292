//! Item repository for DEPOT.
//!
//! CRUD over the generic item store: property documents, propsheets, and
//! unique-key registration. Each write runs in its own transaction; the
//! store serializes concurrent writers on one item, which is the only
//! entity-level concurrency control the domain layer relies on.

use sqlx::{Row, SqlitePool};

use serde_json::Value;

use super::item::{ItemRecord, PropsheetMap, UniqueKey};
use crate::{DepotError, Result};

/// Repository for item CRUD operations.
pub struct ItemRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> ItemRepository<'a> {
    /// Create a new ItemRepository with the given database pool reference.
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a new item with its propsheets and unique keys.
    pub async fn create(
        &self,
        uuid: &str,
        item_type: &str,
        properties: &Value,
        sheets: &PropsheetMap,
        unique_keys: &[UniqueKey],
    ) -> Result<ItemRecord> {
        let props_text = serde_json::to_string(properties)?;

        let mut tx = self.pool.begin().await?;

        sqlx::query("INSERT INTO items (uuid, item_type, properties, sid) VALUES (?, ?, ?, 1)")
            .bind(uuid)
            .bind(item_type)
            .bind(&props_text)
            .execute(&mut *tx)
            .await
            .map_err(|e| DepotError::Database(e.to_string()))?;

        for (sheet_key, body) in sheets {
            let body_text = serde_json::to_string(body)?;
            sqlx::query("INSERT INTO propsheets (item_uuid, sheet_key, body) VALUES (?, ?, ?)")
                .bind(uuid)
                .bind(sheet_key)
                .bind(&body_text)
                .execute(&mut *tx)
                .await
                .map_err(|e| DepotError::Database(e.to_string()))?;
        }

        for key in unique_keys {
            sqlx::query("INSERT INTO unique_keys (key_name, key_value, item_uuid) VALUES (?, ?, ?)")
                .bind(&key.name)
                .bind(&key.value)
                .bind(uuid)
                .execute(&mut *tx)
                .await
                .map_err(|e| DepotError::Database(e.to_string()))?;
        }

        tx.commit().await?;

        Ok(ItemRecord {
            uuid: uuid.to_string(),
            item_type: item_type.to_string(),
            properties: properties.clone(),
            sid: 1,
        })
    }

    /// Update an item's properties, merge the given propsheets, and replace
    /// its unique keys. Returns the new sid.
    pub async fn update(
        &self,
        uuid: &str,
        properties: &Value,
        sheets: &PropsheetMap,
        unique_keys: &[UniqueKey],
    ) -> Result<i64> {
        let props_text = serde_json::to_string(properties)?;

        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            "UPDATE items
             SET properties = ?, sid = sid + 1, updated_at = datetime('now')
             WHERE uuid = ?",
        )
        .bind(&props_text)
        .bind(uuid)
        .execute(&mut *tx)
        .await
        .map_err(|e| DepotError::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(DepotError::NotFound(format!("item {uuid}")));
        }

        for (sheet_key, body) in sheets {
            let body_text = serde_json::to_string(body)?;
            sqlx::query(
                "INSERT INTO propsheets (item_uuid, sheet_key, body) VALUES (?, ?, ?)
                 ON CONFLICT(item_uuid, sheet_key) DO UPDATE SET body = excluded.body",
            )
            .bind(uuid)
            .bind(sheet_key)
            .bind(&body_text)
            .execute(&mut *tx)
            .await
            .map_err(|e| DepotError::Database(e.to_string()))?;
        }

        sqlx::query("DELETE FROM unique_keys WHERE item_uuid = ?")
            .bind(uuid)
            .execute(&mut *tx)
            .await
            .map_err(|e| DepotError::Database(e.to_string()))?;

        for key in unique_keys {
            sqlx::query("INSERT INTO unique_keys (key_name, key_value, item_uuid) VALUES (?, ?, ?)")
                .bind(&key.name)
                .bind(&key.value)
                .bind(uuid)
                .execute(&mut *tx)
                .await
                .map_err(|e| DepotError::Database(e.to_string()))?;
        }

        let sid: i64 = sqlx::query_scalar("SELECT sid FROM items WHERE uuid = ?")
            .bind(uuid)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| DepotError::Database(e.to_string()))?;

        tx.commit().await?;

        Ok(sid)
    }

    /// Get an item by uuid.
    pub async fn get(&self, uuid: &str) -> Result<Option<ItemRecord>> {
        let row = sqlx::query("SELECT uuid, item_type, properties, sid FROM items WHERE uuid = ?")
            .bind(uuid)
            .fetch_optional(self.pool)
            .await
            .map_err(|e| DepotError::Database(e.to_string()))?;

        row.map(Self::row_to_record).transpose()
    }

    /// Look an item up by one of its registered unique keys.
    pub async fn get_by_unique_key(&self, name: &str, value: &str) -> Result<Option<ItemRecord>> {
        let row = sqlx::query(
            "SELECT i.uuid, i.item_type, i.properties, i.sid
             FROM items i
             JOIN unique_keys k ON k.item_uuid = i.uuid
             WHERE k.key_name = ? AND k.key_value = ?",
        )
        .bind(name)
        .bind(value)
        .fetch_optional(self.pool)
        .await
        .map_err(|e| DepotError::Database(e.to_string()))?;

        row.map(Self::row_to_record).transpose()
    }

    /// Get a single propsheet body for an item.
    pub async fn get_propsheet(&self, uuid: &str, sheet_key: &str) -> Result<Option<Value>> {
        let body: Option<String> = sqlx::query_scalar(
            "SELECT body FROM propsheets WHERE item_uuid = ? AND sheet_key = ?",
        )
        .bind(uuid)
        .bind(sheet_key)
        .fetch_optional(self.pool)
        .await
        .map_err(|e| DepotError::Database(e.to_string()))?;

        body.map(|b| serde_json::from_str(&b).map_err(Into::into))
            .transpose()
    }

    /// Get all propsheets for an item.
    pub async fn propsheets(&self, uuid: &str) -> Result<PropsheetMap> {
        let rows =
            sqlx::query("SELECT sheet_key, body FROM propsheets WHERE item_uuid = ?")
                .bind(uuid)
                .fetch_all(self.pool)
                .await
                .map_err(|e| DepotError::Database(e.to_string()))?;

        let mut sheets = PropsheetMap::new();
        for row in rows {
            let key: String = row.try_get("sheet_key")?;
            let body: String = row.try_get("body")?;
            sheets.insert(key, serde_json::from_str(&body)?);
        }
        Ok(sheets)
    }

    /// Find a non-replaced item of the given type carrying the given md5sum,
    /// excluding `exclude_uuid` (the item being written, if any).
    pub async fn find_md5_collision(
        &self,
        md5sum: &str,
        item_type: &str,
        exclude_uuid: Option<&str>,
    ) -> Result<Option<ItemRecord>> {
        let row = sqlx::query(
            "SELECT uuid, item_type, properties, sid FROM items
             WHERE item_type = ?
               AND json_extract(properties, '$.md5sum') = ?
               AND COALESCE(json_extract(properties, '$.status'), '') != 'replaced'
               AND uuid != COALESCE(?, '')",
        )
        .bind(item_type)
        .bind(md5sum)
        .bind(exclude_uuid)
        .fetch_optional(self.pool)
        .await
        .map_err(|e| DepotError::Database(e.to_string()))?;

        row.map(Self::row_to_record).transpose()
    }

    fn row_to_record(row: sqlx::sqlite::SqliteRow) -> Result<ItemRecord> {
        let properties: String = row.try_get("properties")?;
        Ok(ItemRecord {
            uuid: row.try_get("uuid")?,
            item_type: row.try_get("item_type")?,
            properties: serde_json::from_str(&properties)?,
            sid: row.try_get("sid")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use serde_json::json;

    async fn setup() -> Database {
        Database::open_in_memory().await.unwrap()
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let db = setup().await;
        let repo = ItemRepository::new(db.pool());

        let props = json!({"accession": "XYZ001", "status": "uploading"});
        let record = repo
            .create("u-1", "file_processed", &props, &PropsheetMap::new(), &[])
            .await
            .unwrap();
        assert_eq!(record.sid, 1);

        let fetched = repo.get("u-1").await.unwrap().unwrap();
        assert_eq!(fetched.item_type, "file_processed");
        assert_eq!(fetched.properties["accession"], "XYZ001");
    }

    #[tokio::test]
    async fn test_get_missing_returns_none() {
        let db = setup().await;
        let repo = ItemRepository::new(db.pool());
        assert!(repo.get("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_bumps_sid_and_merges_sheets() {
        let db = setup().await;
        let repo = ItemRepository::new(db.pool());

        repo.create(
            "u-1",
            "file_processed",
            &json!({"status": "uploading"}),
            &PropsheetMap::new(),
            &[],
        )
        .await
        .unwrap();

        let mut sheets = PropsheetMap::new();
        sheets.insert("external".to_string(), json!({"bucket": "b", "key": "k"}));
        let sid = repo
            .update("u-1", &json!({"status": "uploaded"}), &sheets, &[])
            .await
            .unwrap();
        assert_eq!(sid, 2);

        let sheet = repo.get_propsheet("u-1", "external").await.unwrap().unwrap();
        assert_eq!(sheet["bucket"], "b");

        // Merge, not replace: a second update with a different sheet keeps both
        let mut sheets2 = PropsheetMap::new();
        sheets2.insert("externalfmt".to_string(), json!({"key": "k2"}));
        repo.update("u-1", &json!({"status": "uploaded"}), &sheets2, &[])
            .await
            .unwrap();
        let all = repo.propsheets("u-1").await.unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn test_update_missing_item() {
        let db = setup().await;
        let repo = ItemRepository::new(db.pool());
        let err = repo
            .update("nope", &json!({}), &PropsheetMap::new(), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, DepotError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_unique_key_lookup_and_replacement() {
        let db = setup().await;
        let repo = ItemRepository::new(db.pool());

        repo.create(
            "u-1",
            "file_processed",
            &json!({"accession": "XYZ001"}),
            &PropsheetMap::new(),
            &[
                UniqueKey::new("accession", "XYZ001"),
                UniqueKey::new("alias", "md5:aaa"),
            ],
        )
        .await
        .unwrap();

        let by_md5 = repo.get_by_unique_key("alias", "md5:aaa").await.unwrap();
        assert_eq!(by_md5.unwrap().uuid, "u-1");

        // Replacing the key set drops the md5 alias
        repo.update(
            "u-1",
            &json!({"accession": "XYZ001", "status": "replaced"}),
            &PropsheetMap::new(),
            &[UniqueKey::new("accession", "XYZ001")],
        )
        .await
        .unwrap();
        assert!(repo
            .get_by_unique_key("alias", "md5:aaa")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_find_md5_collision() {
        let db = setup().await;
        let repo = ItemRepository::new(db.pool());

        repo.create(
            "u-1",
            "file_processed",
            &json!({"accession": "XYZ001", "md5sum": "aaa", "status": "uploaded"}),
            &PropsheetMap::new(),
            &[],
        )
        .await
        .unwrap();

        let hit = repo
            .find_md5_collision("aaa", "file_processed", None)
            .await
            .unwrap();
        assert_eq!(hit.unwrap().uuid, "u-1");

        // Excluding the owner finds nothing
        assert!(repo
            .find_md5_collision("aaa", "file_processed", Some("u-1"))
            .await
            .unwrap()
            .is_none());

        // Replaced files must not block reuse of their checksum
        repo.update(
            "u-1",
            &json!({"accession": "XYZ001", "md5sum": "aaa", "status": "replaced"}),
            &PropsheetMap::new(),
            &[],
        )
        .await
        .unwrap();
        assert!(repo
            .find_md5_collision("aaa", "file_processed", None)
            .await
            .unwrap()
            .is_none());
    }
}
