//! Post-commit re-index queue.
//!
//! Cross-entity writes (relation-edge propagation) must schedule the touched
//! collaborators for re-indexing after the triggering transaction commits.
//! The queue rows are consumed by the external indexing pipeline; this
//! repository only produces them.

use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use crate::{DepotError, Result};

/// A queued re-index request.
#[derive(Debug, Clone)]
pub struct IndexQueueEntry {
    pub id: i64,
    pub item_uuid: String,
    pub sid: i64,
    pub info: Option<String>,
    pub queued_at: DateTime<Utc>,
}

/// Repository for the re-index queue.
pub struct IndexQueueRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> IndexQueueRepository<'a> {
    /// Create a new IndexQueueRepository with the given pool reference.
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Enqueue an item for re-indexing.
    pub async fn enqueue(&self, item_uuid: &str, sid: i64, info: Option<&str>) -> Result<i64> {
        let result = sqlx::query("INSERT INTO index_queue (item_uuid, sid, info) VALUES (?, ?, ?)")
            .bind(item_uuid)
            .bind(sid)
            .bind(info)
            .execute(self.pool)
            .await
            .map_err(|e| DepotError::Database(e.to_string()))?;
        Ok(result.last_insert_rowid())
    }

    /// List queued entries for one item, oldest first.
    pub async fn list_for_item(&self, item_uuid: &str) -> Result<Vec<IndexQueueEntry>> {
        let rows = sqlx::query(
            "SELECT id, item_uuid, sid, info, queued_at FROM index_queue
             WHERE item_uuid = ? ORDER BY id",
        )
        .bind(item_uuid)
        .fetch_all(self.pool)
        .await
        .map_err(|e| DepotError::Database(e.to_string()))?;

        rows.into_iter()
            .map(|row| {
                let queued_at: String = row.try_get("queued_at")?;
                let queued_at = queued_at
                    .parse::<DateTime<Utc>>()
                    .or_else(|_| {
                        chrono::NaiveDateTime::parse_from_str(&queued_at, "%Y-%m-%d %H:%M:%S")
                            .map(|n| n.and_utc())
                    })
                    .unwrap_or_else(|_| Utc::now());
                Ok(IndexQueueEntry {
                    id: row.try_get("id")?,
                    item_uuid: row.try_get("item_uuid")?,
                    sid: row.try_get("sid")?,
                    info: row.try_get("info")?,
                    queued_at,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    #[tokio::test]
    async fn test_enqueue_and_list() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = IndexQueueRepository::new(db.pool());

        repo.enqueue("u-1", 3, Some("queued from u-2 update"))
            .await
            .unwrap();
        repo.enqueue("u-1", 4, None).await.unwrap();

        let entries = repo.list_for_item("u-1").await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].sid, 3);
        assert_eq!(entries[0].info.as_deref(), Some("queued from u-2 update"));
        assert_eq!(entries[1].sid, 4);

        assert!(repo.list_for_item("u-9").await.unwrap().is_empty());
    }
}
