//! 本地存储的 SQLite 实现（基于 sqlx）
//!
//! 每个区域对应一张表，表结构交由 `migrations/` 管理。

use crate::offline::clock::Clock;
use crate::offline::db::create_sqlite_pool_with_migration;
use crate::offline::error::{OfflineError, Result};
use crate::offline::models::{
    CachedEvent, CachedImage, CachedUserDatum, ChangeType, PendingChange,
};
use crate::offline::store::{LocalStore, Record, Region};
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use sqlx::sqlite::SqliteRow;
use sqlx::{Pool, Row, Sqlite};
use std::sync::Arc;
use tracing::{debug, error, info};

/// SQLite 本地存储
pub struct SqliteStore {
    pool: Pool<Sqlite>,
    clock: Arc<dyn Clock>,
}

impl SqliteStore {
    /// 使用已有连接池创建存储（迁移需已执行）
    pub fn new(pool: Pool<Sqlite>, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }

    /// 打开（必要时创建）数据库并执行迁移
    pub async fn open(db_url: &str, clock: Arc<dyn Clock>) -> Result<Self> {
        info!("[LocalStore] 打开本地存储: {}", db_url);
        let pool = create_sqlite_pool_with_migration(db_url)
            .await
            .map_err(|e| {
                error!("[LocalStore] 打开本地存储失败: {}", e);
                e
            })?;
        Ok(Self::new(pool, clock))
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    fn table(region: Region) -> &'static str {
        match region {
            Region::Events => "cached_events",
            Region::Images => "cached_images",
            Region::UserData => "user_data",
            Region::PendingChanges => "pending_changes",
        }
    }

    fn key_column(region: Region) -> &'static str {
        match region {
            Region::Events => "id",
            Region::Images => "url",
            Region::UserData => "key",
            Region::PendingChanges => "id",
        }
    }

    fn select_all_sql(region: Region) -> &'static str {
        match region {
            Region::Events => {
                "SELECT id, data, cached_at, last_accessed FROM cached_events ORDER BY id"
            }
            Region::Images => {
                "SELECT url, data, size, timestamp, last_accessed FROM cached_images ORDER BY url"
            }
            Region::UserData => "SELECT key, value, updated_at FROM user_data ORDER BY key",
            Region::PendingChanges => {
                "SELECT id, change_type, payload, timestamp FROM pending_changes ORDER BY id ASC"
            }
        }
    }

    fn select_one_sql(region: Region) -> &'static str {
        match region {
            Region::Events => {
                "SELECT id, data, cached_at, last_accessed FROM cached_events WHERE id = ?"
            }
            Region::Images => {
                "SELECT url, data, size, timestamp, last_accessed FROM cached_images WHERE url = ?"
            }
            Region::UserData => "SELECT key, value, updated_at FROM user_data WHERE key = ?",
            Region::PendingChanges => {
                "SELECT id, change_type, payload, timestamp FROM pending_changes WHERE id = ?"
            }
        }
    }

    fn parse_json(raw: &str, what: &str) -> Result<serde_json::Value> {
        serde_json::from_str(raw)
            .map_err(|e| OfflineError::StorageUnavailable(format!("{} 数据损坏: {}", what, e)))
    }

    fn decode(region: Region, row: &SqliteRow) -> Result<Record> {
        let record = match region {
            Region::Events => {
                let data: String = row.try_get("data")?;
                Record::Event(CachedEvent {
                    id: row.try_get("id")?,
                    data: Self::parse_json(&data, "活动")?,
                    cached_at: row.try_get("cached_at")?,
                    last_accessed: row.try_get("last_accessed")?,
                })
            }
            Region::Images => Record::Image(CachedImage {
                url: row.try_get("url")?,
                data: row.try_get("data")?,
                size: row.try_get::<i64, _>("size")? as u64,
                timestamp: row.try_get("timestamp")?,
                last_accessed: row.try_get("last_accessed")?,
            }),
            Region::UserData => {
                let value: String = row.try_get("value")?;
                Record::UserDatum(CachedUserDatum {
                    key: row.try_get("key")?,
                    value: Self::parse_json(&value, "用户数据")?,
                    updated_at: row.try_get("updated_at")?,
                })
            }
            Region::PendingChanges => {
                let change_type: String = row.try_get("change_type")?;
                let payload: String = row.try_get("payload")?;
                Record::PendingChange(PendingChange {
                    id: row.try_get("id")?,
                    change_type: ChangeType::from(change_type),
                    payload: Self::parse_json(&payload, "待同步变更")?,
                    timestamp: row.try_get("timestamp")?,
                })
            }
        };
        Ok(record)
    }

    fn pending_id(key: &str) -> Option<i64> {
        key.parse::<i64>().ok()
    }
}

#[async_trait]
impl LocalStore for SqliteStore {
    async fn put(&self, record: Record) -> Result<()> {
        match &record {
            Record::Event(e) => {
                sqlx::query(
                    r#"
                    INSERT INTO cached_events (id, data, cached_at, last_accessed)
                    VALUES (?, ?, ?, ?)
                    ON CONFLICT(id) DO UPDATE SET
                        data = excluded.data,
                        cached_at = excluded.cached_at,
                        last_accessed = excluded.last_accessed
                    "#,
                )
                .bind(&e.id)
                .bind(e.data.to_string())
                .bind(e.cached_at)
                .bind(e.last_accessed)
                .execute(&self.pool)
                .await?;
            }
            Record::Image(i) => {
                sqlx::query(
                    r#"
                    INSERT INTO cached_images (url, data, size, timestamp, last_accessed)
                    VALUES (?, ?, ?, ?, ?)
                    ON CONFLICT(url) DO UPDATE SET
                        data = excluded.data,
                        size = excluded.size,
                        timestamp = excluded.timestamp,
                        last_accessed = excluded.last_accessed
                    "#,
                )
                .bind(&i.url)
                .bind(&i.data)
                .bind(i.size as i64)
                .bind(i.timestamp)
                .bind(i.last_accessed)
                .execute(&self.pool)
                .await?;
            }
            Record::UserDatum(d) => {
                sqlx::query(
                    r#"
                    INSERT INTO user_data (key, value, updated_at)
                    VALUES (?, ?, ?)
                    ON CONFLICT(key) DO UPDATE SET
                        value = excluded.value,
                        updated_at = excluded.updated_at
                    "#,
                )
                .bind(&d.key)
                .bind(d.value.to_string())
                .bind(d.updated_at)
                .execute(&self.pool)
                .await?;
            }
            Record::PendingChange(c) => {
                sqlx::query(
                    r#"
                    INSERT INTO pending_changes (id, change_type, payload, timestamp)
                    VALUES (?, ?, ?, ?)
                    ON CONFLICT(id) DO UPDATE SET
                        change_type = excluded.change_type,
                        payload = excluded.payload,
                        timestamp = excluded.timestamp
                    "#,
                )
                .bind(c.id)
                .bind(c.change_type.as_str())
                .bind(c.payload.to_string())
                .bind(c.timestamp)
                .execute(&self.pool)
                .await?;
            }
        }
        debug!(
            "[LocalStore] put {}:{}",
            record.region(),
            record.key()
        );
        Ok(())
    }

    async fn get(&self, region: Region, key: &str) -> Result<Option<Record>> {
        if region == Region::PendingChanges {
            let Some(id) = Self::pending_id(key) else {
                return Ok(None);
            };
            let row = sqlx::query(Self::select_one_sql(region))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
            return row.map(|r| Self::decode(region, &r)).transpose();
        }

        if !region.tracks_access() {
            let row = sqlx::query(Self::select_one_sql(region))
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;
            return row.map(|r| Self::decode(region, &r)).transpose();
        }

        // 读取与刷新 last_accessed 放在同一事务中
        let now = self.clock.now_millis();
        let mut tx = self.pool.begin().await?;
        let update_sql = format!(
            "UPDATE {} SET last_accessed = ? WHERE {} = ?",
            Self::table(region),
            Self::key_column(region)
        );
        let updated = sqlx::query(&update_sql)
            .bind(now)
            .bind(key)
            .execute(&mut *tx)
            .await?;
        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            debug!("[LocalStore] 未命中 {}:{}", region, key);
            return Ok(None);
        }
        let row = sqlx::query(Self::select_one_sql(region))
            .bind(key)
            .fetch_one(&mut *tx)
            .await?;
        tx.commit().await?;
        Self::decode(region, &row).map(Some)
    }

    async fn delete(&self, region: Region, key: &str) -> Result<()> {
        let sql = format!(
            "DELETE FROM {} WHERE {} = ?",
            Self::table(region),
            Self::key_column(region)
        );
        if region == Region::PendingChanges {
            let Some(id) = Self::pending_id(key) else {
                return Ok(());
            };
            sqlx::query(&sql).bind(id).execute(&self.pool).await?;
        } else {
            sqlx::query(&sql).bind(key).execute(&self.pool).await?;
        }
        debug!("[LocalStore] delete {}:{}", region, key);
        Ok(())
    }

    async fn count(&self, region: Region) -> Result<u64> {
        let sql = format!("SELECT COUNT(*) AS count FROM {}", Self::table(region));
        let row = sqlx::query(&sql).fetch_one(&self.pool).await?;
        let count: i64 = row.try_get("count")?;
        Ok(count as u64)
    }

    fn iterate(&self, region: Region) -> BoxStream<'_, Result<Record>> {
        sqlx::query(Self::select_all_sql(region))
            .fetch(&self.pool)
            .map(move |row| {
                row.map_err(OfflineError::from)
                    .and_then(|r| Self::decode(region, &r))
            })
            .boxed()
    }

    async fn append_pending(
        &self,
        change_type: &ChangeType,
        payload: &serde_json::Value,
        timestamp: i64,
    ) -> Result<PendingChange> {
        let result = sqlx::query(
            r#"
            INSERT INTO pending_changes (change_type, payload, timestamp)
            VALUES (?, ?, ?)
            "#,
        )
        .bind(change_type.as_str())
        .bind(payload.to_string())
        .bind(timestamp)
        .execute(&self.pool)
        .await?;

        let change = PendingChange {
            id: result.last_insert_rowid(),
            change_type: change_type.clone(),
            payload: payload.clone(),
            timestamp,
        };
        debug!(
            "[LocalStore] 追加待同步变更 #{} ({})",
            change.id, change.change_type
        );
        Ok(change)
    }

    async fn clear(&self, region: Region) -> Result<()> {
        let sql = format!("DELETE FROM {}", Self::table(region));
        let result = sqlx::query(&sql).execute(&self.pool).await?;
        info!(
            "[LocalStore] 已清空区域 {}，删除 {} 条",
            region,
            result.rows_affected()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::offline::clock::ManualClock;
    use futures_util::TryStreamExt;
    use serde_json::json;

    async fn setup_store(clock: Arc<ManualClock>) -> SqliteStore {
        SqliteStore::open("sqlite::memory:", clock).await.unwrap()
    }

    fn event(id: &str, now: i64) -> Record {
        Record::Event(CachedEvent {
            id: id.to_string(),
            data: json!({"title": format!("活动 {}", id), "category": "music"}),
            cached_at: now,
            last_accessed: now,
        })
    }

    #[tokio::test]
    async fn test_event_round_trip_advances_last_accessed() {
        let clock = Arc::new(ManualClock::new(1_000));
        let store = setup_store(clock.clone()).await;

        store.put(event("evt-42", 1_000)).await.unwrap();
        clock.advance(500);

        let cached = store
            .get(Region::Events, "evt-42")
            .await
            .unwrap()
            .and_then(Record::into_event)
            .unwrap();
        assert_eq!(cached.data["category"], json!("music"));
        assert_eq!(cached.cached_at, 1_000);
        assert_eq!(cached.last_accessed, 1_500);
        assert!(cached.last_accessed > cached.cached_at);
    }

    #[tokio::test]
    async fn test_put_overwrites_and_delete_is_idempotent() {
        let clock = Arc::new(ManualClock::new(0));
        let store = setup_store(clock).await;

        store
            .put(Record::UserDatum(CachedUserDatum {
                key: "theme".into(),
                value: json!("light"),
                updated_at: 1,
            }))
            .await
            .unwrap();
        store
            .put(Record::UserDatum(CachedUserDatum {
                key: "theme".into(),
                value: json!("dark"),
                updated_at: 2,
            }))
            .await
            .unwrap();
        assert_eq!(store.count(Region::UserData).await.unwrap(), 1);

        let datum = store
            .get(Region::UserData, "theme")
            .await
            .unwrap()
            .and_then(Record::into_user_datum)
            .unwrap();
        assert_eq!(datum.value, json!("dark"));

        store.delete(Region::UserData, "theme").await.unwrap();
        store.delete(Region::UserData, "theme").await.unwrap();
        assert_eq!(store.count(Region::UserData).await.unwrap(), 0);
        assert!(store.get(Region::UserData, "theme").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_pending_ids_are_monotonic_and_iterate_in_order() {
        let clock = Arc::new(ManualClock::new(0));
        let store = setup_store(clock).await;

        let a = store
            .append_pending(&ChangeType::EventLike, &json!({"eventId": "A"}), 1)
            .await
            .unwrap();
        let b = store
            .append_pending(&ChangeType::EventSave, &json!({"eventId": "B"}), 2)
            .await
            .unwrap();
        assert!(b.id > a.id);

        store.clear(Region::PendingChanges).await.unwrap();
        let c = store
            .append_pending(&ChangeType::SearchSave, &json!({"query": "jazz"}), 3)
            .await
            .unwrap();
        assert!(c.id > b.id, "清空后 ID 也不应回退");

        let d = store
            .append_pending(&ChangeType::EventLike, &json!({"eventId": "D"}), 4)
            .await
            .unwrap();
        let ids: Vec<i64> = store
            .iterate(Region::PendingChanges)
            .map_ok(|r| r.into_pending_change().unwrap().id)
            .try_collect()
            .await
            .unwrap();
        assert_eq!(ids, vec![c.id, d.id]);
    }

    #[tokio::test]
    async fn test_iterate_is_restartable() {
        let clock = Arc::new(ManualClock::new(0));
        let store = setup_store(clock).await;
        for id in ["a", "b", "c"] {
            store.put(event(id, 0)).await.unwrap();
        }

        let first: Vec<Record> = store.iterate(Region::Events).try_collect().await.unwrap();
        let second: Vec<Record> = store.iterate(Region::Events).try_collect().await.unwrap();
        assert_eq!(first.len(), 3);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_image_blob_round_trip() {
        let clock = Arc::new(ManualClock::new(10));
        let store = setup_store(clock).await;
        let bytes = vec![0u8, 1, 2, 3, 255];
        store
            .put(Record::Image(CachedImage {
                url: "https://cdn.test/a.png".into(),
                data: bytes.clone(),
                size: bytes.len() as u64,
                timestamp: 10,
                last_accessed: 10,
            }))
            .await
            .unwrap();

        let image = store
            .get(Region::Images, "https://cdn.test/a.png")
            .await
            .unwrap()
            .and_then(Record::into_image)
            .unwrap();
        assert_eq!(image.data, bytes);
        assert_eq!(image.size, 5);
    }

    #[tokio::test]
    async fn test_data_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_url = format!(
            "sqlite://{}?mode=rwc",
            dir.path().join("offline.db").display()
        );
        let clock = Arc::new(ManualClock::new(0));

        {
            let store = SqliteStore::open(&db_url, clock.clone()).await.unwrap();
            store
                .append_pending(&ChangeType::EventLike, &json!({"eventId": "E1"}), 1)
                .await
                .unwrap();
            store.pool().close().await;
        }

        let reopened = SqliteStore::open(&db_url, clock).await.unwrap();
        assert_eq!(reopened.count(Region::PendingChanges).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_closed_pool_reports_storage_unavailable() {
        let clock = Arc::new(ManualClock::new(0));
        let store = setup_store(clock).await;
        store.pool().close().await;

        let err = store.count(Region::Events).await.unwrap_err();
        assert!(err.is_storage());
    }
}
