//! 待同步变更队列
//!
//! 以 pendingChanges 区域为底座的有序、持久队列。用户的变更操作在返回前
//! 必须先完成入队（写入存储），这样即使页面随即关闭也不会丢失。
//! 队列长度在每次变更后从存储重新计数，写入共享的同步状态。

use crate::offline::clock::Clock;
use crate::offline::error::{OfflineError, Result};
use crate::offline::models::{ChangeType, PendingChange};
use crate::offline::status::SharedSyncStatus;
use crate::offline::store::{LocalStore, Record, Region};
use futures_util::TryStreamExt;
use std::sync::Arc;
use tracing::{debug, error, info};

pub struct PendingChangeQueue {
    store: Arc<dyn LocalStore>,
    clock: Arc<dyn Clock>,
    status: SharedSyncStatus,
}

impl PendingChangeQueue {
    pub fn new(store: Arc<dyn LocalStore>, clock: Arc<dyn Clock>, status: SharedSyncStatus) -> Self {
        Self {
            store,
            clock,
            status,
        }
    }

    /// 追加一条变更
    ///
    /// 存储失败时返回错误，调用方必须把对应的用户操作视为失败。
    pub async fn enqueue(
        &self,
        change_type: ChangeType,
        payload: serde_json::Value,
    ) -> Result<PendingChange> {
        if let ChangeType::Unknown(tag) = &change_type {
            return Err(OfflineError::UnknownChangeType(tag.clone()));
        }

        let timestamp = self.clock.now_millis();
        let change = self
            .store
            .append_pending(&change_type, &payload, timestamp)
            .await
            .map_err(|e| {
                error!("[PendingQueue] 入队失败 ({}): {}", change_type, e);
                e
            })?;
        let pending = self.refresh_count().await?;
        info!(
            "[PendingQueue] 入队 #{} ({})，当前待同步: {}",
            change.id, change.change_type, pending
        );
        Ok(change)
    }

    /// 按入队顺序返回当前全部变更的快照
    pub async fn drain(&self) -> Result<Vec<PendingChange>> {
        let changes: Vec<PendingChange> = self
            .store
            .iterate(Region::PendingChanges)
            .try_filter_map(|record| async move { Ok(record.into_pending_change()) })
            .try_collect()
            .await?;
        debug!("[PendingQueue] 读取队列快照，共 {} 条", changes.len());
        Ok(changes)
    }

    /// 删除已被远端确认的变更
    pub async fn remove(&self, id: i64) -> Result<()> {
        self.store
            .delete(Region::PendingChanges, &id.to_string())
            .await?;
        self.refresh_count().await?;
        Ok(())
    }

    pub async fn get(&self, id: i64) -> Result<Option<PendingChange>> {
        Ok(self
            .store
            .get(Region::PendingChanges, &id.to_string())
            .await?
            .and_then(Record::into_pending_change))
    }

    pub async fn len(&self) -> Result<u64> {
        self.store.count(Region::PendingChanges).await
    }

    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    /// 从存储重新计数并同步到状态
    pub async fn refresh_count(&self) -> Result<u64> {
        let count = self.store.count(Region::PendingChanges).await?;
        self.status.set_pending(count).await;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::offline::clock::ManualClock;
    use crate::offline::store::MemoryStore;
    use serde_json::json;

    fn setup() -> (PendingChangeQueue, Arc<MemoryStore>, SharedSyncStatus) {
        let clock = Arc::new(ManualClock::new(1_000));
        let store = Arc::new(MemoryStore::new(clock.clone()));
        let status = SharedSyncStatus::new();
        let queue = PendingChangeQueue::new(store.clone(), clock, status.clone());
        (queue, store, status)
    }

    #[tokio::test]
    async fn test_enqueue_preserves_fifo_order() {
        let (queue, _, status) = setup();
        for id in ["A", "B", "C"] {
            queue
                .enqueue(ChangeType::EventLike, json!({"eventId": id, "liked": true}))
                .await
                .unwrap();
        }

        let drained = queue.drain().await.unwrap();
        let ids: Vec<&str> = drained
            .iter()
            .filter_map(|c| c.referenced_event_id())
            .collect();
        assert_eq!(ids, vec!["A", "B", "C"]);
        assert_eq!(status.snapshot().await.pending_changes, 3);
    }

    #[tokio::test]
    async fn test_remove_updates_pending_count() {
        let (queue, _, status) = setup();
        let change = queue
            .enqueue(ChangeType::SearchSave, json!({"query": "jazz"}))
            .await
            .unwrap();
        assert_eq!(change.timestamp, 1_000);
        assert!(queue.get(change.id).await.unwrap().is_some());

        queue.remove(change.id).await.unwrap();
        assert!(queue.is_empty().await.unwrap());
        assert_eq!(status.snapshot().await.pending_changes, 0);
    }

    #[tokio::test]
    async fn test_enqueue_fails_loudly_when_storage_down() {
        let (queue, store, status) = setup();
        store.set_unavailable(true);

        let err = queue
            .enqueue(ChangeType::EventSave, json!({"eventId": "E1"}))
            .await
            .unwrap_err();
        assert!(err.is_storage());
        assert_eq!(status.snapshot().await.pending_changes, 0);
    }

    #[tokio::test]
    async fn test_unknown_type_is_rejected_at_enqueue() {
        let (queue, _, _) = setup();
        let err = queue
            .enqueue(ChangeType::from("event_share"), json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, OfflineError::UnknownChangeType(_)));
        assert_eq!(queue.len().await.unwrap(), 0);
    }
}
