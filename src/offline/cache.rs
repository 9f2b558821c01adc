//! 缓存管理器
//!
//! 负责三件事：
//! - 全量扫描本地存储得出 [`CacheStats`]（活动按序列化长度计、图片按字节数计、
//!   用户数据只计条目数）；
//! - 超出上限时按 last_accessed 升序（LRU）淘汰活动与图片；
//! - 缓存写入与读取的便捷入口（cache-aside 读路径使用）。
//!
//! 统计与淘汰不与并发读写互斥，结果是尽力而为的快照。

use crate::offline::clock::Clock;
use crate::offline::error::Result;
use crate::offline::listener::ListenerSlot;
use crate::offline::models::{CacheStats, CachedEvent, CachedImage, CachedUserDatum};
use crate::offline::status::SharedSyncStatus;
use crate::offline::store::{LocalStore, Record, Region};
use futures_util::TryStreamExt;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// 一次淘汰的结果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvictionReport {
    pub evicted_events: u64,
    pub evicted_images: u64,
    pub freed_bytes: u64,
    pub remaining_bytes: u64,
    /// 因被待同步变更引用而跳过的条目数
    pub protected: u64,
}

impl EvictionReport {
    pub fn evicted(&self) -> u64 {
        self.evicted_events + self.evicted_images
    }
}

struct EvictionCandidate {
    region: Region,
    key: String,
    size: u64,
    last_accessed: i64,
}

pub struct CacheManager {
    store: Arc<dyn LocalStore>,
    clock: Arc<dyn Clock>,
    status: SharedSyncStatus,
    listener: ListenerSlot,
    last_stats: RwLock<Option<CacheStats>>,
}

impl CacheManager {
    pub fn new(
        store: Arc<dyn LocalStore>,
        clock: Arc<dyn Clock>,
        status: SharedSyncStatus,
        listener: ListenerSlot,
    ) -> Self {
        Self {
            store,
            clock,
            status,
            listener,
            last_stats: RwLock::new(None),
        }
    }

    /// 全量扫描四个区域，生成统计快照并通知监听器
    pub async fn refresh_stats(&self) -> Result<CacheStats> {
        let mut stats = CacheStats::default();

        for region in Region::ALL {
            let (count, bytes) = self
                .store
                .iterate(region)
                .try_fold((0u64, 0u64), |(count, bytes), record| async move {
                    Ok((count + 1, bytes + record.byte_size()))
                })
                .await?;
            match region {
                Region::Events => stats.events = count,
                Region::Images => stats.images = count,
                Region::UserData => stats.user_data = count,
                Region::PendingChanges => stats.pending_changes = count,
            }
            stats.total_size += bytes;
        }
        stats.last_sync = self.clock.now_millis();

        debug!(
            "[CacheManager] 统计完成 - 活动: {}, 图片: {}, 用户数据: {}, 待同步: {}, 总大小: {} 字节",
            stats.events, stats.images, stats.user_data, stats.pending_changes, stats.total_size
        );

        *self.last_stats.write().await = Some(stats.clone());
        self.listener.get().on_cache_stats_updated(stats.clone()).await;
        Ok(stats)
    }

    /// 最近一次统计结果
    pub async fn last_stats(&self) -> Option<CacheStats> {
        self.last_stats.read().await.clone()
    }

    /// 被待同步变更引用的活动 ID
    async fn protected_event_ids(&self) -> Result<HashSet<String>> {
        self.store
            .iterate(Region::PendingChanges)
            .try_filter_map(|record| async move {
                Ok(record
                    .into_pending_change()
                    .and_then(|c| c.referenced_event_id().map(str::to_string)))
            })
            .try_collect()
            .await
    }

    async fn eviction_candidates(&self) -> Result<Vec<EvictionCandidate>> {
        let mut candidates = Vec::new();
        for region in [Region::Events, Region::Images] {
            let records: Vec<Record> = self.store.iterate(region).try_collect().await?;
            candidates.extend(records.into_iter().map(|record| EvictionCandidate {
                region,
                size: record.byte_size(),
                last_accessed: record.last_accessed().unwrap_or(0),
                key: record.key(),
            }));
        }
        Ok(candidates)
    }

    /// 总大小超过 `max_bytes` 时按 LRU 淘汰活动与图片
    ///
    /// 结束后总大小不超过 `max_bytes`，除非剩余条目全部受保护。
    pub async fn enforce_limit(&self, max_bytes: u64) -> Result<EvictionReport> {
        let mut candidates = self.eviction_candidates().await?;
        let mut total: u64 = candidates.iter().map(|c| c.size).sum();
        let mut report = EvictionReport {
            remaining_bytes: total,
            ..Default::default()
        };

        if total <= max_bytes {
            debug!(
                "[CacheManager] 缓存大小 {} 未超过上限 {}，无需淘汰",
                total, max_bytes
            );
            return Ok(report);
        }

        let protected = self.protected_event_ids().await?;
        candidates.sort_by(|a, b| {
            a.last_accessed
                .cmp(&b.last_accessed)
                .then_with(|| a.key.cmp(&b.key))
        });

        info!(
            "[CacheManager] 缓存大小 {} 超过上限 {}，开始 LRU 淘汰",
            total, max_bytes
        );

        for candidate in candidates {
            if total <= max_bytes {
                break;
            }
            if candidate.region == Region::Events && protected.contains(&candidate.key) {
                debug!(
                    "[CacheManager]   跳过被待同步变更引用的活动: {}",
                    candidate.key
                );
                report.protected += 1;
                continue;
            }

            self.store.delete(candidate.region, &candidate.key).await?;
            total = total.saturating_sub(candidate.size);
            report.freed_bytes += candidate.size;
            match candidate.region {
                Region::Events => report.evicted_events += 1,
                _ => report.evicted_images += 1,
            }
            debug!(
                "[CacheManager]   淘汰 {}:{} ({} 字节)",
                candidate.region, candidate.key, candidate.size
            );
        }

        report.remaining_bytes = total;
        if total > max_bytes {
            warn!(
                "[CacheManager] 淘汰后仍超出上限: {} > {}（剩余条目均受保护）",
                total, max_bytes
            );
        }
        info!(
            "[CacheManager] 淘汰完成 - 活动: {}, 图片: {}, 释放: {} 字节, 剩余: {} 字节",
            report.evicted_events, report.evicted_images, report.freed_bytes, report.remaining_bytes
        );
        Ok(report)
    }

    /// 清空所有区域（包括待同步变更），不可恢复
    ///
    /// 这是从损坏或超配额的本地存储中恢复的唯一手段。
    pub async fn clear_all(&self) -> Result<()> {
        warn!("[CacheManager] 清空全部本地缓存（包括待同步变更）");
        for region in Region::ALL {
            self.store.clear(region).await?;
        }
        self.status.set_pending(0).await;
        *self.last_stats.write().await = None;

        let status = self.status.snapshot().await;
        self.listener.get().on_sync_status_changed(status).await;
        Ok(())
    }

    /// 写入一条活动快照
    pub async fn cache_event(&self, id: &str, data: serde_json::Value) -> Result<CachedEvent> {
        let now = self.clock.now_millis();
        let event = CachedEvent {
            id: id.to_string(),
            data,
            cached_at: now,
            last_accessed: now,
        };
        self.store.put(Record::Event(event.clone())).await?;
        Ok(event)
    }

    pub async fn get_cached_event(&self, id: &str) -> Result<Option<CachedEvent>> {
        Ok(self
            .store
            .get(Region::Events, id)
            .await?
            .and_then(Record::into_event))
    }

    pub async fn cache_image(&self, url: &str, data: Vec<u8>) -> Result<CachedImage> {
        let now = self.clock.now_millis();
        let image = CachedImage {
            url: url.to_string(),
            size: data.len() as u64,
            data,
            timestamp: now,
            last_accessed: now,
        };
        self.store.put(Record::Image(image.clone())).await?;
        Ok(image)
    }

    pub async fn get_cached_image(&self, url: &str) -> Result<Option<CachedImage>> {
        Ok(self
            .store
            .get(Region::Images, url)
            .await?
            .and_then(Record::into_image))
    }

    pub async fn set_user_data(&self, key: &str, value: serde_json::Value) -> Result<()> {
        let datum = CachedUserDatum {
            key: key.to_string(),
            value,
            updated_at: self.clock.now_millis(),
        };
        self.store.put(Record::UserDatum(datum)).await
    }

    pub async fn get_user_data(&self, key: &str) -> Result<Option<serde_json::Value>> {
        Ok(self
            .store
            .get(Region::UserData, key)
            .await?
            .and_then(Record::into_user_datum)
            .map(|d| d.value))
    }

    pub async fn remove_user_data(&self, key: &str) -> Result<()> {
        self.store.delete(Region::UserData, key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::offline::clock::ManualClock;
    use crate::offline::listener::OfflineListener;
    use crate::offline::models::{ChangeType, SyncStatus};
    use crate::offline::store::MemoryStore;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingListener {
        stats: Mutex<Vec<CacheStats>>,
        statuses: Mutex<Vec<SyncStatus>>,
    }

    #[async_trait]
    impl OfflineListener for RecordingListener {
        async fn on_cache_stats_updated(&self, stats: CacheStats) {
            self.stats.lock().unwrap().push(stats);
        }

        async fn on_sync_status_changed(&self, status: SyncStatus) {
            self.statuses.lock().unwrap().push(status);
        }
    }

    struct Fixture {
        manager: CacheManager,
        store: Arc<MemoryStore>,
        clock: Arc<ManualClock>,
        status: SharedSyncStatus,
        listener: Arc<RecordingListener>,
    }

    fn setup() -> Fixture {
        let clock = Arc::new(ManualClock::new(1_000));
        let store = Arc::new(MemoryStore::new(clock.clone()));
        let status = SharedSyncStatus::new();
        let listener = Arc::new(RecordingListener::default());
        let manager = CacheManager::new(
            store.clone(),
            clock.clone(),
            status.clone(),
            ListenerSlot::new(listener.clone()),
        );
        Fixture {
            manager,
            store,
            clock,
            status,
            listener,
        }
    }

    #[tokio::test]
    async fn test_refresh_stats_is_idempotent() {
        let fx = setup();
        fx.manager
            .cache_event("evt-1", json!({"title": "Jazz night"}))
            .await
            .unwrap();
        fx.manager
            .cache_image("https://cdn.test/1.png", vec![7; 64])
            .await
            .unwrap();
        fx.manager.set_user_data("city", json!("Lyon")).await.unwrap();

        let first = fx.manager.refresh_stats().await.unwrap();
        fx.clock.advance(10_000);
        let second = fx.manager.refresh_stats().await.unwrap();

        assert_eq!(first.events, 1);
        assert_eq!(first.images, 1);
        assert_eq!(first.user_data, 1);
        assert_eq!(
            (first.events, first.images, first.user_data, first.total_size),
            (second.events, second.images, second.user_data, second.total_size)
        );
        assert!(second.last_sync > first.last_sync);
        assert_eq!(fx.listener.stats.lock().unwrap().len(), 2);
        assert_eq!(fx.manager.last_stats().await, Some(second));
    }

    #[tokio::test]
    async fn test_total_size_counts_events_and_images_only() {
        let fx = setup();
        let event = fx
            .manager
            .cache_event("evt-1", json!({"title": "x"}))
            .await
            .unwrap();
        fx.manager
            .cache_image("https://cdn.test/1.png", vec![0; 100])
            .await
            .unwrap();
        fx.manager
            .set_user_data("big", json!("y".repeat(1_000)))
            .await
            .unwrap();

        let stats = fx.manager.refresh_stats().await.unwrap();
        assert_eq!(stats.total_size, event.estimated_size() + 100);
    }

    #[tokio::test]
    async fn test_enforce_limit_evicts_least_recently_used_first() {
        let fx = setup();
        for (i, url) in ["https://cdn.test/a", "https://cdn.test/b", "https://cdn.test/c"]
            .iter()
            .enumerate()
        {
            fx.clock.set(1_000 + i as i64);
            fx.manager.cache_image(url, vec![0; 100]).await.unwrap();
        }
        // 读取 a，使其成为最近访问
        fx.clock.set(2_000);
        fx.manager
            .get_cached_image("https://cdn.test/a")
            .await
            .unwrap()
            .unwrap();

        let report = fx.manager.enforce_limit(200).await.unwrap();
        assert_eq!(report.evicted_images, 1);
        assert_eq!(report.freed_bytes, 100);
        assert!(report.remaining_bytes <= 200);
        assert!(fx
            .store
            .get(Region::Images, "https://cdn.test/b")
            .await
            .unwrap()
            .is_none());
        assert!(fx
            .store
            .get(Region::Images, "https://cdn.test/a")
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_enforce_limit_bound_holds() {
        let fx = setup();
        for i in 0..20 {
            fx.clock.advance(1);
            fx.manager
                .cache_event(&format!("evt-{i}"), json!({"title": "x".repeat(i * 10)}))
                .await
                .unwrap();
            fx.manager
                .cache_image(&format!("https://cdn.test/{i}"), vec![1; i * 7])
                .await
                .unwrap();
        }

        let max = 700;
        let report = fx.manager.enforce_limit(max).await.unwrap();
        let stats = fx.manager.refresh_stats().await.unwrap();
        assert!(stats.total_size <= max);
        assert_eq!(stats.total_size, report.remaining_bytes);
        assert!(report.evicted() > 0);
    }

    #[tokio::test]
    async fn test_enforce_limit_noop_under_limit() {
        let fx = setup();
        fx.manager
            .cache_image("https://cdn.test/a", vec![0; 10])
            .await
            .unwrap();
        let report = fx.manager.enforce_limit(1_000).await.unwrap();
        assert_eq!(report.evicted(), 0);
        assert_eq!(report.remaining_bytes, 10);
    }

    #[tokio::test]
    async fn test_pending_referenced_events_are_protected() {
        let fx = setup();
        fx.manager
            .cache_event("E1", json!({"title": "liked offline"}))
            .await
            .unwrap();
        fx.clock.advance(1);
        fx.manager
            .cache_event("E2", json!({"title": "other"}))
            .await
            .unwrap();
        fx.store
            .append_pending(&ChangeType::EventLike, &json!({"eventId": "E1"}), 0)
            .await
            .unwrap();

        let report = fx.manager.enforce_limit(1).await.unwrap();
        assert_eq!(report.protected, 1);
        assert_eq!(report.evicted_events, 1);
        assert!(fx.store.get(Region::Events, "E1").await.unwrap().is_some());
        assert!(fx.store.get(Region::Events, "E2").await.unwrap().is_none());
        // 只剩受保护条目，允许超出上限
        assert!(report.remaining_bytes > 1);
    }

    #[tokio::test]
    async fn test_clear_all_resets_pending_count() {
        let fx = setup();
        fx.manager
            .cache_event("E1", json!({}))
            .await
            .unwrap();
        fx.store
            .append_pending(&ChangeType::EventSave, &json!({"eventId": "E1"}), 0)
            .await
            .unwrap();
        fx.status.set_pending(1).await;

        fx.manager.clear_all().await.unwrap();

        for region in Region::ALL {
            assert_eq!(fx.store.count(region).await.unwrap(), 0);
        }
        assert_eq!(fx.status.snapshot().await.pending_changes, 0);
        let statuses = fx.listener.statuses.lock().unwrap();
        assert_eq!(statuses.last().map(|s| s.pending_changes), Some(0));
    }

    #[tokio::test]
    async fn test_user_data_round_trip() {
        let fx = setup();
        fx.manager
            .set_user_data("recentSearches", json!(["jazz", "food"]))
            .await
            .unwrap();
        assert_eq!(
            fx.manager.get_user_data("recentSearches").await.unwrap(),
            Some(json!(["jazz", "food"]))
        );
        fx.manager.remove_user_data("recentSearches").await.unwrap();
        assert_eq!(fx.manager.get_user_data("recentSearches").await.unwrap(), None);
    }
}
