//! 离线数据层客户端
//!
//! 把本地存储、待同步队列、缓存管理、同步引擎、连通性监视器与调度器
//! 组装成一个对象，供宿主应用持有。UI 层的写操作（点赞、收藏、保存搜索）
//! 先持久化进队列再返回，读操作走 cache-aside。

use crate::offline::api::{HttpRemoteApi, RemoteApi};
use crate::offline::cache::{CacheManager, EvictionReport};
use crate::offline::clock::{Clock, SystemClock};
use crate::offline::config::OfflineConfig;
use crate::offline::connectivity::ConnectivityMonitor;
use crate::offline::error::Result;
use crate::offline::listener::{ListenerSlot, OfflineListener};
use crate::offline::models::{
    CacheStats, CachedEvent, CachedImage, ChangeType, PendingChange, SyncStatus,
};
use crate::offline::queue::PendingChangeQueue;
use crate::offline::scheduler::Scheduler;
use crate::offline::status::SharedSyncStatus;
use crate::offline::store::{LocalStore, SqliteStore};
use crate::offline::sync::{PreloadReport, SyncEngine};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// 离线数据层客户端
///
/// 可廉价克隆，所有克隆共享同一组组件。
#[derive(Clone)]
pub struct OfflineClient {
    config: OfflineConfig,
    queue: Arc<PendingChangeQueue>,
    cache: Arc<CacheManager>,
    engine: Arc<SyncEngine>,
    remote: Arc<dyn RemoteApi>,
    connectivity: ConnectivityMonitor,
    listener: ListenerSlot,
    scheduler: Arc<Scheduler>,
}

impl OfflineClient {
    /// 按配置打开 SQLite 存储并创建 HTTP 客户端
    pub async fn open(config: OfflineConfig) -> Result<Self> {
        config.validate()?;
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let store = Arc::new(SqliteStore::open(&config.db_url, clock.clone()).await?);
        let remote = Arc::new(HttpRemoteApi::from_config(&config)?);
        info!(
            "[OfflineClient] ✅ 本地存储已打开: {}, API: {}",
            config.db_url, config.api_base_url
        );
        let client = Self::with_parts(config, store, remote, clock);
        // 恢复上次会话遗留的待同步计数
        client.queue.refresh_count().await?;
        Ok(client)
    }

    /// 使用外部提供的组件组装；初始视为离线，直到平台上报网络状态
    pub fn with_parts(
        config: OfflineConfig,
        store: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteApi>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let status = SharedSyncStatus::new();
        let listener = ListenerSlot::default();
        let connectivity = ConnectivityMonitor::new(false);
        let online_status = status.clone();
        connectivity.register(move |online| online_status.publish_online(online));
        let queue = Arc::new(PendingChangeQueue::new(
            store.clone(),
            clock.clone(),
            status.clone(),
        ));
        let cache = Arc::new(CacheManager::new(
            store,
            clock.clone(),
            status.clone(),
            listener.clone(),
        ));
        let engine = Arc::new(SyncEngine::new(
            queue.clone(),
            cache.clone(),
            remote.clone(),
            connectivity.clone(),
            status,
            listener.clone(),
            clock,
        ));
        Self {
            config,
            queue,
            cache,
            engine,
            remote,
            connectivity,
            listener,
            scheduler: Arc::new(Scheduler::new()),
        }
    }

    pub fn config(&self) -> &OfflineConfig {
        &self.config
    }

    /// 平台可在此注册额外的网络切换回调
    pub fn connectivity(&self) -> &ConnectivityMonitor {
        &self.connectivity
    }

    pub fn set_listener(&self, listener: Arc<dyn OfflineListener>) {
        self.listener.set(listener);
    }

    /// 恢复待同步计数并启动后台调度
    pub async fn start(&self) -> Result<()> {
        if !self.config.enabled {
            warn!("[OfflineClient] 离线子系统已禁用，不启动调度");
            return Ok(());
        }
        let pending = self.queue.refresh_count().await?;
        self.scheduler.start(
            self.cache.clone(),
            self.engine.clone(),
            self.connectivity.clone(),
            &self.config,
        );
        info!("[OfflineClient] 已启动，待同步变更: {}", pending);
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.scheduler.is_running()
    }

    pub fn shutdown(&self) {
        self.scheduler.shutdown();
    }

    /// 平台网络信号入口
    pub fn set_online(&self, online: bool) {
        self.connectivity.set_online(online);
    }

    pub async fn like_event(&self, event_id: &str, liked: bool) -> Result<PendingChange> {
        self.queue
            .enqueue(
                ChangeType::EventLike,
                json!({ "eventId": event_id, "liked": liked }),
            )
            .await
    }

    pub async fn save_event(&self, event_id: &str) -> Result<PendingChange> {
        self.queue
            .enqueue(ChangeType::EventSave, json!({ "eventId": event_id }))
            .await
    }

    pub async fn save_search(&self, query: &str) -> Result<PendingChange> {
        self.queue
            .enqueue(ChangeType::SearchSave, json!({ "query": query }))
            .await
    }

    /// 队列中的全部变更（FIFO）
    pub async fn pending_changes(&self) -> Result<Vec<PendingChange>> {
        self.queue.drain().await
    }

    /// 立即执行一轮同步；子系统禁用时只返回当前状态
    pub async fn sync_now(&self) -> Result<SyncStatus> {
        if !self.config.enabled {
            debug!("[OfflineClient] 离线子系统已禁用，跳过同步");
            return Ok(self.engine.status().await);
        }
        self.engine.sync_pending().await
    }

    /// 预加载热门活动，随后按配置上限淘汰；子系统禁用时不做任何事
    pub async fn preload(&self) -> Result<PreloadReport> {
        if !self.config.enabled {
            debug!("[OfflineClient] 离线子系统已禁用，跳过预加载");
            return Ok(PreloadReport::default());
        }
        let report = self.engine.preload().await?;
        self.enforce_limit().await?;
        Ok(report)
    }

    pub async fn refresh_stats(&self) -> Result<CacheStats> {
        self.cache.refresh_stats().await
    }

    pub async fn enforce_limit(&self) -> Result<EvictionReport> {
        self.cache.enforce_limit(self.config.max_cache_bytes).await
    }

    /// 清空四个区域（包括未同步的变更）
    pub async fn clear_cache(&self) -> Result<()> {
        self.cache.clear_all().await
    }

    pub async fn sync_status(&self) -> SyncStatus {
        self.engine.status().await
    }

    /// 先查本地缓存，未命中且在线时从远端获取并写入缓存
    pub async fn get_event(&self, event_id: &str) -> Result<Option<CachedEvent>> {
        if let Some(event) = self.cache.get_cached_event(event_id).await? {
            debug!("[OfflineClient] 活动 {} 命中缓存", event_id);
            return Ok(Some(event));
        }
        if !self.connectivity.is_online() {
            debug!("[OfflineClient] 活动 {} 未缓存且当前离线", event_id);
            return Ok(None);
        }
        match self.remote.fetch_event(event_id).await? {
            Some(remote) => Ok(Some(self.cache.cache_event(&remote.id, remote.data).await?)),
            None => Ok(None),
        }
    }

    pub async fn get_image(&self, url: &str) -> Result<Option<CachedImage>> {
        if let Some(image) = self.cache.get_cached_image(url).await? {
            return Ok(Some(image));
        }
        if !self.connectivity.is_online() {
            return Ok(None);
        }
        let bytes = self.remote.fetch_image(url).await?;
        Ok(Some(self.cache.cache_image(url, bytes).await?))
    }
}
