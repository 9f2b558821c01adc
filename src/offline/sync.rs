//! 同步引擎
//!
//! 每一轮同步（drain pass）的状态机：
//!
//! 1. 守卫：已有一轮在运行或当前离线时直接返回当前状态，不报错；
//! 2. 在开始时读取一次队列快照，之后入队的变更留给下一轮；
//! 3. 按 FIFO 逐条投递：成功则从队列删除，失败则保留并记入 `sync_errors`，
//!    继续处理下一条；本地存储失败则中止整轮；
//! 4. 无论失败多少条，结束时清除 `is_syncing`、更新 `last_sync_attempt`，
//!    并把最终状态通知监听器。
//!
//! 冲突处理为"后写者胜"：队列按原样重放，不检测远端状态是否已变化。

use crate::offline::api::RemoteApi;
use crate::offline::cache::CacheManager;
use crate::offline::clock::Clock;
use crate::offline::config::PRELOAD_PAGE_SIZE;
use crate::offline::connectivity::ConnectivityMonitor;
use crate::offline::error::{OfflineError, Result};
use crate::offline::listener::ListenerSlot;
use crate::offline::models::{ChangeType, SyncFailure, SyncStatus};
use crate::offline::queue::PendingChangeQueue;
use crate::offline::status::SharedSyncStatus;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// 预加载结果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PreloadReport {
    pub events_cached: u64,
    pub images_cached: u64,
    /// 失败描述，仅用于日志与诊断
    pub failures: Vec<String>,
}

/// 离开作用域时释放互斥标志
struct PassGuard<'a>(&'a AtomicBool);

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct SyncEngine {
    queue: Arc<PendingChangeQueue>,
    cache: Arc<CacheManager>,
    remote: Arc<dyn RemoteApi>,
    connectivity: ConnectivityMonitor,
    status: SharedSyncStatus,
    listener: ListenerSlot,
    clock: Arc<dyn Clock>,
    in_flight: AtomicBool,
}

impl SyncEngine {
    pub fn new(
        queue: Arc<PendingChangeQueue>,
        cache: Arc<CacheManager>,
        remote: Arc<dyn RemoteApi>,
        connectivity: ConnectivityMonitor,
        status: SharedSyncStatus,
        listener: ListenerSlot,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            queue,
            cache,
            remote,
            connectivity,
            status,
            listener,
            clock,
            in_flight: AtomicBool::new(false),
        }
    }

    /// 当前状态；待同步计数按存储中的实际条目重新统计
    pub async fn status(&self) -> SyncStatus {
        self.recount_pending().await;
        let mut status = self.status.snapshot().await;
        status.is_online = self.connectivity.is_online();
        status
    }

    async fn recount_pending(&self) {
        if let Err(e) = self.queue.refresh_count().await {
            warn!("[SyncEngine] 无法统计待同步变更: {}", e);
        }
    }

    /// 执行一轮同步，返回结束后的状态
    ///
    /// 被守卫挡下时返回当前（未改变的）状态。
    /// 仅当本地存储不可用时返回错误。
    pub async fn sync_pending(&self) -> Result<SyncStatus> {
        let online = self.connectivity.is_online();
        if !online {
            debug!("[SyncEngine] 当前离线，跳过本轮同步");
            self.status.set_online(false).await;
            self.recount_pending().await;
            return Ok(self.status.snapshot().await);
        }
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("[SyncEngine] 已有同步在进行中，跳过");
            return Ok(self.status.snapshot().await);
        }
        let _guard = PassGuard(&self.in_flight);

        {
            let mut status = self.status.write().await;
            status.is_online = true;
            status.is_syncing = true;
        }

        let mut failures = Vec::new();
        let outcome = self.drain_queue(&mut failures).await;

        // 完成阶段：无论成功与否都要复位状态
        let now = self.clock.now_millis();
        let pending = self.queue.len().await;
        let snapshot = {
            let mut status = self.status.write().await;
            status.is_syncing = false;
            status.is_online = self.connectivity.is_online();
            status.last_sync_attempt = Some(now);
            if outcome.is_ok() && failures.is_empty() {
                status.last_successful_sync = Some(now);
            }
            status.sync_errors = failures;
            if let Ok(count) = pending {
                status.pending_changes = count;
            }
            status.clone()
        };

        self.listener
            .get()
            .on_sync_status_changed(snapshot.clone())
            .await;

        match outcome {
            Ok(synced) => {
                info!(
                    "[SyncEngine] ✅ 同步结束 - 成功: {}, 失败: {}, 剩余: {}",
                    synced,
                    snapshot.sync_errors.len(),
                    snapshot.pending_changes
                );
                Ok(snapshot)
            }
            Err(e) => {
                error!("[SyncEngine] ❌ 本地存储不可用，中止本轮同步: {}", e);
                Err(e)
            }
        }
    }

    /// 按快照顺序投递，返回成功条数
    async fn drain_queue(&self, failures: &mut Vec<SyncFailure>) -> Result<usize> {
        let changes = self.queue.drain().await?;
        if changes.is_empty() {
            debug!("[SyncEngine] 队列为空");
            return Ok(0);
        }
        info!("[SyncEngine] 🔄 开始同步，待处理: {}", changes.len());

        let mut synced = 0;
        for change in changes {
            if let ChangeType::Unknown(tag) = &change.change_type {
                warn!(
                    "[SyncEngine] 未知的变更类型 {}（#{}），保留在队列中",
                    tag, change.id
                );
                continue;
            }

            match self.remote.dispatch(&change).await {
                Ok(()) => {
                    self.queue.remove(change.id).await?;
                    synced += 1;
                    debug!(
                        "[SyncEngine]   #{} ({}) 已确认",
                        change.id, change.change_type
                    );
                }
                Err(e @ OfflineError::StorageUnavailable(_)) => return Err(e),
                Err(e) => {
                    warn!(
                        "[SyncEngine]   #{} ({}) 投递失败，保留待重试: {}",
                        change.id, change.change_type, e
                    );
                    failures.push(SyncFailure {
                        change_id: change.id,
                        change_type: change.change_type.clone(),
                        message: e.to_string(),
                    });
                }
            }
        }
        Ok(synced)
    }

    /// 预加载热门活动及其图片（尽力而为）
    ///
    /// 远端失败只记录日志与报告，不影响待同步变更；本地存储失败照常返回错误。
    pub async fn preload(&self) -> Result<PreloadReport> {
        let mut report = PreloadReport::default();
        if !self.connectivity.is_online() {
            debug!("[SyncEngine] 当前离线，跳过预加载");
            return Ok(report);
        }

        let events = match self.remote.fetch_popular_events(PRELOAD_PAGE_SIZE).await {
            Ok(events) => events,
            Err(e) => {
                let failure = OfflineError::PreloadFailure(e.to_string());
                warn!("[SyncEngine] {}", failure);
                report.failures.push(failure.to_string());
                return Ok(report);
            }
        };

        for event in events.into_iter().take(PRELOAD_PAGE_SIZE) {
            self.cache.cache_event(&event.id, event.data).await?;
            report.events_cached += 1;

            let Some(url) = event.image_url else {
                continue;
            };
            if self.cache.get_cached_image(&url).await?.is_some() {
                debug!("[SyncEngine]   图片已缓存，跳过: {}", url);
                continue;
            }
            match self.remote.fetch_image(&url).await {
                Ok(bytes) => {
                    self.cache.cache_image(&url, bytes).await?;
                    report.images_cached += 1;
                }
                Err(e) => {
                    let failure =
                        OfflineError::PreloadFailure(format!("图片 {}: {}", url, e));
                    warn!("[SyncEngine] {}", failure);
                    report.failures.push(failure.to_string());
                }
            }
        }

        info!(
            "[SyncEngine] 预加载完成 - 活动: {}, 图片: {}, 失败: {}",
            report.events_cached,
            report.images_cached,
            report.failures.len()
        );
        Ok(report)
    }
}
