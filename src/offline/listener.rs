//! 离线数据层监听器回调接口
//!
//! 嵌入方通过回调接收缓存统计与同步状态的更新，而不是轮询。

use crate::offline::models::{CacheStats, SyncStatus};
use async_trait::async_trait;
use std::sync::{Arc, RwLock};

#[async_trait]
pub trait OfflineListener: Send + Sync {
    /// 一次缓存统计刷新完成
    async fn on_cache_stats_updated(&self, stats: CacheStats);

    /// 一轮同步结束（或同步状态发生变化，例如清空缓存后）
    async fn on_sync_status_changed(&self, status: SyncStatus);
}

/// 默认空实现（无操作）
pub struct EmptyOfflineListener;

#[async_trait]
impl OfflineListener for EmptyOfflineListener {
    async fn on_cache_stats_updated(&self, _stats: CacheStats) {}

    async fn on_sync_status_changed(&self, _status: SyncStatus) {}
}

/// 可在运行期替换的监听器槽位，各组件共享同一个槽位
#[derive(Clone)]
pub struct ListenerSlot {
    inner: Arc<RwLock<Arc<dyn OfflineListener>>>,
}

impl ListenerSlot {
    pub fn new(listener: Arc<dyn OfflineListener>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(listener)),
        }
    }

    pub fn set(&self, listener: Arc<dyn OfflineListener>) {
        *self.inner.write().unwrap_or_else(|e| e.into_inner()) = listener;
    }

    pub fn get(&self) -> Arc<dyn OfflineListener> {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl Default for ListenerSlot {
    fn default() -> Self {
        Self::new(Arc::new(EmptyOfflineListener))
    }
}
