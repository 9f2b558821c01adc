//! 同步状态的共享句柄
//!
//! 队列、缓存管理器与同步引擎共享同一份 [`SyncStatus`]，
//! 其中 `pending_changes` 只通过 [`SharedSyncStatus::set_pending`] 以存储中的实际条目数写入。

use crate::offline::models::SyncStatus;
use std::sync::Arc;
use tokio::sync::{RwLock, RwLockWriteGuard};

#[derive(Clone, Default)]
pub struct SharedSyncStatus {
    inner: Arc<RwLock<SyncStatus>>,
}

impl SharedSyncStatus {
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前状态的拷贝
    pub async fn snapshot(&self) -> SyncStatus {
        self.inner.read().await.clone()
    }

    pub async fn set_pending(&self, count: u64) {
        self.inner.write().await.pending_changes = count;
    }

    pub async fn set_online(&self, online: bool) {
        self.inner.write().await.is_online = online;
    }

    /// 在同步上下文（连通性回调）中更新在线标志；锁被占用时交给运行时稍后写入
    pub fn publish_online(&self, online: bool) {
        if let Ok(mut status) = self.inner.try_write() {
            status.is_online = online;
            return;
        }
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let status = self.clone();
            handle.spawn(async move { status.set_online(online).await });
        }
    }

    /// 持有写锁，用于需要"检查并设置"的场景（如同步互斥）
    pub(crate) async fn write(&self) -> RwLockWriteGuard<'_, SyncStatus> {
        self.inner.write().await
    }
}
