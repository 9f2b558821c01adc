//! 网络连通性监视器
//!
//! 由宿主平台在网络状态变化时调用 [`ConnectivityMonitor::set_online`]，
//! 不做轮询。只有真正发生切换时才会通知订阅者与已注册的回调。

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tracing::info;

type Callback = Arc<dyn Fn(bool) + Send + Sync>;

/// 回调注册句柄，用于注销
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct CallbackId(u64);

struct Inner {
    state: watch::Sender<bool>,
    callbacks: Mutex<BTreeMap<CallbackId, Callback>>,
    next_id: AtomicU64,
}

#[derive(Clone)]
pub struct ConnectivityMonitor {
    inner: Arc<Inner>,
}

impl ConnectivityMonitor {
    pub fn new(initially_online: bool) -> Self {
        let (state, _) = watch::channel(initially_online);
        Self {
            inner: Arc::new(Inner {
                state,
                callbacks: Mutex::new(BTreeMap::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn is_online(&self) -> bool {
        *self.inner.state.borrow()
    }

    /// 平台网络信号入口；返回是否发生了切换
    pub fn set_online(&self, online: bool) -> bool {
        let changed = self.inner.state.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
        if !changed {
            return false;
        }

        info!(
            "[Connectivity] 网络状态切换: {}",
            if online { "在线" } else { "离线" }
        );
        // 先拷贝回调列表，避免回调中再注册/注销时死锁
        let callbacks: Vec<Callback> = self
            .inner
            .callbacks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();
        for callback in callbacks {
            callback(online);
        }
        true
    }

    /// 订阅状态变化（供调度器等异步任务使用）
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.inner.state.subscribe()
    }

    /// 注册切换回调
    pub fn register<F>(&self, callback: F) -> CallbackId
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        let id = CallbackId(self.inner.next_id.fetch_add(1, Ordering::SeqCst));
        self.inner
            .callbacks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, Arc::new(callback));
        id
    }

    pub fn unregister(&self, id: CallbackId) -> bool {
        self.inner
            .callbacks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id)
            .is_some()
    }
}
