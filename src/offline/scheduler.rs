//! 后台调度器
//!
//! 两个可取消的周期任务（缓存统计刷新、机会同步）加一个连通性监听任务：
//! 网络恢复后等待 [`RECONNECT_SYNC_DELAY_MS`] 再触发一次同步。
//! 调度只影响收敛延迟，不影响正确性；同步随时也可以手动触发。

use crate::offline::cache::CacheManager;
use crate::offline::config::{OfflineConfig, RECONNECT_SYNC_DELAY_MS};
use crate::offline::connectivity::ConnectivityMonitor;
use crate::offline::sync::SyncEngine;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

#[derive(Default)]
pub struct Scheduler {
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    fn tasks(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_running(&self) -> bool {
        self.tasks().iter().any(|task| !task.is_finished())
    }

    /// 启动全部后台任务；已在运行时忽略
    pub fn start(
        &self,
        cache: Arc<CacheManager>,
        engine: Arc<SyncEngine>,
        connectivity: ConnectivityMonitor,
        config: &OfflineConfig,
    ) {
        let mut tasks = self.tasks();
        if tasks.iter().any(|task| !task.is_finished()) {
            warn!("[Scheduler] 已在运行，忽略重复启动");
            return;
        }
        tasks.clear();

        let stats_period = config.stats_refresh_interval();
        let sync_period = config.sync_interval();
        let max_cache_bytes = config.max_cache_bytes;

        tasks.push(tokio::spawn(stats_loop(cache, stats_period, max_cache_bytes)));
        tasks.push(tokio::spawn(sync_loop(
            engine.clone(),
            connectivity.clone(),
            sync_period,
        )));
        let reconnects = connectivity.subscribe();
        tasks.push(tokio::spawn(reconnect_loop(engine, connectivity, reconnects)));

        info!(
            "[Scheduler] ✅ 已启动 - 统计间隔: {:?}, 同步间隔: {:?}",
            stats_period, sync_period
        );
    }

    /// 取消全部后台任务
    pub fn shutdown(&self) {
        let tasks: Vec<_> = self.tasks().drain(..).collect();
        if tasks.is_empty() {
            return;
        }
        for task in tasks {
            task.abort();
        }
        info!("[Scheduler] 已停止");
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        for task in self.tasks().drain(..) {
            task.abort();
        }
    }
}

/// 首次立即刷新，之后按固定间隔；超出上限时顺带淘汰
async fn stats_loop(cache: Arc<CacheManager>, period: Duration, max_cache_bytes: u64) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        let stats = match cache.refresh_stats().await {
            Ok(stats) => stats,
            Err(e) => {
                error!("[Scheduler] 刷新缓存统计失败: {}", e);
                continue;
            }
        };
        if stats.total_size > max_cache_bytes {
            match cache.enforce_limit(max_cache_bytes).await {
                Ok(report) => debug!("[Scheduler] 定时淘汰 {} 条", report.evicted()),
                Err(e) => error!("[Scheduler] 缓存淘汰失败: {}", e),
            }
        }
    }
}

async fn sync_loop(engine: Arc<SyncEngine>, connectivity: ConnectivityMonitor, period: Duration) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        if !connectivity.is_online() {
            continue;
        }
        debug!("[Scheduler] 定时同步");
        if let Err(e) = engine.sync_pending().await {
            error!("[Scheduler] 定时同步失败: {}", e);
        }
    }
}

async fn reconnect_loop(
    engine: Arc<SyncEngine>,
    connectivity: ConnectivityMonitor,
    mut rx: watch::Receiver<bool>,
) {
    while rx.changed().await.is_ok() {
        let online = *rx.borrow_and_update();
        if !online {
            continue;
        }
        tokio::time::sleep(Duration::from_millis(RECONNECT_SYNC_DELAY_MS)).await;
        if !connectivity.is_online() {
            debug!("[Scheduler] 等待期间再次离线，放弃本次同步");
            continue;
        }
        info!("[Scheduler] 🔄 网络已恢复，触发同步");
        if let Err(e) = engine.sync_pending().await {
            error!("[Scheduler] 重连同步失败: {}", e);
        }
    }
}
