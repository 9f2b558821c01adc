//! 测试替身：可编排的远端服务与测试日志

use crate::offline::api::{RemoteApi, RemoteEvent};
use crate::offline::error::{OfflineError, Result};
use crate::offline::models::PendingChange;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, Once};
use tokio::sync::{Notify, Semaphore};

static INIT_LOGGER: Once = Once::new();

pub fn init_test_logger() {
    INIT_LOGGER.call_once(|| {
        use tracing_subscriber::prelude::*;
        use tracing_subscriber::EnvFilter;

        let filter_layer = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("info,events_offline_sdk=debug"));

        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_file(true)
            .with_line_number(true)
            .with_target(false)
            .with_test_writer();

        let _ = tracing_subscriber::registry()
            .with(filter_layer)
            .with(fmt_layer)
            .try_init();
    });
}

/// 投递闸门：投递进入时通知 `entered`，然后等待 `release` 的许可
pub struct Gate {
    pub entered: Notify,
    pub release: Semaphore,
}

#[derive(Default)]
struct State {
    dispatched: Vec<PendingChange>,
    attempts: usize,
    failing: HashSet<String>,
    popular: Vec<serde_json::Value>,
    popular_fails: bool,
    events: HashMap<String, serde_json::Value>,
    images: HashMap<String, Vec<u8>>,
    image_fetches: HashMap<String, usize>,
}

#[derive(Default)]
pub struct FakeRemote {
    state: Mutex<State>,
    gate: Mutex<Option<Arc<Gate>>>,
}

impl FakeRemote {
    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    fn target_of(change: &PendingChange) -> String {
        change
            .referenced_event_id()
            .map(str::to_string)
            .or_else(|| {
                change
                    .payload
                    .get("query")
                    .and_then(|q| q.as_str())
                    .map(str::to_string)
            })
            .unwrap_or_default()
    }

    /// 指向该活动的投递一律失败（网络不可用）
    pub fn fail_event(&self, event_id: &str) {
        self.state().failing.insert(event_id.to_string());
    }

    pub fn heal_event(&self, event_id: &str) {
        self.state().failing.remove(event_id);
    }

    pub fn dispatched(&self) -> Vec<PendingChange> {
        self.state().dispatched.clone()
    }

    /// 成功投递的目标（活动 ID 或搜索词），按投递顺序
    pub fn dispatched_event_ids(&self) -> Vec<String> {
        self.state().dispatched.iter().map(Self::target_of).collect()
    }

    /// 投递尝试次数（含失败）
    pub fn attempts(&self) -> usize {
        self.state().attempts
    }

    pub fn install_gate(&self) -> Arc<Gate> {
        let gate = Arc::new(Gate {
            entered: Notify::new(),
            release: Semaphore::new(0),
        });
        *self.gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn remove_gate(&self) {
        *self.gate.lock().unwrap() = None;
    }

    pub fn set_popular(&self, events: Vec<serde_json::Value>) {
        self.state().popular = events;
    }

    pub fn fail_popular(&self) {
        self.state().popular_fails = true;
    }

    pub fn set_event(&self, id: &str, data: serde_json::Value) {
        self.state().events.insert(id.to_string(), data);
    }

    pub fn set_image(&self, url: &str, bytes: Vec<u8>) {
        self.state().images.insert(url.to_string(), bytes);
    }

    pub fn image_fetches(&self, url: &str) -> usize {
        self.state().image_fetches.get(url).copied().unwrap_or(0)
    }
}

#[async_trait]
impl RemoteApi for FakeRemote {
    async fn dispatch(&self, change: &PendingChange) -> Result<()> {
        self.state().attempts += 1;

        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.entered.notify_one();
            if let Ok(permit) = gate.release.acquire().await {
                permit.forget();
            }
        }

        let mut state = self.state();
        if state.failing.contains(&Self::target_of(change)) {
            return Err(OfflineError::NetworkUnavailable(format!(
                "模拟网络故障: #{}",
                change.id
            )));
        }
        state.dispatched.push(change.clone());
        Ok(())
    }

    async fn fetch_popular_events(&self, limit: usize) -> Result<Vec<RemoteEvent>> {
        let state = self.state();
        if state.popular_fails {
            return Err(OfflineError::NetworkUnavailable("模拟热门列表不可用".into()));
        }
        Ok(state
            .popular
            .iter()
            .cloned()
            .filter_map(RemoteEvent::from_value)
            .take(limit)
            .collect())
    }

    async fn fetch_event(&self, id: &str) -> Result<Option<RemoteEvent>> {
        Ok(self
            .state()
            .events
            .get(id)
            .cloned()
            .and_then(RemoteEvent::from_value))
    }

    async fn fetch_image(&self, url: &str) -> Result<Vec<u8>> {
        let mut state = self.state();
        *state.image_fetches.entry(url.to_string()).or_default() += 1;
        state
            .images
            .get(url)
            .cloned()
            .ok_or_else(|| OfflineError::RemoteRejected {
                code: 404,
                message: format!("图片不存在: {}", url),
            })
    }
}
