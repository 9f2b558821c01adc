//! 本地存储的内存实现
//!
//! 不落盘，进程退出即丢失。用于测试和不需要持久化的嵌入场景。

use crate::offline::clock::Clock;
use crate::offline::error::{OfflineError, Result};
use crate::offline::models::{ChangeType, PendingChange};
use crate::offline::store::{LocalStore, Record, Region};
use async_trait::async_trait;
use futures_util::stream::{self, BoxStream};
use futures_util::StreamExt;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Default)]
struct Regions {
    events: BTreeMap<String, Record>,
    images: BTreeMap<String, Record>,
    user_data: BTreeMap<String, Record>,
    // 以 ID 为键，BTreeMap 天然按入队顺序遍历
    pending: BTreeMap<i64, Record>,
    next_pending_id: i64,
}

impl Regions {
    fn keyed(&mut self, region: Region) -> Option<&mut BTreeMap<String, Record>> {
        match region {
            Region::Events => Some(&mut self.events),
            Region::Images => Some(&mut self.images),
            Region::UserData => Some(&mut self.user_data),
            Region::PendingChanges => None,
        }
    }
}

/// 内存本地存储
pub struct MemoryStore {
    regions: Mutex<Regions>,
    clock: Arc<dyn Clock>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            regions: Mutex::new(Regions {
                next_pending_id: 1,
                ..Default::default()
            }),
            clock,
            unavailable: AtomicBool::new(false),
        }
    }

    /// 模拟底层存储不可用（配额耗尽、数据库损坏等）
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn lock(&self) -> Result<MutexGuard<'_, Regions>> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(OfflineError::StorageUnavailable(
                "内存存储已被标记为不可用".into(),
            ));
        }
        Ok(self.regions.lock().unwrap_or_else(|e| e.into_inner()))
    }
}

#[async_trait]
impl LocalStore for MemoryStore {
    async fn put(&self, record: Record) -> Result<()> {
        let mut regions = self.lock()?;
        match record {
            Record::PendingChange(ref change) => {
                let id = change.id;
                regions.next_pending_id = regions.next_pending_id.max(id + 1);
                regions.pending.insert(id, record);
            }
            other => {
                let region = other.region();
                let key = other.key();
                if let Some(map) = regions.keyed(region) {
                    map.insert(key, other);
                }
            }
        }
        Ok(())
    }

    async fn get(&self, region: Region, key: &str) -> Result<Option<Record>> {
        let now = self.clock.now_millis();
        let mut regions = self.lock()?;
        if region == Region::PendingChanges {
            let Ok(id) = key.parse::<i64>() else {
                return Ok(None);
            };
            return Ok(regions.pending.get(&id).cloned());
        }
        let Some(record) = regions.keyed(region).and_then(|m| m.get_mut(key)) else {
            return Ok(None);
        };
        match record {
            Record::Event(e) => e.last_accessed = now,
            Record::Image(i) => i.last_accessed = now,
            _ => {}
        }
        Ok(Some(record.clone()))
    }

    async fn delete(&self, region: Region, key: &str) -> Result<()> {
        let mut regions = self.lock()?;
        if region == Region::PendingChanges {
            if let Ok(id) = key.parse::<i64>() {
                regions.pending.remove(&id);
            }
        } else if let Some(map) = regions.keyed(region) {
            map.remove(key);
        }
        Ok(())
    }

    async fn count(&self, region: Region) -> Result<u64> {
        let mut regions = self.lock()?;
        let count = match region {
            Region::PendingChanges => regions.pending.len(),
            other => regions.keyed(other).map(|m| m.len()).unwrap_or(0),
        };
        Ok(count as u64)
    }

    fn iterate(&self, region: Region) -> BoxStream<'_, Result<Record>> {
        let snapshot: Result<Vec<Record>> = self.lock().map(|mut regions| match region {
            Region::PendingChanges => regions.pending.values().cloned().collect(),
            other => regions
                .keyed(other)
                .map(|m| m.values().cloned().collect())
                .unwrap_or_default(),
        });
        match snapshot {
            Ok(records) => stream::iter(records.into_iter().map(Ok)).boxed(),
            Err(e) => stream::once(async move { Err(e) }).boxed(),
        }
    }

    async fn append_pending(
        &self,
        change_type: &ChangeType,
        payload: &serde_json::Value,
        timestamp: i64,
    ) -> Result<PendingChange> {
        let mut regions = self.lock()?;
        let id = regions.next_pending_id;
        regions.next_pending_id += 1;
        let change = PendingChange {
            id,
            change_type: change_type.clone(),
            payload: payload.clone(),
            timestamp,
        };
        regions
            .pending
            .insert(id, Record::PendingChange(change.clone()));
        Ok(change)
    }

    async fn clear(&self, region: Region) -> Result<()> {
        let mut regions = self.lock()?;
        match region {
            Region::PendingChanges => regions.pending.clear(),
            other => {
                if let Some(map) = regions.keyed(other) {
                    map.clear();
                }
            }
        }
        Ok(())
    }
}
