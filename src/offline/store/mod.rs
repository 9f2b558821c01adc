//! 本地存储
//!
//! 持久化、事务性的键空间，划分为四个互不影响的区域：
//! `events`、`images`、`userData`、`pendingChanges`。
//! 每个区域都支持 put / get / delete / count / iterate；淘汰策略不在这一层，
//! 由缓存管理器负责。任何存储失败都以 [`OfflineError::StorageUnavailable`]
//! 返回，本层不做重试。
//!
//! [`OfflineError::StorageUnavailable`]: crate::offline::error::OfflineError::StorageUnavailable

pub mod memory;
pub mod sqlite;

use crate::offline::error::Result;
use crate::offline::models::{CachedEvent, CachedImage, CachedUserDatum, ChangeType, PendingChange};
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use std::fmt;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// 存储区域
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Region {
    Events,
    Images,
    UserData,
    PendingChanges,
}

impl Region {
    pub const ALL: [Region; 4] = [
        Region::Events,
        Region::Images,
        Region::UserData,
        Region::PendingChanges,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Region::Events => "events",
            Region::Images => "images",
            Region::UserData => "userData",
            Region::PendingChanges => "pendingChanges",
        }
    }

    /// 读取时是否刷新 last_accessed
    pub fn tracks_access(&self) -> bool {
        matches!(self, Region::Events | Region::Images)
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// 存储中的一条记录，所属区域由变体决定
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Event(CachedEvent),
    Image(CachedImage),
    UserDatum(CachedUserDatum),
    PendingChange(PendingChange),
}

impl Record {
    pub fn region(&self) -> Region {
        match self {
            Record::Event(_) => Region::Events,
            Record::Image(_) => Region::Images,
            Record::UserDatum(_) => Region::UserData,
            Record::PendingChange(_) => Region::PendingChanges,
        }
    }

    /// 记录在所属区域中的键
    pub fn key(&self) -> String {
        match self {
            Record::Event(e) => e.id.clone(),
            Record::Image(i) => i.url.clone(),
            Record::UserDatum(d) => d.key.clone(),
            Record::PendingChange(c) => c.id.to_string(),
        }
    }

    /// 计入缓存总大小的字节数；用户数据只计条目数
    pub fn byte_size(&self) -> u64 {
        match self {
            Record::Event(e) => e.estimated_size(),
            Record::Image(i) => i.size,
            Record::UserDatum(_) | Record::PendingChange(_) => 0,
        }
    }

    pub fn last_accessed(&self) -> Option<i64> {
        match self {
            Record::Event(e) => Some(e.last_accessed),
            Record::Image(i) => Some(i.last_accessed),
            _ => None,
        }
    }

    pub fn into_event(self) -> Option<CachedEvent> {
        match self {
            Record::Event(e) => Some(e),
            _ => None,
        }
    }

    pub fn into_image(self) -> Option<CachedImage> {
        match self {
            Record::Image(i) => Some(i),
            _ => None,
        }
    }

    pub fn into_user_datum(self) -> Option<CachedUserDatum> {
        match self {
            Record::UserDatum(d) => Some(d),
            _ => None,
        }
    }

    pub fn into_pending_change(self) -> Option<PendingChange> {
        match self {
            Record::PendingChange(c) => Some(c),
            _ => None,
        }
    }
}

/// 按区域寻址的本地存储契约
///
/// 所有组件（缓存管理器、同步引擎、读路径）都只通过这里访问存储。
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// 覆盖写入；区域与键由记录本身决定
    async fn put(&self, record: Record) -> Result<()>;

    /// 读取；events/images 区域命中时同时刷新 last_accessed
    async fn get(&self, region: Region, key: &str) -> Result<Option<Record>>;

    /// 删除；键不存在时为空操作
    async fn delete(&self, region: Region, key: &str) -> Result<()>;

    async fn count(&self, region: Region) -> Result<u64>;

    /// 惰性遍历区域内全部记录；每次调用都从头开始
    ///
    /// pendingChanges 区域按 ID 升序（即入队顺序）产出。
    /// 调用方应先把流消费完，再对同一存储做写操作。
    fn iterate(&self, region: Region) -> BoxStream<'_, Result<Record>>;

    /// 追加一条待同步变更，由存储分配单调递增的 ID
    async fn append_pending(
        &self,
        change_type: &ChangeType,
        payload: &serde_json::Value,
        timestamp: i64,
    ) -> Result<PendingChange>;

    /// 清空某个区域
    async fn clear(&self, region: Region) -> Result<()>;
}
