//! 离线数据层本地模型定义

use serde::{Deserialize, Serialize};
use std::fmt;

/// 缓存的活动快照
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedEvent {
    /// 活动 ID（唯一）
    pub id: String,
    /// 活动字段（标题、分类、开始时间等），结构由服务端决定
    pub data: serde_json::Value,
    /// 写入缓存的时间（毫秒）
    pub cached_at: i64,
    /// 最近一次读取时间（毫秒），每次读取都会更新
    pub last_accessed: i64,
}

impl CachedEvent {
    /// 按序列化后的长度估算占用字节数
    pub fn estimated_size(&self) -> u64 {
        serde_json::to_vec(self).map(|v| v.len() as u64).unwrap_or(0)
    }
}

/// 缓存的图片，以来源 URL 为键
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedImage {
    pub url: String,
    #[serde(skip)]
    pub data: Vec<u8>,
    /// 原始字节长度
    pub size: u64,
    /// 抓取时间（毫秒）
    pub timestamp: i64,
    pub last_accessed: i64,
}

/// 少量需要离线保留的用户状态，无二级索引
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedUserDatum {
    pub key: String,
    pub value: serde_json::Value,
    pub updated_at: i64,
}

/// 待同步变更的目标端点
///
/// 从存储中读出的未知标签保留为 [`ChangeType::Unknown`]，同步时跳过但不删除。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ChangeType {
    EventLike,
    EventSave,
    SearchSave,
    Unknown(String),
}

impl ChangeType {
    pub fn as_str(&self) -> &str {
        match self {
            ChangeType::EventLike => "event_like",
            ChangeType::EventSave => "event_save",
            ChangeType::SearchSave => "search_save",
            ChangeType::Unknown(tag) => tag,
        }
    }
}

impl From<&str> for ChangeType {
    fn from(tag: &str) -> Self {
        match tag {
            "event_like" => ChangeType::EventLike,
            "event_save" => ChangeType::EventSave,
            "search_save" => ChangeType::SearchSave,
            other => ChangeType::Unknown(other.to_string()),
        }
    }
}

impl From<String> for ChangeType {
    fn from(tag: String) -> Self {
        ChangeType::from(tag.as_str())
    }
}

impl From<ChangeType> for String {
    fn from(change_type: ChangeType) -> Self {
        change_type.as_str().to_string()
    }
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 尚未被远端确认的用户变更
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingChange {
    /// 存储分配的自增 ID，决定 FIFO 顺序
    pub id: i64,
    #[serde(rename = "type")]
    pub change_type: ChangeType,
    pub payload: serde_json::Value,
    /// 创建时间（毫秒）
    pub timestamp: i64,
}

impl PendingChange {
    /// 变更所引用的活动 ID（若有）
    pub fn referenced_event_id(&self) -> Option<&str> {
        self.payload.get("eventId").and_then(|v| v.as_str())
    }
}

/// 缓存统计快照（每次全量扫描得出，不做增量更新）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub events: u64,
    pub images: u64,
    pub user_data: u64,
    pub pending_changes: u64,
    /// 活动序列化长度 + 图片字节数
    pub total_size: u64,
    /// 本次统计完成的时间（毫秒）
    pub last_sync: i64,
}

/// 单条变更同步失败的记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncFailure {
    pub change_id: i64,
    #[serde(rename = "type")]
    pub change_type: ChangeType,
    pub message: String,
}

/// 同步状态（仅内存中维护）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub is_online: bool,
    /// 互斥标志：同一时刻只运行一轮同步
    pub is_syncing: bool,
    pub last_sync_attempt: Option<i64>,
    /// 最近一次零失败同步的完成时间
    pub last_successful_sync: Option<i64>,
    /// 最近一轮同步中累积的失败
    pub sync_errors: Vec<SyncFailure>,
    /// 与 pendingChanges 区域的实际条目数保持一致
    pub pending_changes: u64,
}
