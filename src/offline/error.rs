//! 离线数据层错误类型
//!
//! 区分三类失败：本地存储不可用（致命，向调用方传播）、远端同步失败（可重试，
//! 条目留在队列中）、预加载失败（尽力而为，仅记录日志）。

use thiserror::Error;

/// 离线数据层统一结果类型
pub type Result<T> = std::result::Result<T, OfflineError>;

#[derive(Debug, Error)]
pub enum OfflineError {
    /// 本地存储无法打开、事务无法提交、数据损坏或超出配额
    #[error("本地存储不可用: {0}")]
    StorageUnavailable(String),

    /// 远端不可达（连接失败、超时）
    #[error("网络不可用: {0}")]
    NetworkUnavailable(String),

    /// 远端已响应但拒绝了该变更
    #[error("远端拒绝 (errCode={code}): {message}")]
    RemoteRejected { code: i32, message: String },

    /// 预加载失败，不影响待同步变更
    #[error("预加载失败: {0}")]
    PreloadFailure(String),

    /// 队列中出现无法识别的变更类型
    #[error("未知的变更类型: {0}")]
    UnknownChangeType(String),

    /// 配置非法或无法读取
    #[error("配置错误: {0}")]
    Config(String),
}

impl OfflineError {
    /// 是否属于可重试的同步失败
    ///
    /// 远端拒绝与网络不可用一视同仁：两者都让条目留在队列里等下一轮。
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            OfflineError::NetworkUnavailable(_) | OfflineError::RemoteRejected { .. }
        )
    }

    pub fn is_storage(&self) -> bool {
        matches!(self, OfflineError::StorageUnavailable(_))
    }
}

impl From<sqlx::Error> for OfflineError {
    fn from(err: sqlx::Error) -> Self {
        OfflineError::StorageUnavailable(err.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for OfflineError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        OfflineError::StorageUnavailable(format!("迁移失败: {}", err))
    }
}

impl From<reqwest::Error> for OfflineError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() || err.is_request() {
            OfflineError::NetworkUnavailable(err.to_string())
        } else {
            OfflineError::RemoteRejected {
                code: err.status().map(|s| s.as_u16() as i32).unwrap_or(-1),
                message: err.to_string(),
            }
        }
    }
}
