//! 离线数据层配置
//!
//! 对嵌入方暴露的配置项与宿主 UI 层保持一致（camelCase 键名），
//! 其余行为（端点、预加载数量、重连延迟）为固定常量。

use crate::offline::error::{OfflineError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// 预加载热门活动的数量上限
pub const PRELOAD_PAGE_SIZE: usize = 20;

/// 网络恢复后触发同步前的等待时间（毫秒）
pub const RECONNECT_SYNC_DELAY_MS: u64 = 1_000;

/// 默认缓存上限：50 MiB
pub const DEFAULT_MAX_CACHE_BYTES: u64 = 50 * 1024 * 1024;

/// 离线数据层配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OfflineConfig {
    /// 是否启用离线子系统
    ///
    /// 禁用时不启动后台调度，`sync_now` 与 `preload` 为空操作；
    /// 用户变更仍会写入队列，重新启用后照常同步。
    pub enabled: bool,
    /// 缓存淘汰阈值（字节）
    pub max_cache_bytes: u64,
    /// 缓存统计刷新间隔（毫秒）
    pub stats_refresh_interval_ms: u64,
    /// 机会同步间隔（毫秒）
    pub sync_interval_ms: u64,
    /// HTTP API 基础地址
    pub api_base_url: String,
    /// 认证 token，作为 `token` 请求头发送，可为空
    pub token: String,
    /// 本地 SQLite 数据库 URL，例如 `sqlite://offline_cache.db?mode=rwc`
    pub db_url: String,
}

impl Default for OfflineConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_cache_bytes: DEFAULT_MAX_CACHE_BYTES,
            stats_refresh_interval_ms: 30_000,
            sync_interval_ms: 60_000,
            api_base_url: "http://localhost:10002".to_string(),
            token: String::new(),
            db_url: "sqlite://offline_cache.db?mode=rwc".to_string(),
        }
    }
}

impl OfflineConfig {
    /// 从 TOML 文本解析配置，缺失字段使用默认值
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: OfflineConfig =
            toml::from_str(text).map_err(|e| OfflineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// 从 TOML 文件加载配置
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| OfflineError::Config(format!("读取 {} 失败: {}", path.display(), e)))?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_cache_bytes == 0 {
            return Err(OfflineError::Config("maxCacheBytes 必须大于 0".into()));
        }
        if self.stats_refresh_interval_ms == 0 {
            return Err(OfflineError::Config(
                "statsRefreshIntervalMs 必须大于 0".into(),
            ));
        }
        if self.sync_interval_ms == 0 {
            return Err(OfflineError::Config("syncIntervalMs 必须大于 0".into()));
        }
        if self.db_url.is_empty() {
            return Err(OfflineError::Config("dbUrl 不能为空".into()));
        }
        Ok(())
    }

    pub fn stats_refresh_interval(&self) -> Duration {
        Duration::from_millis(self.stats_refresh_interval_ms)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_millis(self.sync_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = OfflineConfig::from_toml_str(
            r#"
            maxCacheBytes = 1024
            syncIntervalMs = 5000
            "#,
        )
        .unwrap();
        assert!(config.enabled);
        assert_eq!(config.max_cache_bytes, 1024);
        assert_eq!(config.sync_interval(), Duration::from_secs(5));
        assert_eq!(config.stats_refresh_interval_ms, 30_000);
    }

    #[test]
    fn test_zero_interval_rejected() {
        let err = OfflineConfig::from_toml_str("statsRefreshIntervalMs = 0").unwrap_err();
        assert!(matches!(err, OfflineError::Config(_)));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("offline.toml");
        std::fs::write(&path, "enabled = false\napiBaseUrl = \"http://api.test\"\n").unwrap();

        let config = OfflineConfig::load(&path).unwrap();
        assert!(!config.enabled);
        assert_eq!(config.api_base_url, "http://api.test");
    }
}
