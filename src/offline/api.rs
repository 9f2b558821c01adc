//! 远端 HTTP API 客户端
//!
//! 同步引擎通过 [`RemoteApi`] 把待同步变更投递到对应端点，
//! 并从"热门活动"列表预加载数据。默认实现 [`HttpRemoteApi`] 基于 reqwest。

use crate::offline::config::OfflineConfig;
use crate::offline::error::{OfflineError, Result};
use crate::offline::models::{ChangeType, PendingChange};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, error, info};
use uuid::Uuid;

/// 统一的 API 响应包装结构体（包含 errCode、errMsg、data）
/// data 字段可能为 null 或缺失，因此使用 Option<T>
#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    #[serde(rename = "errCode")]
    pub err_code: i32,
    #[serde(rename = "errMsg", default)]
    pub err_msg: String,
    pub data: Option<T>,
}

/// 远端返回的活动记录
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteEvent {
    pub id: String,
    /// 关联图片，需要单独抓取
    pub image_url: Option<String>,
    /// 完整记录，原样写入缓存
    pub data: serde_json::Value,
}

impl RemoteEvent {
    /// 从服务端 JSON 中提取；缺少 `id` 的记录返回 None
    pub fn from_value(data: serde_json::Value) -> Option<Self> {
        let id = match data.get("id")? {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Number(n) => n.to_string(),
            _ => return None,
        };
        let image_url = data
            .get("imageUrl")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        Some(Self {
            id,
            image_url,
            data,
        })
    }
}

#[derive(Debug, Deserialize)]
struct PopularEventsResp {
    #[serde(default)]
    events: Vec<serde_json::Value>,
}

/// 远端服务契约
#[async_trait]
pub trait RemoteApi: Send + Sync {
    /// 投递一条待同步变更；成功表示远端已确认
    async fn dispatch(&self, change: &PendingChange) -> Result<()>;

    /// 热门活动列表（有界、有序）
    async fn fetch_popular_events(&self, limit: usize) -> Result<Vec<RemoteEvent>>;

    /// 单个活动；不存在时返回 None
    async fn fetch_event(&self, id: &str) -> Result<Option<RemoteEvent>>;

    /// 抓取图片原始字节
    async fn fetch_image(&self, url: &str) -> Result<Vec<u8>>;
}

/// 变更类型对应的端点路径
pub fn endpoint_path(change_type: &ChangeType) -> Option<&'static str> {
    match change_type {
        ChangeType::EventLike => Some("/event/like"),
        ChangeType::EventSave => Some("/event/save"),
        ChangeType::SearchSave => Some("/search/save"),
        ChangeType::Unknown(_) => None,
    }
}

/// 基于 reqwest 的远端 API 客户端
pub struct HttpRemoteApi {
    client: reqwest::Client,
    api_base_url: String,
}

impl HttpRemoteApi {
    /// `client` 应该已经在外部配置好认证请求头
    pub fn new(client: reqwest::Client, api_base_url: impl Into<String>) -> Self {
        Self {
            client,
            api_base_url: api_base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// 按配置创建（token 通过 default_headers 自动添加）
    pub fn from_config(config: &OfflineConfig) -> Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        if !config.token.is_empty() {
            headers.insert(
                reqwest::header::HeaderName::from_static("token"),
                reqwest::header::HeaderValue::from_str(&config.token)
                    .map_err(|e| OfflineError::Config(format!("无效的 token: {}", e)))?,
            );
        }
        let client = reqwest::ClientBuilder::new()
            .default_headers(headers)
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| OfflineError::Config(format!("创建 HTTP 客户端失败: {}", e)))?;
        Ok(Self::new(client, config.api_base_url.clone()))
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_base_url, path)
    }

    /// `{base}/event/{id}`，id 作为单个路径段转义
    fn event_url(&self, id: &str) -> Result<reqwest::Url> {
        let mut url = reqwest::Url::parse(&self.api_base_url)
            .map_err(|e| OfflineError::Config(format!("无效的 API 地址: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| {
                OfflineError::Config(format!("API 地址不能作为基础路径: {}", self.api_base_url))
            })?
            .pop_if_empty()
            .extend(["event", id]);
        Ok(url)
    }

    /// 读取并解析 `{errCode, errMsg, data}` 包装的响应
    async fn read_envelope<T: DeserializeOwned>(
        response: reqwest::Response,
        what: &str,
    ) -> Result<Option<T>> {
        let status = response.status();
        let body_bytes = response.bytes().await?;
        let body_str = String::from_utf8_lossy(&body_bytes);
        debug!("[RemoteApi] {} 响应 Body: {}", what, body_str);

        if !status.is_success() {
            error!(
                "[RemoteApi] {} 请求失败，HTTP状态: {}, 响应: {}",
                what, status, body_str
            );
            return Err(OfflineError::RemoteRejected {
                code: status.as_u16() as i32,
                message: body_str.to_string(),
            });
        }

        let api_resp: ApiResponse<T> = serde_json::from_slice(&body_bytes).map_err(|e| {
            error!(
                "[RemoteApi] {} 反序列化失败: {:?}\n原始响应: {}",
                what, e, body_str
            );
            OfflineError::RemoteRejected {
                code: -1,
                message: format!("反序列化响应失败: {}", e),
            }
        })?;

        if api_resp.err_code != 0 {
            error!(
                "[RemoteApi] {} 业务错误: errCode={}, errMsg={}",
                what, api_resp.err_code, api_resp.err_msg
            );
            return Err(OfflineError::RemoteRejected {
                code: api_resp.err_code,
                message: api_resp.err_msg,
            });
        }
        Ok(api_resp.data)
    }
}

#[async_trait]
impl RemoteApi for HttpRemoteApi {
    async fn dispatch(&self, change: &PendingChange) -> Result<()> {
        let path = endpoint_path(&change.change_type)
            .ok_or_else(|| OfflineError::UnknownChangeType(change.change_type.to_string()))?;
        let url = self.url(path);
        let operation_id = Uuid::new_v4().to_string();

        info!(
            "[RemoteApi] 📡 投递变更 #{} ({}) -> {}",
            change.id, change.change_type, url
        );
        debug!("[RemoteApi]   操作ID: {}", operation_id);

        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .header("operationID", &operation_id)
            .json(&change.payload)
            .send()
            .await?;

        Self::read_envelope::<serde_json::Value>(response, change.change_type.as_str()).await?;
        Ok(())
    }

    async fn fetch_popular_events(&self, limit: usize) -> Result<Vec<RemoteEvent>> {
        let url = self.url("/event/popular");
        let operation_id = Uuid::new_v4().to_string();
        info!("[RemoteApi] 📡 请求热门活动，数量上限: {}", limit);

        let response = self
            .client
            .get(&url)
            .query(&[("limit", limit)])
            .header("operationID", &operation_id)
            .send()
            .await?;

        let resp: Option<PopularEventsResp> = Self::read_envelope(response, "热门活动").await?;
        let events: Vec<RemoteEvent> = resp
            .map(|r| r.events)
            .unwrap_or_default()
            .into_iter()
            .filter_map(RemoteEvent::from_value)
            .take(limit)
            .collect();
        info!("[RemoteApi] 获取热门活动 {} 条", events.len());
        Ok(events)
    }

    async fn fetch_event(&self, id: &str) -> Result<Option<RemoteEvent>> {
        let url = self.event_url(id)?;
        let operation_id = Uuid::new_v4().to_string();
        debug!("[RemoteApi] 📡 请求活动 {}", id);

        let response = self
            .client
            .get(url)
            .header("operationID", &operation_id)
            .send()
            .await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let data: Option<serde_json::Value> = Self::read_envelope(response, "活动详情").await?;
        Ok(data.and_then(RemoteEvent::from_value))
    }

    async fn fetch_image(&self, url: &str) -> Result<Vec<u8>> {
        debug!("[RemoteApi] 📡 抓取图片 {}", url);
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(OfflineError::RemoteRejected {
                code: status.as_u16() as i32,
                message: format!("抓取图片失败: {}", url),
            });
        }
        Ok(response.bytes().await?.to_vec())
    }
}
