//! 对等轮询器健康检测
//!
//! 读取监控节点 `/publish/Stats` 中的 "Oldest Polled Peer Time (ms)"，
//! 超过阈值即认为该节点已停止刷新对等状态

use crate::error::HealthCheckError;
use crate::health::check::{HealthCheck, Target};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// 默认统计端点路径
pub const DEFAULT_STATS_PATH: &str = "/publish/Stats";

/// 默认过期阈值
pub const DEFAULT_STALE_THRESHOLD: Duration = Duration::from_secs(10);

/// Stats 端点的响应体，只包含需要的字段
#[derive(Debug, Deserialize)]
struct StatsResponse {
    stats: Stats,
}

#[derive(Debug, Deserialize)]
struct Stats {
    #[serde(rename = "Oldest Polled Peer Time (ms)")]
    oldest_polled_peer_time_ms: u64,
}

/// 对等轮询器检测器
#[derive(Debug, Clone)]
pub struct PeerPollerCheck {
    /// HTTP客户端
    client: Client,
    /// 过期阈值
    stale_threshold: Duration,
    /// 统计端点路径
    stats_path: String,
}

impl PeerPollerCheck {
    /// 创建新的对等轮询器检测器
    ///
    /// # 参数
    /// * `timeout` - 单次请求超时时间
    /// * `stale_threshold` - 最久对等轮询时间的上限
    pub fn new(timeout: Duration, stale_threshold: Duration) -> Result<Self, HealthCheckError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(format!("{}/{}", crate::APP_NAME, crate::VERSION))
            .build()?;

        Ok(Self::with_client(client, stale_threshold))
    }

    /// 使用已有的HTTP客户端创建
    pub fn with_client(client: Client, stale_threshold: Duration) -> Self {
        Self {
            client,
            stale_threshold,
            stats_path: DEFAULT_STATS_PATH.to_string(),
        }
    }

    /// 设置统计端点路径
    pub fn with_stats_path(mut self, stats_path: impl Into<String>) -> Self {
        self.stats_path = stats_path.into();
        self
    }

    pub fn stale_threshold(&self) -> Duration {
        self.stale_threshold
    }

    /// 获取节点报告的最久对等轮询时间
    ///
    /// # 参数
    /// * `base_uri` - 节点基础地址，例如 `http://tm-01.cdn.example.net`
    pub async fn oldest_polled_peer_time(
        &self,
        base_uri: &str,
    ) -> Result<Duration, HealthCheckError> {
        let url = format!("{}{}", base_uri.trim_end_matches('/'), self.stats_path);
        let response = self.client.get(&url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(HealthCheckError::UnexpectedStatus {
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await?;
        let stats: StatsResponse = serde_json::from_slice(&body)
            .map_err(|e| HealthCheckError::Decode(format!("{url}: {e}")))?;

        Ok(Duration::from_millis(stats.stats.oldest_polled_peer_time_ms))
    }

    /// 判断最久对等轮询时间是否在阈值内
    pub fn verdict(&self, last_poll: Duration) -> Result<(), HealthCheckError> {
        if last_poll > self.stale_threshold {
            return Err(HealthCheckError::StalePeerPoll {
                last_poll,
                threshold: self.stale_threshold,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl HealthCheck for PeerPollerCheck {
    async fn check(&self, target: &Target) -> Result<(), HealthCheckError> {
        let last_poll = self.oldest_polled_peer_time(&target.uri).await?;
        debug!("{} 最久对等轮询时间: {:?}", target.name, last_poll);
        self.verdict(last_poll)
    }
}
