//! 目标发现模块
//!
//! 提供监控集群成员列表，并按管理状态过滤离线节点

use crate::error::DirectoryError;
use crate::health::check::Target;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

/// 在线状态值
pub const STATUS_ONLINE: &str = "ONLINE";

/// 默认的监控节点服务器类型
pub const DEFAULT_SERVER_TYPE: &str = "RASCAL";

/// 集群成员记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Monitor {
    /// 主机名，同时作为目标标识
    #[serde(alias = "host_name")]
    pub host_name: String,
    /// 域名
    #[serde(alias = "domain_name")]
    pub domain_name: String,
    /// 管理状态，例如 ONLINE / OFFLINE / ADMIN_DOWN
    #[serde(default = "default_status")]
    pub status: String,
    /// 服务器类型
    #[serde(
        default,
        rename = "type",
        alias = "server_type",
        skip_serializing_if = "Option::is_none"
    )]
    pub server_type: Option<String>,
}

fn default_status() -> String {
    STATUS_ONLINE.to_string()
}

impl Monitor {
    /// 是否为在线状态
    pub fn is_online(&self) -> bool {
        self.status.eq_ignore_ascii_case(STATUS_ONLINE)
    }

    /// 转换为检测目标
    pub fn to_target(&self) -> Target {
        Target::new(
            self.host_name.as_str(),
            format!("http://{}.{}", self.host_name, self.domain_name),
        )
    }
}

/// 把成员列表过滤并转换为目标列表
pub fn monitors_to_targets<'a>(
    monitors: impl IntoIterator<Item = &'a Monitor>,
    include_offline: bool,
) -> Vec<Target> {
    monitors
        .into_iter()
        .filter(|m| include_offline || m.is_online())
        .map(Monitor::to_target)
        .collect()
}

/// 目标发现trait
#[async_trait]
pub trait TargetDirectory: Send + Sync {
    /// 获取当前需要监控的目标
    ///
    /// # 参数
    /// * `include_offline` - 是否包含管理上离线的成员
    async fn targets(&self, include_offline: bool) -> Result<Vec<Target>, DirectoryError>;
}

/// 静态目标列表
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    monitors: Vec<Monitor>,
}

impl StaticDirectory {
    pub fn new(monitors: Vec<Monitor>) -> Self {
        Self { monitors }
    }
}

#[async_trait]
impl TargetDirectory for StaticDirectory {
    async fn targets(&self, include_offline: bool) -> Result<Vec<Target>, DirectoryError> {
        Ok(monitors_to_targets(&self.monitors, include_offline))
    }
}

/// 运维API的响应信封
#[derive(Debug, Deserialize)]
struct ServersResponse {
    response: Vec<Monitor>,
}

/// 通过HTTP从运维API获取成员列表
#[derive(Debug, Clone)]
pub struct HttpDirectory {
    /// HTTP客户端
    client: Client,
    /// 服务器列表地址
    url: String,
    /// 只保留该类型的服务器
    server_type: Option<String>,
    /// 附加请求头
    headers: HashMap<String, String>,
}

impl HttpDirectory {
    /// 创建新的HTTP目标发现
    ///
    /// # 参数
    /// * `url` - 服务器列表地址
    /// * `timeout` - 请求超时时间
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, DirectoryError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(format!("{}/{}", crate::APP_NAME, crate::VERSION))
            .build()?;

        Ok(Self {
            client,
            url: url.into(),
            server_type: Some(DEFAULT_SERVER_TYPE.to_string()),
            headers: HashMap::new(),
        })
    }

    /// 设置服务器类型过滤，`None` 表示不过滤
    pub fn with_server_type(mut self, server_type: Option<String>) -> Self {
        self.server_type = server_type;
        self
    }

    /// 设置附加请求头
    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    fn matches_type(&self, monitor: &Monitor) -> bool {
        match (&self.server_type, &monitor.server_type) {
            (None, _) => true,
            (Some(wanted), Some(actual)) => wanted.eq_ignore_ascii_case(actual),
            (Some(_), None) => false,
        }
    }
}

#[async_trait]
impl TargetDirectory for HttpDirectory {
    async fn targets(&self, include_offline: bool) -> Result<Vec<Target>, DirectoryError> {
        let mut request = self.client.get(&self.url);
        for (key, value) in &self.headers {
            request = request.header(key, value);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(DirectoryError::UnexpectedStatus {
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await?;
        let servers: ServersResponse =
            serde_json::from_slice(&body).map_err(|e| DirectoryError::Decode(e.to_string()))?;

        let monitors: Vec<&Monitor> = servers
            .response
            .iter()
            .filter(|m| self.matches_type(m))
            .collect();
        debug!(
            "目标列表共 {} 条记录，匹配类型 {} 条",
            servers.response.len(),
            monitors.len()
        );

        Ok(monitors_to_targets(monitors, include_offline))
    }
}
