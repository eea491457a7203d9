//! 错误处理模块
//!
//! 定义应用程序的统一错误类型

use std::time::Duration;
use thiserror::Error;

/// Peer Vitals 应用程序的主要错误类型
#[derive(Error, Debug)]
pub enum PeerVitalsError {
    /// 配置相关错误
    #[error("配置错误: {0}")]
    Config(#[from] ConfigError),

    /// 健康检测相关错误
    #[error("健康检测错误: {0}")]
    HealthCheck(#[from] HealthCheckError),

    /// 目标发现相关错误
    #[error("目标发现错误: {0}")]
    Directory(#[from] DirectoryError),

    /// IO错误
    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),

    /// JSON序列化/反序列化错误
    #[error("JSON错误: {0}")]
    Json(#[from] serde_json::Error),

    /// 其他错误
    #[error("其他错误: {0}")]
    Other(#[from] anyhow::Error),
}

/// 配置错误类型
#[derive(Error, Debug)]
pub enum ConfigError {
    /// 配置文件解析错误
    #[error("配置文件解析失败: {0}")]
    ParseError(String),

    /// 配置验证错误
    #[error("配置验证失败: {0}")]
    ValidationError(String),

    /// 配置文件不存在
    #[error("配置文件不存在: {path}")]
    FileNotFound { path: String },

    /// 环境变量替换错误
    #[error("环境变量替换失败: {var}")]
    EnvVarError { var: String },
}

/// 健康检测错误类型
///
/// 任何一种都会被验证器折叠为一次不健康的检测结果，
/// 只有 `CheckCompleted` 事件中的 detail 能区分它们。
#[derive(Error, Debug)]
pub enum HealthCheckError {
    /// HTTP请求错误
    #[error("HTTP请求失败: {0}")]
    Request(#[from] reqwest::Error),

    /// 非2xx响应
    #[error("状态码异常: {status}")]
    UnexpectedStatus { status: u16 },

    /// 响应体解析失败
    #[error("响应解析失败: {0}")]
    Decode(String),

    /// 对等轮询过期
    #[error("对等轮询已过期: 最久对等轮询时间 {last_poll:?} 超过阈值 {threshold:?}")]
    StalePeerPoll {
        last_poll: Duration,
        threshold: Duration,
    },

    /// 检测任务panic
    #[error("健康检测任务panic: {0}")]
    Panicked(String),

    /// 检测任务被取消
    #[error("健康检测任务被取消")]
    Cancelled,
}

/// 目标发现错误类型
#[derive(Error, Debug)]
pub enum DirectoryError {
    /// HTTP请求错误
    #[error("目标列表请求失败: {0}")]
    Request(#[from] reqwest::Error),

    /// 非2xx响应
    #[error("目标列表状态码异常: {status}")]
    UnexpectedStatus { status: u16 },

    /// 响应体解析失败
    #[error("目标列表解析失败: {0}")]
    Decode(String),
}

/// 结果类型别名
pub type Result<T> = std::result::Result<T, PeerVitalsError>;
