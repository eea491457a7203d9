//! 健康检测结果数据结构
//!
//! 每个tick重新生成，不会在回调之外持久化

use crate::error::HealthCheckError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;

/// 单次检测结果
#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    /// 是否健康
    pub healthy: bool,
    /// 不健康时的原因
    pub detail: Option<String>,
    /// 观测时刻（单调时钟，用于宽限期计算）
    #[serde(skip)]
    pub observed_at: Instant,
    /// 检测完成时间（墙上时钟，用于展示）
    pub checked_at: DateTime<Utc>,
    /// 检测耗时
    #[serde(rename = "response_time_ms", serialize_with = "serialize_millis")]
    pub response_time: Duration,
}

impl CheckResult {
    /// 创建健康结果
    pub fn healthy(observed_at: Instant) -> Self {
        Self {
            healthy: true,
            detail: None,
            observed_at,
            checked_at: Utc::now(),
            response_time: Duration::ZERO,
        }
    }

    /// 创建不健康结果
    pub fn unhealthy(observed_at: Instant, detail: impl Into<String>) -> Self {
        Self {
            healthy: false,
            detail: Some(detail.into()),
            observed_at,
            checked_at: Utc::now(),
            response_time: Duration::ZERO,
        }
    }

    /// 将检测返回值折叠为结果，检测错误与"不健康"结论不做区分
    pub fn from_outcome(
        observed_at: Instant,
        outcome: Result<(), HealthCheckError>,
    ) -> Self {
        match outcome {
            Ok(()) => Self::healthy(observed_at),
            Err(e) => Self::unhealthy(observed_at, e.to_string()),
        }
    }

    /// 设置检测耗时
    pub fn with_response_time(mut self, response_time: Duration) -> Self {
        self.response_time = response_time;
        self
    }

    /// 获取检测耗时（毫秒）
    pub fn response_time_ms(&self) -> u64 {
        self.response_time.as_millis() as u64
    }
}

fn serialize_millis<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_u64(duration.as_millis() as u64)
}
