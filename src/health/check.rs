//! 健康检测目标与检测接口
//!
//! 验证器只关心检测结论（健康/不健康），具体如何判定由 `HealthCheck` 实现决定

use crate::error::HealthCheckError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

/// 目标标识（例如监控节点的主机名）
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TargetName(String);

impl TargetName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TargetName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TargetName {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl From<String> for TargetName {
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl Borrow<str> for TargetName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// 被检测的目标
///
/// 在一次tick内不可变，两次tick之间可能消失
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    /// 目标标识
    pub name: TargetName,
    /// 执行检测时使用的地址
    pub uri: String,
}

impl Target {
    pub fn new(name: impl Into<TargetName>, uri: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            uri: uri.into(),
        }
    }
}

/// 健康检测trait，定义可插拔的检测谓词
///
/// 返回 `Ok(())` 表示健康，返回错误表示不健康并携带原因。
/// 验证器不会为检测施加超时，实现方需要自行保证在有限时间内返回。
#[async_trait]
pub trait HealthCheck: Send + Sync {
    /// 对单个目标执行一次检测
    async fn check(&self, target: &Target) -> Result<(), HealthCheckError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_target_name_lookup_by_str() {
        let mut map = HashMap::new();
        map.insert(TargetName::from("tm-01"), 1);

        assert_eq!(map.get("tm-01"), Some(&1));
        assert_eq!(TargetName::new("tm-01").to_string(), "tm-01");
    }

    #[test]
    fn test_target_name_serializes_as_plain_string() {
        let target = Target::new("tm-01", "http://tm-01.cdn.example.net");
        let json = serde_json::to_value(&target).unwrap();

        assert_eq!(json["name"], "tm-01");
        assert_eq!(json["uri"], "http://tm-01.cdn.example.net");
    }
}
