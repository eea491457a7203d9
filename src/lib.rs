//! Peer Vitals - 监控集群对等轮询健康验证工具
//!
//! 周期性检测监控节点的对等轮询是否过期，并对结果做去抖：
//! - 单个节点或整个集群的周期验证
//! - 宽限期内的短暂失败不会升级为 DOWN
//! - 可插拔的健康检测与目标发现
//! - 结构化日志记录

pub mod cli;
pub mod config;
pub mod directory;
pub mod error;
pub mod health;
pub mod logging;
pub mod signal;

// 重新导出主要类型
pub use config::{Config, GlobalConfig, PeerPollerConfig};
pub use directory::{HttpDirectory, Monitor, StaticDirectory, TargetDirectory};
pub use error::PeerVitalsError;
pub use health::{
    CheckResult, EventKind, FleetEvent, FleetValidator, HealthCheck, PeerPollerCheck, Schedule,
    SingleTargetValidator, Target, TargetEvent, TargetName,
};

/// 应用程序版本信息
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// 应用程序名称
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");

/// 应用程序描述
pub const APP_DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");
