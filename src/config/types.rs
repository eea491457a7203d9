//! 配置数据结构定义
//!
//! 定义应用程序的配置结构体和验证逻辑

use crate::directory::{Monitor, DEFAULT_SERVER_TYPE};
use crate::error::ConfigError;
use crate::health::peer_poller::DEFAULT_STATS_PATH;
use crate::health::Schedule;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// 主配置结构
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Config {
    /// 全局配置项
    #[serde(default)]
    pub global: GlobalConfig,
    /// 对等轮询器检测配置
    #[serde(default)]
    pub peer_poller: PeerPollerConfig,
    /// 目标发现配置
    #[serde(default)]
    pub directory: DirectoryConfig,
}

/// 全局配置结构
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GlobalConfig {
    /// 检测间隔（秒）
    #[serde(default = "default_interval")]
    pub interval_seconds: u64,
    /// 宽限期（秒）
    #[serde(default = "default_grace")]
    pub grace_seconds: u64,
    /// 请求超时时间（秒）
    #[serde(default = "default_timeout")]
    pub request_timeout_seconds: u64,
    /// 最大并发检测数
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_checks: usize,
    /// 是否包含离线成员
    #[serde(default)]
    pub include_offline: bool,
    /// 日志级别，命令行未指定 `--log-level` 时生效
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// 按模块设置的日志级别，例如 `reqwest = "warn"`
    #[serde(default)]
    pub log_modules: HashMap<String, String>,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            interval_seconds: default_interval(),
            grace_seconds: default_grace(),
            request_timeout_seconds: default_timeout(),
            max_concurrent_checks: default_max_concurrent(),
            include_offline: false,
            log_level: default_log_level(),
            log_modules: HashMap::new(),
        }
    }
}

impl GlobalConfig {
    /// 构造调度参数
    pub fn schedule(&self) -> Result<Schedule, ConfigError> {
        Schedule::new(
            Duration::from_secs(self.interval_seconds),
            Duration::from_secs(self.grace_seconds),
        )
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

/// 对等轮询器检测配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PeerPollerConfig {
    /// 最久对等轮询时间上限（毫秒）
    #[serde(default = "default_stale_threshold_ms")]
    pub stale_threshold_ms: u64,
    /// 统计端点路径
    #[serde(default = "default_stats_path")]
    pub stats_path: String,
}

impl Default for PeerPollerConfig {
    fn default() -> Self {
        Self {
            stale_threshold_ms: default_stale_threshold_ms(),
            stats_path: default_stats_path(),
        }
    }
}

impl PeerPollerConfig {
    pub fn stale_threshold(&self) -> Duration {
        Duration::from_millis(self.stale_threshold_ms)
    }
}

/// 目标发现配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum DirectoryConfig {
    /// 配置文件中的静态成员列表
    Static {
        #[serde(default)]
        monitors: Vec<Monitor>,
    },
    /// 从运维API获取成员列表
    Http {
        /// 服务器列表地址
        url: String,
        /// 服务器类型过滤，空字符串表示不过滤
        #[serde(default = "default_server_type")]
        server_type: String,
        /// 附加请求头
        #[serde(default)]
        headers: HashMap<String, String>,
    },
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        DirectoryConfig::Static {
            monitors: Vec::new(),
        }
    }
}

// 默认值函数
fn default_interval() -> u64 {
    5
}
fn default_grace() -> u64 {
    30
}
fn default_timeout() -> u64 {
    5
}
fn default_max_concurrent() -> usize {
    16
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_stale_threshold_ms() -> u64 {
    10_000
}
fn default_stats_path() -> String {
    DEFAULT_STATS_PATH.to_string()
}
fn default_server_type() -> String {
    DEFAULT_SERVER_TYPE.to_string()
}

/// 配置验证函数
///
/// # 参数
/// * `config` - 要验证的配置
///
/// # 返回
/// * `Result<(), String>` - 验证结果，错误时返回错误信息
pub fn validate_config(config: &Config) -> Result<(), String> {
    let global = &config.global;

    if global.interval_seconds == 0 {
        return Err("检测间隔不能为0".to_string());
    }

    if global.request_timeout_seconds == 0 {
        return Err("请求超时时间不能为0".to_string());
    }

    if global.max_concurrent_checks == 0 {
        return Err("最大并发检测数不能为0".to_string());
    }

    let valid_log_levels = ["debug", "info", "warn", "error"];
    if !valid_log_levels.contains(&global.log_level.as_str()) {
        return Err(format!(
            "无效的日志级别: {}，支持的级别: {:?}",
            global.log_level, valid_log_levels
        ));
    }

    for (module, level) in &global.log_modules {
        if module.trim().is_empty() {
            return Err("模块日志级别的模块名不能为空".to_string());
        }
        if !valid_log_levels.contains(&level.as_str()) {
            return Err(format!(
                "模块 {} 的日志级别无效: {}，支持的级别: {:?}",
                module, level, valid_log_levels
            ));
        }
    }

    if config.peer_poller.stale_threshold_ms == 0 {
        return Err("过期阈值不能为0".to_string());
    }

    if !config.peer_poller.stats_path.starts_with('/') {
        return Err(format!(
            "统计端点路径必须以 / 开头: {}",
            config.peer_poller.stats_path
        ));
    }

    match &config.directory {
        DirectoryConfig::Static { monitors } => {
            for monitor in monitors {
                if monitor.host_name.trim().is_empty() {
                    return Err("监控节点主机名不能为空".to_string());
                }
                if monitor.domain_name.trim().is_empty() {
                    return Err(format!("监控节点 {} 的域名不能为空", monitor.host_name));
                }
            }
        }
        DirectoryConfig::Http { url, .. } => {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(format!("目标列表URL格式无效: {url}"));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_config() -> Config {
        Config {
            global: GlobalConfig::default(),
            peer_poller: PeerPollerConfig::default(),
            directory: DirectoryConfig::Static {
                monitors: vec![Monitor {
                    host_name: "tm-01".to_string(),
                    domain_name: "cdn.example.net".to_string(),
                    status: "ONLINE".to_string(),
                    server_type: None,
                }],
            },
        }
    }

    #[test]
    fn test_config_serialization() {
        let config = create_test_config();

        let serialized = toml::to_string(&config).expect("序列化失败");
        assert!(!serialized.is_empty());

        let deserialized: Config = toml::from_str(&serialized).expect("反序列化失败");
        assert_eq!(config, deserialized);
    }

    #[test]
    fn test_config_validation() {
        assert!(validate_config(&create_test_config()).is_ok());
        assert!(validate_config(&Config::default()).is_ok());
    }

    #[test]
    fn test_default_values() {
        let config: Config = toml::from_str("").unwrap();

        assert_eq!(config.global.interval_seconds, 5);
        assert_eq!(config.global.grace_seconds, 30);
        assert_eq!(config.global.request_timeout_seconds, 5);
        assert_eq!(config.global.max_concurrent_checks, 16);
        assert!(!config.global.include_offline);
        assert_eq!(config.peer_poller.stale_threshold(), Duration::from_secs(10));
        assert_eq!(config.peer_poller.stats_path, "/publish/Stats");
        assert_eq!(config.directory, DirectoryConfig::default());
    }

    #[test]
    fn test_config_validation_zero_interval() {
        let mut config = create_test_config();
        config.global.interval_seconds = 0;

        let result = validate_config(&config);
        assert!(result.unwrap_err().contains("检测间隔不能为0"));
    }

    #[test]
    fn test_config_validation_zero_grace_is_allowed() {
        let mut config = create_test_config();
        config.global.grace_seconds = 0;

        assert!(validate_config(&config).is_ok());
        assert_eq!(config.global.schedule().unwrap().grace(), Duration::ZERO);
    }

    #[test]
    fn test_config_validation_invalid_log_level() {
        let mut config = create_test_config();
        config.global.log_level = "verbose".to_string();

        assert!(validate_config(&config).unwrap_err().contains("日志级别"));
    }

    #[test]
    fn test_config_validation_module_levels() {
        let mut config = create_test_config();
        config
            .global
            .log_modules
            .insert("reqwest".to_string(), "warn".to_string());
        assert!(validate_config(&config).is_ok());

        config
            .global
            .log_modules
            .insert("hyper".to_string(), "loud".to_string());
        let err = validate_config(&config).unwrap_err();
        assert!(err.contains("hyper"), "{err}");
    }

    #[test]
    fn test_log_modules_toml() {
        let config: Config = toml::from_str(
            r#"
[global]
log_level = "debug"

[global.log_modules]
reqwest = "warn"
"#,
        )
        .unwrap();

        assert_eq!(config.global.log_level, "debug");
        assert_eq!(config.global.log_modules.get("reqwest").unwrap(), "warn");
    }

    #[test]
    fn test_config_validation_invalid_http_url() {
        let mut config = create_test_config();
        config.directory = DirectoryConfig::Http {
            url: "ops.example.net/api/servers".to_string(),
            server_type: default_server_type(),
            headers: HashMap::new(),
        };

        assert!(validate_config(&config).unwrap_err().contains("URL格式无效"));
    }

    #[test]
    fn test_config_validation_empty_host() {
        let mut config = create_test_config();
        if let DirectoryConfig::Static { monitors } = &mut config.directory {
            monitors[0].host_name = " ".to_string();
        }

        assert!(validate_config(&config).unwrap_err().contains("主机名不能为空"));
    }

    #[test]
    fn test_http_directory_toml() {
        let config: Config = toml::from_str(
            r#"
[directory]
kind = "http"
url = "https://ops.example.net/api/servers"

[directory.headers]
Authorization = "Bearer abc"
"#,
        )
        .unwrap();

        match config.directory {
            DirectoryConfig::Http {
                url,
                server_type,
                headers,
            } => {
                assert_eq!(url, "https://ops.example.net/api/servers");
                assert_eq!(server_type, "RASCAL");
                assert_eq!(headers.get("Authorization").unwrap(), "Bearer abc");
            }
            other => panic!("unexpected directory: {other:?}"),
        }
    }
}
