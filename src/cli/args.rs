//! 命令行参数定义
//!
//! 使用clap定义应用程序的命令行接口

use crate::config::Config;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Peer Vitals - 监控集群对等轮询健康验证工具
#[derive(Parser, Debug, Clone)]
#[command(
    name = "peer-vitals",
    version = crate::VERSION,
    about = crate::APP_DESCRIPTION,
    long_about = None
)]
pub struct Args {
    /// 配置文件路径
    #[arg(
        short,
        long,
        value_name = "FILE",
        help = "配置文件路径",
        env = "PEER_VITALS_CONFIG",
        global = true
    )]
    pub config: Option<PathBuf>,

    /// 日志级别（未指定时使用配置文件中的 log_level）
    #[arg(
        short,
        long,
        value_enum,
        help = "日志级别",
        env = "PEER_VITALS_LOG_LEVEL",
        global = true
    )]
    pub log_level: Option<LogLevel>,

    /// 以JSON格式输出日志
    #[arg(long, help = "以JSON格式输出日志", global = true)]
    pub json_logs: bool,

    /// 日志文件路径
    #[arg(long, value_name = "FILE", help = "日志文件路径", global = true)]
    pub log_file: Option<PathBuf>,

    /// 子命令
    #[command(subcommand)]
    pub command: Commands,
}

/// 日志级别枚举
#[derive(ValueEnum, Clone, Debug, PartialEq)]
pub enum LogLevel {
    /// 调试级别
    Debug,
    /// 信息级别
    Info,
    /// 警告级别
    Warn,
    /// 错误级别
    Error,
}

impl From<LogLevel> for log::LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Error => log::LevelFilter::Error,
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Error => write!(f, "error"),
        }
    }
}

/// 覆盖配置文件中调度参数的命令行选项
#[derive(clap::Args, Debug, Clone, Default, PartialEq)]
pub struct ScheduleOverrides {
    /// 检测间隔（秒）
    #[arg(
        short,
        long,
        value_name = "SECONDS",
        help = "检测间隔（秒）",
        env = "PEER_VITALS_INTERVAL"
    )]
    pub interval: Option<u64>,

    /// 宽限期（秒）
    #[arg(
        short,
        long,
        value_name = "SECONDS",
        help = "宽限期（秒）",
        env = "PEER_VITALS_GRACE"
    )]
    pub grace: Option<u64>,

    /// 最久对等轮询时间上限（毫秒）
    #[arg(long, value_name = "MILLIS", help = "最久对等轮询时间上限（毫秒）")]
    pub threshold_ms: Option<u64>,
}

impl ScheduleOverrides {
    /// 把命令行覆盖值写入配置
    pub fn apply(&self, config: &mut Config) {
        if let Some(interval) = self.interval {
            config.global.interval_seconds = interval;
        }
        if let Some(grace) = self.grace {
            config.global.grace_seconds = grace;
        }
        if let Some(threshold_ms) = self.threshold_ms {
            config.peer_poller.stale_threshold_ms = threshold_ms;
        }
    }
}

/// 子命令定义
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// 持续验证单个监控节点
    Watch {
        /// 节点基础地址，例如 http://tm-01.cdn.example.net
        #[arg(value_name = "URI", help = "节点基础地址")]
        uri: String,

        /// 目标标识（默认取地址中的主机名）
        #[arg(long, value_name = "NAME", help = "目标标识")]
        name: Option<String>,

        #[command(flatten)]
        overrides: ScheduleOverrides,

        /// 以JSON行输出事件
        #[arg(long, help = "以JSON行输出事件到标准输出")]
        json_events: bool,
    },

    /// 持续验证目标列表中的所有监控节点
    WatchFleet {
        /// 包含管理上离线的节点
        #[arg(long, help = "包含管理上离线的节点")]
        include_offline: bool,

        #[command(flatten)]
        overrides: ScheduleOverrides,

        /// 以JSON行输出事件
        #[arg(long, help = "以JSON行输出事件到标准输出")]
        json_events: bool,
    },

    /// 执行一次性检测（不做去抖）
    Check {
        /// 节点基础地址（可选，不指定则检测目标列表中的所有节点）
        #[arg(value_name = "URI", help = "节点基础地址")]
        uri: Option<String>,

        /// 包含管理上离线的节点
        #[arg(long, help = "包含管理上离线的节点")]
        include_offline: bool,

        /// 最久对等轮询时间上限（毫秒）
        #[arg(long, value_name = "MILLIS", help = "最久对等轮询时间上限（毫秒）")]
        threshold_ms: Option<u64>,

        /// 输出格式
        #[arg(short, long, value_enum, default_value = "text", help = "输出格式")]
        format: OutputFormat,
    },

    /// 初始化配置文件
    Init {
        /// 配置文件路径
        #[arg(
            value_name = "FILE",
            help = "配置文件路径",
            default_value = "peer-vitals.toml"
        )]
        config_path: PathBuf,

        /// 是否覆盖现有文件
        #[arg(short, long, help = "覆盖现有文件")]
        force: bool,
    },

    /// 验证配置文件
    Validate {
        /// 配置文件路径
        #[arg(value_name = "FILE", help = "配置文件路径")]
        config_path: Option<PathBuf>,

        /// 是否显示详细信息
        #[arg(short, long, help = "显示详细信息")]
        verbose: bool,
    },

    /// 显示版本信息
    Version {
        /// 输出格式
        #[arg(short, long, value_enum, default_value = "text", help = "输出格式")]
        format: OutputFormat,
    },
}

/// 输出格式枚举
#[derive(ValueEnum, Clone, Debug, PartialEq)]
pub enum OutputFormat {
    /// 文本格式
    Text,
    /// JSON格式
    Json,
}

impl Args {
    /// 获取配置文件路径
    pub fn get_config_path(&self) -> PathBuf {
        self.config
            .clone()
            .unwrap_or_else(crate::config::get_default_config_path)
    }

    /// 是否显式指定了配置文件
    pub fn has_explicit_config(&self) -> bool {
        self.config.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_watch_with_overrides() {
        let args = Args::try_parse_from([
            "peer-vitals",
            "watch",
            "http://tm-01.cdn.example.net",
            "--interval",
            "2",
            "--grace",
            "6",
            "--json-events",
        ])
        .unwrap();

        match args.command {
            Commands::Watch {
                uri,
                name,
                overrides,
                json_events,
            } => {
                assert_eq!(uri, "http://tm-01.cdn.example.net");
                assert!(name.is_none());
                assert_eq!(overrides.interval, Some(2));
                assert_eq!(overrides.grace, Some(6));
                assert!(json_events);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_watch_fleet_with_global_config() {
        let args = Args::try_parse_from([
            "peer-vitals",
            "watch-fleet",
            "--include-offline",
            "-c",
            "/etc/peer-vitals.toml",
        ])
        .unwrap();

        assert_eq!(args.config, Some(PathBuf::from("/etc/peer-vitals.toml")));
        assert!(args.has_explicit_config());
        assert!(matches!(
            args.command,
            Commands::WatchFleet {
                include_offline: true,
                ..
            }
        ));
    }

    #[test]
    fn test_overrides_apply() {
        let mut config = Config::default();
        let overrides = ScheduleOverrides {
            interval: Some(1),
            grace: Some(0),
            threshold_ms: Some(2500),
        };

        overrides.apply(&mut config);
        assert_eq!(config.global.interval_seconds, 1);
        assert_eq!(config.global.grace_seconds, 0);
        assert_eq!(config.peer_poller.stale_threshold_ms, 2500);

        let untouched = Config::default();
        let mut config = untouched.clone();
        ScheduleOverrides::default().apply(&mut config);
        assert_eq!(config, untouched);
    }

    #[test]
    fn test_log_level_is_optional() {
        let args = Args::try_parse_from(["peer-vitals", "version"]).unwrap();
        assert!(args.log_level.is_none());

        let args = Args::try_parse_from(["peer-vitals", "version", "-l", "warn"]).unwrap();
        assert_eq!(args.log_level, Some(LogLevel::Warn));
    }

    #[test]
    fn test_log_level_conversion() {
        assert_eq!(log::LevelFilter::from(LogLevel::Warn), log::LevelFilter::Warn);
        assert_eq!(LogLevel::Debug.to_string(), "debug");
    }
}
