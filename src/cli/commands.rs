//! 命令处理逻辑
//!
//! 实现各种CLI命令的处理逻辑

use crate::cli::args::{Args, Commands, OutputFormat, ScheduleOverrides};
use crate::config::{validate_config, Config, ConfigLoader, DirectoryConfig, TomlConfigLoader};
use crate::directory::{HttpDirectory, StaticDirectory, TargetDirectory};
use crate::error::{ConfigError, Result};
use crate::health::{
    validate_all, validate_targets, CheckResult, FleetEvent, FleetValidator, HealthCheck,
    PeerPollerCheck, SingleTargetValidator, Target, TargetEvent,
};
use crate::logging::{LogConfig, LoggingSystem};
use crate::signal::setup_signal_handlers;
use async_trait::async_trait;
use reqwest::Url;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn};

/// 事件通道容量
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// `init` 命令写入的默认配置模板
pub const DEFAULT_CONFIG_TEMPLATE: &str = r#"# Peer Vitals 配置文件

[global]
# 检测间隔（秒）
interval_seconds = 5
# 宽限期（秒），持续失败超过该时长才判定为 DOWN，0 表示首次失败即 DOWN
grace_seconds = 30
# 单次请求超时（秒）
request_timeout_seconds = 5
# 集群模式下的最大并发检测数
max_concurrent_checks = 16
# 是否检测管理上离线的节点
include_offline = false
# 日志级别，命令行 --log-level 优先
log_level = "info"

# 按模块设置日志级别
[global.log_modules]
reqwest = "warn"

[peer_poller]
# 最久对等轮询时间上限（毫秒）
stale_threshold_ms = 10000
stats_path = "/publish/Stats"

[directory]
kind = "static"

[[directory.monitors]]
host_name = "tm-01"
domain_name = "cdn.example.net"
status = "ONLINE"

[[directory.monitors]]
host_name = "tm-02"
domain_name = "cdn.example.net"
status = "ONLINE"

# 从运维API获取成员列表时改为:
# [directory]
# kind = "http"
# url = "https://ops.example.net/api/servers"
# server_type = "RASCAL"
#
# [directory.headers]
# Authorization = "Bearer <token>"
"#;

/// 命令处理器trait
#[async_trait]
pub trait Command: Send + Sync {
    /// 执行命令
    async fn execute(&self, args: &Args) -> Result<()>;
}

/// 加载配置文件
///
/// 未显式指定配置文件且默认位置不存在时使用默认配置
pub async fn load_config(args: &Args) -> Result<Config> {
    let path = args.get_config_path();
    if !path.exists() && !args.has_explicit_config() {
        info!("未找到配置文件 {}，使用默认配置", path.display());
        return Ok(Config::default());
    }

    let loader = TomlConfigLoader::new(true);
    loader.load_from_file(&path).await
}

/// 根据命令行参数和配置文件生成日志配置
///
/// 命令行（或 `PEER_VITALS_LOG_LEVEL`）指定的级别优先于配置文件中的 `log_level`
pub fn log_config(args: &Args, config: &Config) -> LogConfig {
    let level = match &args.log_level {
        Some(level) => level.clone().into(),
        None => config
            .global
            .log_level
            .parse()
            .unwrap_or(log::LevelFilter::Info),
    };

    let module_levels = config
        .global
        .log_modules
        .iter()
        .filter_map(|(module, level)| {
            level
                .parse::<log::LevelFilter>()
                .ok()
                .map(|level| (module.clone(), level))
        })
        .collect();

    LogConfig {
        level,
        file_path: args.log_file.clone(),
        json_format: args.json_logs,
        module_levels,
    }
}

/// 加载配置并应用命令行覆盖值
async fn load_config_with_overrides(args: &Args, overrides: &ScheduleOverrides) -> Result<Config> {
    let mut config = load_config(args).await?;
    overrides.apply(&mut config);
    validate_config(&config).map_err(ConfigError::ValidationError)?;
    Ok(config)
}

/// 根据配置创建对等轮询检测
fn build_check(config: &Config) -> Result<Arc<dyn HealthCheck>> {
    let check = PeerPollerCheck::new(
        config.global.request_timeout(),
        config.peer_poller.stale_threshold(),
    )?
    .with_stats_path(config.peer_poller.stats_path.clone());
    Ok(Arc::new(check))
}

/// 根据配置创建目标发现
pub fn build_directory(config: &Config) -> Result<Arc<dyn TargetDirectory>> {
    match &config.directory {
        DirectoryConfig::Static { monitors } => {
            Ok(Arc::new(StaticDirectory::new(monitors.clone())))
        }
        DirectoryConfig::Http {
            url,
            server_type,
            headers,
        } => {
            let server_type = if server_type.is_empty() {
                None
            } else {
                Some(server_type.clone())
            };
            let directory = HttpDirectory::new(url.as_str(), config.global.request_timeout())?
                .with_server_type(server_type)
                .with_headers(headers.clone());
            Ok(Arc::new(directory))
        }
    }
}

/// 从命令行给出的地址构造检测目标
///
/// 未指定标识时使用地址中的主机名
pub fn target_from_uri(uri: &str, name: Option<&str>) -> Result<Target> {
    let parsed = Url::parse(uri)
        .map_err(|e| ConfigError::ValidationError(format!("无效的节点地址 {uri}: {e}")))?;

    let name = match name {
        Some(name) => name.to_string(),
        None => parsed
            .host_str()
            .ok_or_else(|| ConfigError::ValidationError(format!("节点地址缺少主机名: {uri}")))?
            .to_string(),
    };

    Ok(Target::new(name, uri.trim_end_matches('/')))
}

/// 把验证器事件写入日志，并按需以JSON行输出到标准输出
#[derive(Debug, Clone)]
struct EventReporter {
    logging: LoggingSystem,
    json_events: bool,
}

impl EventReporter {
    fn new(args: &Args, config: &Config, json_events: bool) -> Self {
        let logging = LoggingSystem::new(log_config(args, config));
        Self {
            logging,
            json_events,
        }
    }

    fn print_json<T: Serialize>(&self, event: &T) {
        if !self.json_events {
            return;
        }
        match serde_json::to_string(event) {
            Ok(line) => println!("{line}"),
            Err(e) => warn!("事件序列化失败: {e}"),
        }
    }

    async fn report_targets(self, mut events: mpsc::Receiver<TargetEvent>) {
        while let Some(event) = events.recv().await {
            self.logging.target_event_log(&event);
            self.print_json(&event);
        }
    }

    async fn report_fleet(self, mut events: mpsc::Receiver<FleetEvent>) {
        while let Some(event) = events.recv().await {
            self.logging.fleet_event_log(&event);
            self.print_json(&event);
        }
    }
}

/// 单目标持续验证命令
pub struct WatchCommand;

#[async_trait]
impl Command for WatchCommand {
    async fn execute(&self, args: &Args) -> Result<()> {
        let Commands::Watch {
            uri,
            name,
            overrides,
            json_events,
        } = &args.command
        else {
            return Ok(());
        };

        let config = load_config_with_overrides(args, overrides).await?;
        let schedule = config.global.schedule()?;
        let check = build_check(&config)?;
        let target = target_from_uri(uri, name.as_deref())?;

        info!(
            "开始验证 {} ({})，阈值 {}ms",
            target.name, target.uri, config.peer_poller.stale_threshold_ms
        );

        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        setup_signal_handlers(shutdown_tx.clone()).await?;

        let reporter = EventReporter::new(args, &config, *json_events);
        let report_task = tokio::spawn(reporter.report_targets(events_rx));

        let validator = SingleTargetValidator::new(target, schedule, check);
        let outcome = validator.run(events_tx, shutdown_rx).await;
        drop(shutdown_tx);

        if let Err(e) = report_task.await {
            error!("事件输出任务异常退出: {e}");
        }
        outcome
    }
}

/// 集群持续验证命令
pub struct WatchFleetCommand;

#[async_trait]
impl Command for WatchFleetCommand {
    async fn execute(&self, args: &Args) -> Result<()> {
        let Commands::WatchFleet {
            include_offline,
            overrides,
            json_events,
        } = &args.command
        else {
            return Ok(());
        };

        let config = load_config_with_overrides(args, overrides).await?;
        let schedule = config.global.schedule()?;
        let check = build_check(&config)?;
        let directory = build_directory(&config)?;

        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        setup_signal_handlers(shutdown_tx.clone()).await?;

        let reporter = EventReporter::new(args, &config, *json_events);
        let report_task = tokio::spawn(reporter.report_fleet(events_rx));

        let validator = FleetValidator::new(directory, check, schedule)
            .with_include_offline(*include_offline || config.global.include_offline)
            .with_max_concurrent_checks(config.global.max_concurrent_checks);
        let outcome = validator.run(events_tx, shutdown_rx).await;
        drop(shutdown_tx);

        if let Err(e) = report_task.await {
            error!("事件输出任务异常退出: {e}");
        }
        outcome
    }
}

/// 一次性检测命令
pub struct CheckCommand;

#[async_trait]
impl Command for CheckCommand {
    async fn execute(&self, args: &Args) -> Result<()> {
        if let Commands::Check {
            uri,
            include_offline,
            threshold_ms,
            format,
        } = &args.command
        {
            let overrides = ScheduleOverrides {
                threshold_ms: *threshold_ms,
                ..Default::default()
            };
            let config = load_config_with_overrides(args, &overrides).await?;
            self.perform_check(&config, uri.as_deref(), *include_offline, format)
                .await
        } else {
            Ok(())
        }
    }
}

/// `check --format json` 的单条输出
#[derive(Debug, Serialize)]
struct CheckReport<'a> {
    target: &'a str,
    uri: &'a str,
    #[serde(flatten)]
    result: &'a CheckResult,
}

impl CheckCommand {
    async fn perform_check(
        &self,
        config: &Config,
        uri: Option<&str>,
        include_offline: bool,
        format: &OutputFormat,
    ) -> Result<()> {
        let check = build_check(config)?;
        let max_concurrent = config.global.max_concurrent_checks;

        let results = match uri {
            Some(uri) => {
                let target = target_from_uri(uri, None)?;
                validate_targets(check, vec![target], max_concurrent).await
            }
            None => {
                let directory = build_directory(config)?;
                let include_offline = include_offline || config.global.include_offline;
                validate_all(directory.as_ref(), check, include_offline, max_concurrent).await?
            }
        };

        if results.is_empty() {
            eprintln!("目标列表为空，没有需要检测的节点");
            return Ok(());
        }

        match format {
            OutputFormat::Json => {
                let reports: Vec<_> = results
                    .iter()
                    .map(|(target, result)| CheckReport {
                        target: target.name.as_str(),
                        uri: &target.uri,
                        result,
                    })
                    .collect();
                println!("{}", serde_json::to_string_pretty(&reports)?);
            }
            OutputFormat::Text => self.print_text_results(&results),
        }

        let unhealthy = results.iter().filter(|(_, r)| !r.healthy).count();
        if unhealthy > 0 {
            return Err(anyhow::anyhow!("{} / {} 个节点不健康", unhealthy, results.len()).into());
        }
        Ok(())
    }

    /// 打印文本格式结果
    fn print_text_results(&self, results: &[(Target, CheckResult)]) {
        for (target, result) in results {
            let status_icon = if result.healthy { "✓" } else { "✗" };
            println!(
                "{} {} ({}) - {}ms",
                status_icon,
                target.name,
                target.uri,
                result.response_time_ms()
            );

            if let Some(detail) = &result.detail {
                println!("  错误: {detail}");
            }
        }
    }
}

/// 初始化命令
pub struct InitCommand;

#[async_trait]
impl Command for InitCommand {
    async fn execute(&self, args: &Args) -> Result<()> {
        if let Commands::Init { config_path, force } = &args.command {
            self.create_config_file(config_path, *force).await
        } else {
            Ok(())
        }
    }
}

impl InitCommand {
    /// 创建配置文件
    async fn create_config_file(&self, config_path: &Path, force: bool) -> Result<()> {
        if config_path.exists() && !force {
            eprintln!("配置文件已存在: {}", config_path.display());
            eprintln!("使用 --force 参数覆盖现有文件");
            return Ok(());
        }

        if let Some(parent) = config_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        tokio::fs::write(config_path, DEFAULT_CONFIG_TEMPLATE).await?;

        println!("配置文件已创建: {}", config_path.display());
        println!("请编辑配置文件以添加您的监控节点");

        Ok(())
    }
}

/// 验证命令
pub struct ValidateCommand;

#[async_trait]
impl Command for ValidateCommand {
    async fn execute(&self, args: &Args) -> Result<()> {
        if let Commands::Validate {
            config_path,
            verbose,
        } = &args.command
        {
            let config_file = config_path
                .clone()
                .unwrap_or_else(|| args.get_config_path());

            self.validate_config_file(&config_file, *verbose).await
        } else {
            Ok(())
        }
    }
}

impl ValidateCommand {
    /// 验证配置文件
    async fn validate_config_file(&self, config_path: &Path, verbose: bool) -> Result<()> {
        println!("验证配置文件: {}", config_path.display());

        let loader = TomlConfigLoader::new(true);
        let config = loader.load_from_file(config_path).await?;

        if !verbose {
            println!("✓ 配置文件验证通过");
            return Ok(());
        }

        println!("配置验证通过！");
        println!("全局配置:");
        println!("  检测间隔: {}秒", config.global.interval_seconds);
        println!("  宽限期: {}秒", config.global.grace_seconds);
        println!("  请求超时: {}秒", config.global.request_timeout_seconds);
        println!("  最大并发: {}", config.global.max_concurrent_checks);
        println!("  包含离线节点: {}", config.global.include_offline);
        println!("  日志级别: {}", config.global.log_level);
        for (module, level) in &config.global.log_modules {
            println!("    {module}: {level}");
        }
        println!("对等轮询检测:");
        println!("  过期阈值: {}ms", config.peer_poller.stale_threshold_ms);
        println!("  统计端点: {}", config.peer_poller.stats_path);

        match &config.directory {
            DirectoryConfig::Static { monitors } => {
                println!("目标列表: 静态 ({} 个节点)", monitors.len());
                for (i, monitor) in monitors.iter().enumerate() {
                    println!(
                        "  {}. {}.{} [{}]",
                        i + 1,
                        monitor.host_name,
                        monitor.domain_name,
                        monitor.status
                    );
                }
            }
            DirectoryConfig::Http {
                url, server_type, ..
            } => {
                println!("目标列表: HTTP {url}");
                if !server_type.is_empty() {
                    println!("  服务器类型: {server_type}");
                }
            }
        }

        Ok(())
    }
}

/// 版本命令
pub struct VersionCommand;

#[async_trait]
impl Command for VersionCommand {
    async fn execute(&self, args: &Args) -> Result<()> {
        if let Commands::Version { format } = &args.command {
            match format {
                OutputFormat::Json => {
                    let version_info = serde_json::json!({
                        "name": crate::APP_NAME,
                        "version": crate::VERSION,
                        "description": crate::APP_DESCRIPTION
                    });
                    println!("{}", serde_json::to_string_pretty(&version_info)?);
                }
                OutputFormat::Text => {
                    println!("{} v{}", crate::APP_NAME, crate::VERSION);
                    println!("{}", crate::APP_DESCRIPTION);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn parse(argv: &[&str]) -> Args {
        let mut full = vec!["peer-vitals"];
        full.extend_from_slice(argv);
        Args::try_parse_from(full).unwrap()
    }

    #[tokio::test]
    async fn test_default_template_is_valid() {
        let loader = TomlConfigLoader::new(true);
        let config = loader.load_from_string(DEFAULT_CONFIG_TEMPLATE).await.unwrap();

        assert_eq!(config.global.interval_seconds, 5);
        assert_eq!(config.global.grace_seconds, 30);
        match config.directory {
            DirectoryConfig::Static { monitors } => assert_eq!(monitors.len(), 2),
            other => panic!("unexpected directory: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_init_creates_file_and_respects_force() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("peer-vitals.toml");
        let path_str = path.to_string_lossy().to_string();

        InitCommand
            .execute(&parse(&["init", &path_str]))
            .await
            .unwrap();
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            DEFAULT_CONFIG_TEMPLATE
        );

        // 不带 --force 时保留已有内容
        std::fs::write(&path, "# custom").unwrap();
        InitCommand
            .execute(&parse(&["init", &path_str]))
            .await
            .unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "# custom");

        InitCommand
            .execute(&parse(&["init", &path_str, "--force"]))
            .await
            .unwrap();
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            DEFAULT_CONFIG_TEMPLATE
        );
    }

    #[tokio::test]
    async fn test_validate_command() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.toml");
        std::fs::write(&good, DEFAULT_CONFIG_TEMPLATE).unwrap();
        let good_str = good.to_string_lossy().to_string();

        ValidateCommand
            .execute(&parse(&["validate", &good_str, "--verbose"]))
            .await
            .unwrap();

        let bad = dir.path().join("bad.toml");
        std::fs::write(&bad, "[global]\ninterval_seconds = 0\n").unwrap();
        let bad_str = bad.to_string_lossy().to_string();

        let err = ValidateCommand
            .execute(&parse(&["validate", &bad_str]))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("检测间隔不能为0"));
    }

    #[test]
    fn test_log_config_prefers_cli_level() {
        let mut config = Config::default();
        config.global.log_level = "debug".to_string();
        config
            .global
            .log_modules
            .insert("reqwest".to_string(), "warn".to_string());

        let from_file = log_config(&parse(&["version"]), &config);
        assert_eq!(from_file.level, log::LevelFilter::Debug);
        assert_eq!(
            from_file.module_levels.get("reqwest"),
            Some(&log::LevelFilter::Warn)
        );

        let from_cli = log_config(&parse(&["-l", "error", "version"]), &config);
        assert_eq!(from_cli.level, log::LevelFilter::Error);
    }

    #[test]
    fn test_target_from_uri() {
        let target = target_from_uri("http://tm-01.cdn.example.net/", None).unwrap();
        assert_eq!(target.name.as_str(), "tm-01.cdn.example.net");
        assert_eq!(target.uri, "http://tm-01.cdn.example.net");

        let named = target_from_uri("http://10.0.0.1:8080", Some("tm-01")).unwrap();
        assert_eq!(named.name.as_str(), "tm-01");

        assert!(target_from_uri("not a uri", None).is_err());
    }

    #[tokio::test]
    async fn test_build_static_directory() {
        let config: Config = toml::from_str(DEFAULT_CONFIG_TEMPLATE).unwrap();
        let directory = build_directory(&config).unwrap();

        let targets = directory.targets(false).await.unwrap();
        let names: Vec<_> = targets.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["tm-01", "tm-02"]);
        assert_eq!(targets[0].uri, "http://tm-01.cdn.example.net");
    }

    #[tokio::test]
    async fn test_check_command_reports_unhealthy_target() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/publish/Stats")
            .with_status(200)
            .with_body(
                serde_json::json!({ "stats": { "Oldest Polled Peer Time (ms)": 15000 } })
                    .to_string(),
            )
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("peer-vitals.toml");
        std::fs::write(&config_path, "").unwrap();
        let config_str = config_path.to_string_lossy().to_string();

        let args = parse(&[
            "-c",
            &config_str,
            "check",
            &server.url(),
            "--format",
            "json",
        ]);
        let err = CheckCommand.execute(&args).await.unwrap_err();
        assert!(err.to_string().contains("1 / 1"));

        let args = parse(&[
            "-c",
            &config_str,
            "check",
            &server.url(),
            "--threshold-ms",
            "20000",
        ]);
        assert!(CheckCommand.execute(&args).await.is_ok());
    }
}
