//! 日志系统模块
//!
//! 提供结构化日志配置和验证器事件日志

use crate::health::{EventKind, FleetEvent, TargetEvent};
use log::LevelFilter;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, OnceLock};
use tracing_subscriber::{fmt, prelude::*, registry, EnvFilter, Layer};

/// 全局日志初始化状态
#[derive(Debug, Default)]
struct GlobalLoggingState {
    /// 是否已初始化
    initialized: bool,
    /// 初始化失败时的错误信息
    init_error: Option<String>,
    /// 当前配置
    current_config: Option<LogConfig>,
}

/// 全局日志状态管理器
static GLOBAL_LOGGING_STATE: OnceLock<Mutex<GlobalLoggingState>> = OnceLock::new();

fn global_state() -> MutexGuard<'static, GlobalLoggingState> {
    GLOBAL_LOGGING_STATE
        .get_or_init(|| Mutex::new(GlobalLoggingState::default()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// 日志配置结构
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// 日志级别
    pub level: LevelFilter,
    /// 日志文件路径（为空时输出到控制台）
    pub file_path: Option<PathBuf>,
    /// 是否使用JSON格式
    pub json_format: bool,
    /// 模块级别日志控制
    pub module_levels: HashMap<String, LevelFilter>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LevelFilter::Info,
            file_path: None,
            json_format: false,
            module_levels: HashMap::new(),
        }
    }
}

/// 日志系统管理器
#[derive(Debug, Clone)]
pub struct LoggingSystem {
    config: LogConfig,
}

impl LoggingSystem {
    pub fn new(config: LogConfig) -> Self {
        Self { config }
    }

    /// 初始化日志系统
    ///
    /// 全局只初始化一次，重复调用返回新的 `LoggingSystem` 实例
    pub fn setup_logging(config: LogConfig) -> anyhow::Result<Self> {
        Self::setup_logging_with_options(config, false)
    }

    /// 初始化日志系统（带选项）
    ///
    /// # 参数
    /// * `config` - 日志配置
    /// * `force_reinit` - 是否强制重新初始化（主要用于测试）
    pub fn setup_logging_with_options(
        config: LogConfig,
        force_reinit: bool,
    ) -> anyhow::Result<Self> {
        {
            let state = global_state();
            if state.initialized && !force_reinit {
                if let Some(e) = &state.init_error {
                    return Err(anyhow::anyhow!("日志系统之前初始化失败: {}", e));
                }
                return Ok(Self::new(config));
            }
        }

        let init_result = Self::perform_initialization(&config);

        {
            let mut state = global_state();
            state.initialized = true;
            state.current_config = Some(config.clone());
            state.init_error = init_result.as_ref().err().map(|e| e.to_string());
        }

        init_result?;
        Ok(Self::new(config))
    }

    /// 执行实际的日志系统初始化
    fn perform_initialization(config: &LogConfig) -> anyhow::Result<()> {
        // log crate 到 tracing 的桥接
        Self::init_log_tracer()?;
        Self::init_tracing_subscriber(config)
    }

    fn init_log_tracer() -> anyhow::Result<()> {
        use tracing_log::LogTracer;

        static LOG_TRACER_INIT: OnceLock<Result<(), String>> = OnceLock::new();

        LOG_TRACER_INIT
            .get_or_init(|| LogTracer::init().map_err(|e| e.to_string()))
            .as_ref()
            .map_err(|e| anyhow::anyhow!("LogTracer初始化失败: {}", e))?;
        Ok(())
    }

    fn init_tracing_subscriber(config: &LogConfig) -> anyhow::Result<()> {
        let mut env_filter = EnvFilter::from_default_env()
            .add_directive(Self::convert_level_to_directive(config.level));

        for (module, level) in &config.module_levels {
            match format!("{}={}", module, Self::level_to_string(*level)).parse() {
                Ok(directive) => env_filter = env_filter.add_directive(directive),
                Err(e) => return Err(anyhow::anyhow!("无效的模块日志级别 {}: {}", module, e)),
            }
        }

        let result = if let Some(file_path) = &config.file_path {
            let file = std::fs::File::create(file_path)
                .map_err(|e| anyhow::anyhow!("创建日志文件失败: {}", e))?;
            let file_layer = if config.json_format {
                fmt::layer()
                    .json()
                    .with_writer(file)
                    .with_timer(fmt::time::ChronoUtc::rfc_3339())
                    .boxed()
            } else {
                fmt::layer()
                    .with_writer(file)
                    .with_ansi(false)
                    .with_timer(fmt::time::ChronoUtc::rfc_3339())
                    .with_file(true)
                    .with_line_number(true)
                    .boxed()
            };
            registry().with(env_filter).with(file_layer).try_init()
        } else {
            // 控制台日志写到stderr，stdout留给命令输出
            let fmt_layer = if config.json_format {
                fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_timer(fmt::time::ChronoUtc::rfc_3339())
                    .with_file(true)
                    .with_line_number(true)
                    .boxed()
            } else {
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_timer(fmt::time::ChronoUtc::rfc_3339())
                    .with_ansi(true)
                    .with_target(false)
                    .with_thread_names(true)
                    .boxed()
            };
            registry().with(env_filter).with(fmt_layer).try_init()
        };

        match result {
            Ok(()) => {
                tracing::debug!("日志系统初始化完成: {:?}", config);
                Ok(())
            }
            Err(e) => {
                let error_msg = e.to_string();
                if error_msg.contains("a global default trace dispatcher has already been set") {
                    // 测试中可能已经被其他用例初始化
                    tracing::debug!("日志系统已经初始化过了");
                    Ok(())
                } else {
                    Err(anyhow::anyhow!(
                        "tracing subscriber初始化失败: {}",
                        error_msg
                    ))
                }
            }
        }
    }

    fn convert_level_to_directive(level: LevelFilter) -> tracing_subscriber::filter::Directive {
        use tracing_subscriber::filter::{Directive, LevelFilter as TracingLevel};
        match level {
            LevelFilter::Off => Directive::from(TracingLevel::OFF),
            LevelFilter::Error => Directive::from(tracing::Level::ERROR),
            LevelFilter::Warn => Directive::from(tracing::Level::WARN),
            LevelFilter::Info => Directive::from(tracing::Level::INFO),
            LevelFilter::Debug => Directive::from(tracing::Level::DEBUG),
            LevelFilter::Trace => Directive::from(tracing::Level::TRACE),
        }
    }

    fn level_to_string(level: LevelFilter) -> &'static str {
        match level {
            LevelFilter::Off => "off",
            LevelFilter::Error => "error",
            LevelFilter::Warn => "warn",
            LevelFilter::Info => "info",
            LevelFilter::Debug => "debug",
            LevelFilter::Trace => "trace",
        }
    }

    /// 检查日志系统是否已初始化
    pub fn is_initialized() -> bool {
        global_state().initialized
    }

    /// 获取当前日志配置（如果已初始化）
    pub fn current_config() -> Option<LogConfig> {
        global_state().current_config.clone()
    }

    /// 重置日志系统状态（主要用于测试）
    #[cfg(test)]
    pub fn reset_for_testing() {
        *global_state() = GlobalLoggingState::default();
    }

    /// 记录集群验证器事件
    pub fn fleet_event_log(&self, event: &FleetEvent) {
        match event {
            FleetEvent::Target(event) => self.target_event_log(event),
            FleetEvent::DiscoveryFailed { tick, error } => {
                if self.config.json_format {
                    tracing::error!(tick, error = %error, "discovery_failed");
                } else {
                    tracing::error!("DISCOVERY: tick {} 获取目标列表失败: {}", tick, error);
                }
            }
        }
    }

    /// 记录目标事件，边沿事件按严重程度分级，原始结果为debug级别
    pub fn target_event_log(&self, event: &TargetEvent) {
        let target = event.target.as_str();
        let tick = event.tick;

        if self.config.json_format {
            match &event.kind {
                EventKind::StartedFailing { detail } => {
                    tracing::warn!(target_name = target, tick, detail = ?detail, "started_failing")
                }
                EventKind::Down { detail } => {
                    tracing::error!(target_name = target, tick, detail = ?detail, "down")
                }
                EventKind::Recovered => tracing::info!(target_name = target, tick, "recovered"),
                EventKind::CheckCompleted { result } => tracing::debug!(
                    target_name = target,
                    tick,
                    healthy = result.healthy,
                    response_time_ms = result.response_time_ms(),
                    detail = ?result.detail,
                    "check_completed"
                ),
            }
            return;
        }

        match &event.kind {
            EventKind::StartedFailing { detail } => tracing::warn!(
                "FAILING: {} 检测失败，进入宽限期: {}",
                target,
                detail.as_deref().unwrap_or("N/A")
            ),
            EventKind::Down { detail } => tracing::error!(
                "DOWN: {} 持续失败超过宽限期: {}",
                target,
                detail.as_deref().unwrap_or("N/A")
            ),
            EventKind::Recovered => tracing::info!("RECOVERED: {} 已恢复", target),
            EventKind::CheckCompleted { result } => tracing::debug!(
                "CHECK: {} tick {} - {} ({}ms) {}",
                target,
                tick,
                if result.healthy { "healthy" } else { "unhealthy" },
                result.response_time_ms(),
                result.detail.as_deref().unwrap_or("")
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::{CheckResult, TargetName};
    use serial_test::serial;
    use tokio::time::Instant;

    #[test]
    #[serial]
    fn test_logging_system_single_initialization() {
        LoggingSystem::reset_for_testing();

        let config = LogConfig::default();
        assert!(LoggingSystem::setup_logging(config.clone()).is_ok());
        assert!(LoggingSystem::is_initialized());

        // 重复初始化不会报错
        assert!(LoggingSystem::setup_logging(config).is_ok());
    }

    #[test]
    #[serial]
    fn test_current_config_retrieval() {
        LoggingSystem::reset_for_testing();

        let config = LogConfig {
            level: LevelFilter::Debug,
            json_format: true,
            ..Default::default()
        };
        LoggingSystem::setup_logging_with_options(config, true).unwrap();

        let current = LoggingSystem::current_config().unwrap();
        assert_eq!(current.level, LevelFilter::Debug);
        assert!(current.json_format);
    }

    #[test]
    #[serial]
    fn test_reset_clears_state() {
        LoggingSystem::setup_logging(LogConfig::default()).unwrap();
        LoggingSystem::reset_for_testing();

        assert!(!LoggingSystem::is_initialized());
        assert!(LoggingSystem::current_config().is_none());
    }

    #[test]
    fn test_level_to_string() {
        assert_eq!(LoggingSystem::level_to_string(LevelFilter::Warn), "warn");
        assert_eq!(LoggingSystem::level_to_string(LevelFilter::Off), "off");
    }

    #[test]
    fn test_event_logging_does_not_panic() {
        let event = TargetEvent {
            target: TargetName::from("tm-01"),
            tick: 1,
            kind: EventKind::CheckCompleted {
                result: CheckResult::unhealthy(Instant::now(), "stale"),
            },
        };

        for json_format in [false, true] {
            let system = LoggingSystem::new(LogConfig {
                json_format,
                ..Default::default()
            });
            system.target_event_log(&event);
            system.fleet_event_log(&FleetEvent::DiscoveryFailed {
                tick: 2,
                error: "timeout".to_string(),
            });
        }
    }
}
