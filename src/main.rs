//! Peer Vitals 主程序入口
//!
//! 监控集群对等轮询健康验证工具

use anyhow::{Context, Result};
use clap::Parser;
use peer_vitals::cli::args::{Args, Commands};
use peer_vitals::cli::commands::{
    load_config, log_config, CheckCommand, Command, InitCommand, ValidateCommand,
    VersionCommand, WatchCommand, WatchFleetCommand,
};
use peer_vitals::logging::LoggingSystem;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    // 解析命令行参数
    let args = Args::parse();

    // 初始化日志系统；配置文件有误时由具体命令报告，这里先按默认配置初始化
    let config = load_config(&args).await.unwrap_or_default();
    let log_config = log_config(&args, &config);

    let _logging_system = LoggingSystem::setup_logging(log_config).context("初始化日志系统失败")?;

    info!("Peer Vitals v{} 启动", peer_vitals::VERSION);

    // 执行命令
    if let Err(e) = execute_command(&args).await {
        error!("命令执行失败: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}

/// 执行CLI命令
async fn execute_command(args: &Args) -> Result<()> {
    let command: Box<dyn Command> = match &args.command {
        Commands::Watch { .. } => Box::new(WatchCommand),
        Commands::WatchFleet { .. } => Box::new(WatchFleetCommand),
        Commands::Check { .. } => Box::new(CheckCommand),
        Commands::Init { .. } => Box::new(InitCommand),
        Commands::Validate { .. } => Box::new(ValidateCommand),
        Commands::Version { .. } => Box::new(VersionCommand),
    };

    command.execute(args).await.map_err(|e| anyhow::anyhow!(e))
}
