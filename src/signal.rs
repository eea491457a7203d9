//! 信号处理模块
//!
//! 把 SIGINT / SIGTERM / Ctrl+C 转换为验证器使用的广播关闭信号

use crate::error::Result;
use tokio::sync::broadcast;
use tracing::{error, info};

#[cfg(unix)]
use signal_hook::consts::{SIGINT, SIGTERM};
#[cfg(unix)]
use signal_hook_tokio::Signals;

/// 设置信号处理器，收到终止信号时向 `shutdown_tx` 发送关闭信号
pub async fn setup_signal_handlers(shutdown_tx: broadcast::Sender<()>) -> Result<()> {
    #[cfg(unix)]
    {
        setup_unix_signals(shutdown_tx).await
    }
    #[cfg(not(unix))]
    {
        setup_ctrl_c(shutdown_tx);
        Ok(())
    }
}

/// Unix/Linux系统信号处理
#[cfg(unix)]
async fn setup_unix_signals(shutdown_tx: broadcast::Sender<()>) -> Result<()> {
    use futures::stream::StreamExt;

    let mut signals = Signals::new([SIGINT, SIGTERM])?;
    let handle = signals.handle();

    tokio::spawn(async move {
        if let Some(signal) = signals.next().await {
            let name = match signal {
                SIGINT => "SIGINT",
                SIGTERM => "SIGTERM",
                _ => "未知信号",
            };
            info!("接收到 {} 信号，开始优雅关闭...", name);
            if let Err(e) = shutdown_tx.send(()) {
                error!("发送关闭信号失败: {e}");
            }
        }
        handle.close();
    });

    Ok(())
}

#[cfg(not(unix))]
fn setup_ctrl_c(shutdown_tx: broadcast::Sender<()>) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("接收到 Ctrl+C，开始优雅关闭...");
                if let Err(e) = shutdown_tx.send(()) {
                    error!("发送关闭信号失败: {e}");
                }
            }
            Err(e) => error!("监听中断信号失败: {e}"),
        }
    });
}
