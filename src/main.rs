use anyhow::Context;
use remotesync_lib::config::SourceConfig;
use remotesync_lib::logging::{default_config_dir, init_logging, LogConfig};
use remotesync_lib::{FileInfo, SynchronizingSource};
use std::path::PathBuf;
use std::time::Duration;
use tokio_stream::StreamExt;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 第一个参数为配置目录
    let config_dir = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(default_config_dir);

    let log_config = LogConfig::load(&config_dir);
    init_logging(&config_dir, &log_config);

    let config = SourceConfig::load(&config_dir)
        .with_context(|| format!("加载配置失败: {:?}", config_dir))?;

    let mut source = SynchronizingSource::<FileInfo>::from_config(&config)
        .await
        .context("初始化同步源失败")?;
    source.start().await.context("启动同步源失败")?;

    let (poller, mut files) =
        source.spawn_poller(Duration::from_secs(config.poll_interval_secs.max(1)), 1);

    loop {
        tokio::select! {
            file = files.next() => match file {
                Some(file) => info!("新文件: {:?} ({} 字节)", file.path, file.size),
                None => {
                    error!("轮询任务已退出");
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("收到退出信号，正在停止...");
                break;
            }
        }
    }

    poller.shutdown().await.context("停止轮询任务失败")?;
    info!("已退出");
    Ok(())
}
