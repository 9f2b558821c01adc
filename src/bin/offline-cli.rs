//! 离线数据层 CLI
//!
//! 非交互式 CLI，用于演示和排查离线队列、缓存与同步行为。
//! `sync`、`preload` 与 `run` 假定网络可用。

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use events_offline_sdk::offline::listener::OfflineListener;
use events_offline_sdk::{CacheStats, OfflineClient, OfflineConfig, SyncStatus};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{error, info, warn};

/// 离线数据层 CLI
#[derive(Parser, Debug)]
#[command(name = "offline-cli")]
#[command(about = "活动应用离线数据层 CLI - 队列、缓存与同步", long_about = None)]
struct Args {
    /// TOML 配置文件路径（缺省使用默认配置）
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// 覆盖 API 基础地址
    #[arg(long)]
    api_base_url: Option<String>,

    /// 覆盖本地数据库 URL
    #[arg(long)]
    db_url: Option<String>,

    /// 覆盖认证 token
    #[arg(long)]
    token: Option<String>,

    /// 日志级别（默认: info,events_offline_sdk=debug）
    #[arg(long, default_value = "info,events_offline_sdk=debug")]
    log_level: String,

    /// 额外写入的日志文件（追加模式）
    #[arg(long)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 点赞（或取消点赞）一个活动
    Like {
        event_id: String,
        #[arg(long)]
        unlike: bool,
    },
    /// 收藏一个活动
    Save { event_id: String },
    /// 保存一条搜索
    Search { query: String },
    /// 列出待同步变更
    Pending,
    /// 立即执行一轮同步
    Sync,
    /// 预加载热门活动
    Preload,
    /// 刷新并打印缓存统计
    Stats,
    /// 清空全部本地数据（包括未同步的变更）
    Clear,
    /// 启动后台调度并持续运行
    Run {
        /// 运行时长（秒），0 表示持续运行直到 Ctrl+C
        #[arg(short, long, default_value = "0")]
        duration: u64,
    },
}

/// 初始化日志（输出到 stdout，可选同时输出到文件）
fn init_logger(log_level: &str, log_file: Option<&PathBuf>) -> Result<()> {
    use std::fs::OpenOptions;
    use std::io;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    // 优先使用环境变量 RUST_LOG（如果设置了），否则使用命令行参数
    let filter_layer =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stdout)
        .with_file(true)
        .with_line_number(true)
        .with_target(false)
        .with_ansi(true);

    // 文件不需要颜色
    let file_layer = match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("无法创建日志文件 {}", path.display()))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(file)
                    .with_file(true)
                    .with_line_number(true)
                    .with_target(false)
                    .with_ansi(false),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(stdout_layer)
        .with(file_layer)
        .init();

    if let Some(path) = log_file {
        info!("[CLI] 📝 日志已同时输出到控制台和文件: {}", path.display());
    }
    Ok(())
}

fn load_config(args: &Args) -> Result<OfflineConfig> {
    let mut config = match &args.config {
        Some(path) => OfflineConfig::load(path)
            .with_context(|| format!("读取配置文件失败: {}", path.display()))?,
        None => OfflineConfig::default(),
    };
    if let Some(url) = &args.api_base_url {
        config.api_base_url = url.clone();
    }
    if let Some(url) = &args.db_url {
        config.db_url = url.clone();
    }
    if let Some(token) = &args.token {
        config.token = token.clone();
    }
    config.validate().context("配置无效")?;
    Ok(config)
}

/// 打印统计与同步状态
struct CliOfflineListener;

#[async_trait::async_trait]
impl OfflineListener for CliOfflineListener {
    async fn on_cache_stats_updated(&self, stats: CacheStats) {
        info!(
            "[CLI/Cache] 📊 活动: {} | 图片: {} | 用户数据: {} | 待同步: {} | 总大小: {} 字节",
            stats.events, stats.images, stats.user_data, stats.pending_changes, stats.total_size
        );
    }

    async fn on_sync_status_changed(&self, status: SyncStatus) {
        if status.sync_errors.is_empty() {
            info!(
                "[CLI/Sync] ✅ 同步结束，剩余待同步: {}",
                status.pending_changes
            );
        } else {
            warn!(
                "[CLI/Sync] ⚠️ 同步结束，失败 {} 条，剩余待同步: {}",
                status.sync_errors.len(),
                status.pending_changes
            );
            for failure in &status.sync_errors {
                warn!(
                    "[CLI/Sync]   #{} ({}) {}",
                    failure.change_id, failure.change_type, failure.message
                );
            }
        }
    }
}

async fn run(client: &OfflineClient, duration: u64) -> Result<()> {
    client.set_online(true);
    client.start().await.context("启动调度失败")?;

    info!("[CLI] 📥 调度已启动");
    if duration > 0 {
        info!("[CLI] ⏰ {} 秒后自动退出", duration);
        sleep(Duration::from_secs(duration)).await;
    } else {
        info!("[CLI] ⏰ 持续运行中，按 Ctrl+C 退出");
        tokio::signal::ctrl_c()
            .await
            .context("等待 Ctrl+C 信号失败")?;
    }

    client.shutdown();
    info!("[CLI] 👋 程序退出");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logger(&args.log_level, args.log_file.as_ref())?;

    let config = load_config(&args)?;
    info!("[CLI] 🚀 离线数据层 CLI");
    info!("[CLI] 💾 数据库: {}", config.db_url);

    let client = OfflineClient::open(config)
        .await
        .context("打开离线数据层失败")?;
    client.set_listener(Arc::new(CliOfflineListener));

    match args.command {
        Command::Like { event_id, unlike } => {
            let change = client.like_event(&event_id, !unlike).await?;
            info!("[CLI] ✅ 已入队 #{} ({})", change.id, change.change_type);
        }
        Command::Save { event_id } => {
            let change = client.save_event(&event_id).await?;
            info!("[CLI] ✅ 已入队 #{} ({})", change.id, change.change_type);
        }
        Command::Search { query } => {
            let change = client.save_search(&query).await?;
            info!("[CLI] ✅ 已入队 #{} ({})", change.id, change.change_type);
        }
        Command::Pending => {
            let pending = client.pending_changes().await?;
            info!("[CLI] 📋 待同步变更（共 {} 条）:", pending.len());
            for change in &pending {
                info!(
                    "[CLI]   #{} | {} | {} | {}",
                    change.id, change.change_type, change.timestamp, change.payload
                );
            }
        }
        Command::Sync => {
            client.set_online(true);
            let status = client.sync_now().await?;
            if !status.sync_errors.is_empty() {
                error!("[CLI] ❌ {} 条变更同步失败", status.sync_errors.len());
            }
        }
        Command::Preload => {
            client.set_online(true);
            let report = client.preload().await?;
            info!(
                "[CLI] ✅ 预加载完成 - 活动: {}, 图片: {}, 失败: {}",
                report.events_cached,
                report.images_cached,
                report.failures.len()
            );
        }
        Command::Stats => {
            client.refresh_stats().await?;
        }
        Command::Clear => {
            client.clear_cache().await?;
            info!("[CLI] 🗑️ 本地数据已清空");
        }
        Command::Run { duration } => run(&client, duration).await?,
    }

    Ok(())
}
