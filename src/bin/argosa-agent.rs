//! Argosa agent 命令行入口
//!
//! 启动 agent 的全部定时任务，直到收到 Ctrl-C 或运行时长到期。
//! 旁路命令通过收件目录投递：每个文件一行 URL，读取后立即删除。

use anyhow::{Context, Result};
use argosa_agent::{Agent, AgentConfig, AgentListener, Platform};
use async_trait::async_trait;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::info;

/// Argosa 数据采集 agent
#[derive(Parser, Debug)]
#[command(name = "argosa-agent")]
#[command(about = "Argosa 数据采集 agent - 连接后端、执行命令并上报采集结果", long_about = None)]
struct Args {
    /// 后端 API 基础地址
    #[arg(
        long,
        env = "ARGOSA_API_BASE_URL",
        default_value = "http://localhost:8000/api/argosa"
    )]
    api_base_url: String,

    /// 本地 SQLite 数据库 URL
    #[arg(
        long,
        env = "ARGOSA_DB_URL",
        default_value = "sqlite://argosa-agent.db?mode=rwc"
    )]
    db_url: String,

    /// 旁路命令收件目录（不指定则不监听）
    #[arg(long, env = "ARGOSA_INBOX_DIR")]
    inbox_dir: Option<PathBuf>,

    /// 自动采集的平台，逗号分隔
    #[arg(long, env = "ARGOSA_AUTO_PLATFORMS", value_delimiter = ',')]
    auto_platforms: Vec<String>,

    /// 运行时长（秒），0 表示持续运行
    #[arg(short, long, default_value = "0")]
    duration: u64,

    /// 日志级别（RUST_LOG 优先）
    #[arg(long, default_value = "info,argosa_agent=debug")]
    log_level: String,

    /// 日志文件
    #[arg(long, default_value = "argosa-agent.log")]
    log_file: PathBuf,
}

/// 初始化日志（同时输出到 stdout 和文件）
fn init_logger(log_level: &str, log_file: &PathBuf) -> Result<()> {
    use std::fs::OpenOptions;
    use std::io;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let filter_layer =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file)
        .context(format!("无法创建日志文件 {}", log_file.display()))?;

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stdout)
        .with_file(true)
        .with_line_number(true)
        .with_target(false)
        .with_ansi(true);

    // 文件不需要颜色
    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(file)
        .with_file(true)
        .with_line_number(true)
        .with_target(false)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(stdout_layer)
        .with(file_layer)
        .init();

    info!(
        "[CLI] 📝 日志已同时输出到控制台和文件: {}",
        log_file.display()
    );
    Ok(())
}

/// 把 agent 事件打印到日志
struct LoggingListener;

#[async_trait]
impl AgentListener for LoggingListener {
    async fn on_mode_changed(&self, connected: bool) {
        info!(
            "[CLI] 🔌 模式变化: {}",
            if connected { "connected" } else { "standalone" }
        );
    }

    async fn on_session_changed(&self, platform: Platform, valid: bool) {
        info!("[CLI] 🔐 会话变化: {} valid={}", platform, valid);
    }

    async fn on_sync_progress(&self, run_json: String) {
        info!("[CLI] 📊 同步进度: {}", run_json);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logger(&args.log_level, &args.log_file)?;

    info!("[CLI] 🚀 启动 Argosa agent");
    info!("[CLI] 🌐 后端地址: {}", args.api_base_url);
    info!("[CLI] 💾 数据库: {}", args.db_url);
    info!("[CLI] ⏱️  运行时长: {} 秒（0=持续运行）", args.duration);

    let mut config = AgentConfig::new(args.api_base_url, args.db_url);
    config.inbox_dir = args.inbox_dir;
    if !args.auto_platforms.is_empty() {
        config.auto_collect_platforms =
            Platform::parse_list(&args.auto_platforms).context("解析自动采集平台失败")?;
    }

    // 命令行入口不内置任何平台采集实现，由嵌入方通过 builder 注册
    let agent = Agent::builder(config)
        .listener(Arc::new(LoggingListener))
        .build()
        .await?;
    let handle = agent.start().await;

    if args.duration > 0 {
        info!("[CLI] ⏰ {} 秒后自动退出", args.duration);
        tokio::select! {
            _ = sleep(Duration::from_secs(args.duration)) => {}
            _ = tokio::signal::ctrl_c() => info!("[CLI] 收到 Ctrl-C"),
        }
    } else {
        tokio::signal::ctrl_c()
            .await
            .context("监听 Ctrl-C 失败")?;
        info!("[CLI] 收到 Ctrl-C");
    }

    handle.shutdown().await;
    info!("[CLI] 👋 已退出");
    Ok(())
}
