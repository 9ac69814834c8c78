use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::signal;
use tokio::sync::broadcast;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use workinator_core::AppConfig;

mod app;
mod demo;

use app::Application;

/// 分区租约调度系统
#[derive(Parser, Debug)]
#[command(name = "workinator")]
#[command(version = "1.0.0")]
#[command(about = "分区租约调度系统 - 运维命令行")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// 配置文件路径
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// 日志级别，覆盖配置文件
    #[arg(short, long, global = true, value_parser = ["trace", "debug", "info", "warn", "error"])]
    log_level: Option<String>,

    /// 日志格式，覆盖配置文件
    #[arg(long, global = true, value_parser = ["json", "pretty"])]
    log_format: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 创建分区
    CreatePartition {
        partition_key: String,
        /// 最大并发Worker数
        #[arg(long)]
        max_workers: Option<i32>,
        /// 释放后再次到期前的空闲秒数
        #[arg(long)]
        max_idle_seconds: Option<i64>,
    },
    /// 列出所有分区及其租约
    ListPartitions,
    /// 切换分区的 has_work 标记
    SetHasWork {
        partition_key: String,
        #[arg(action = clap::ArgAction::Set)]
        has_work: bool,
    },
    /// 列出最近上报的Worker状态
    ListWorkers,
    /// 以演示工作回调运行消费者，Ctrl+C 停止
    Run {
        /// 消费者ID，可重复指定；默认使用主机名
        #[arg(long = "consumer")]
        consumers: Vec<String>,
        /// 每个消费者的执行器数量
        #[arg(long)]
        executors: Option<usize>,
        /// 启动前确保存在的分区
        #[arg(long = "partition")]
        partitions: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load(cli.config.as_deref()).context("加载配置失败")?;
    let log_level = cli
        .log_level
        .as_deref()
        .unwrap_or(&config.observability.log_level)
        .to_string();
    let log_format = cli
        .log_format
        .as_deref()
        .unwrap_or(&config.observability.log_format)
        .to_string();
    init_logging(&log_level, &log_format)?;

    let app = Application::new(config).await?;
    app.init_metrics()?;

    let result = run_command(&app, cli.command).await;
    app.close().await;
    result
}

async fn run_command(app: &Application, command: Commands) -> Result<()> {
    match command {
        Commands::CreatePartition {
            partition_key,
            max_workers,
            max_idle_seconds,
        } => {
            app.create_partition(&partition_key, max_workers, max_idle_seconds)
                .await?;
            println!("分区 {partition_key} 已创建");
        }
        Commands::ListPartitions => {
            let partitions = app.list_partitions().await?;
            println!("{}", serde_json::to_string_pretty(&partitions)?);
        }
        Commands::SetHasWork {
            partition_key,
            has_work,
        } => {
            app.set_has_work(&partition_key, has_work).await?;
            println!("分区 {partition_key} has_work={has_work}");
        }
        Commands::ListWorkers => {
            let workers = app.list_workers().await?;
            println!("{}", serde_json::to_string_pretty(&workers)?);
        }
        Commands::Run {
            consumers,
            executors,
            partitions,
        } => {
            let consumers = if consumers.is_empty() {
                vec![default_consumer_id()]
            } else {
                consumers
            };

            let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
            let signal_task = tokio::spawn(async move {
                match wait_for_shutdown_signal().await {
                    Ok(()) => info!("收到关闭信号，开始优雅关闭..."),
                    Err(e) => tracing::error!("监听关闭信号失败: {e}"),
                }
                let _ = shutdown_tx.send(());
            });

            let result = app
                .run_consumers(&consumers, executors, &partitions, shutdown_rx)
                .await;
            signal_task.abort();
            result?;
            info!("所有消费者已停止");
        }
    }
    Ok(())
}

fn default_consumer_id() -> String {
    hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .unwrap_or_else(|| "workinator".to_string())
}

/// 初始化日志系统
fn init_logging(log_level: &str, log_format: &str) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(env_filter);

    match log_format {
        "json" => {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .try_init()
                .context("初始化JSON日志格式失败")?;
        }
        "pretty" => {
            registry
                .with(tracing_subscriber::fmt::layer().pretty())
                .try_init()
                .context("初始化Pretty日志格式失败")?;
        }
        _ => {
            return Err(anyhow::anyhow!("不支持的日志格式: {log_format}"));
        }
    }

    Ok(())
}

/// 等待 Ctrl+C 或 SIGTERM
async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())
            .context("安装SIGTERM信号处理器失败")?;
        tokio::select! {
            result = signal::ctrl_c() => result.context("安装Ctrl+C信号处理器失败")?,
            _ = terminate.recv() => info!("收到SIGTERM信号"),
        }
    }

    #[cfg(not(unix))]
    signal::ctrl_c().await.context("安装Ctrl+C信号处理器失败")?;

    Ok(())
}
