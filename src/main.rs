use clap::Parser;
use foldersync_lib::logging::{LogConfig, SizeRotatingWriter};
use foldersync_lib::{validate_interval, AppConfig, Scheduler, SyncEngine, SyncError};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// 定期将源目录单向镜像到副本目录
#[derive(Debug, Parser)]
#[command(name = "foldersync", version, about)]
struct Cli {
    /// 源目录
    source_folder: PathBuf,

    /// 副本目录（不存在时自动创建）
    replica_folder: PathBuf,

    /// 同步日志文件
    log_file: PathBuf,

    /// 同步间隔（秒）
    #[arg(allow_negative_numbers = true)]
    interval: i64,

    /// 只执行一轮同步
    #[arg(long)]
    once: bool,

    /// 大小相同时总是比较文件哈希
    #[arg(long)]
    checksum: bool,

    /// 同步日志每行加时间戳
    #[arg(long)]
    timestamps: bool,

    /// JSON 配置文件
    #[arg(long)]
    config: Option<PathBuf>,

    /// 结束时以 JSON 输出最后一轮的报告
    #[arg(long)]
    json: bool,

    /// 诊断输出级别（-v, -vv）
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// 不在标准输出显示同步动作
    #[arg(short, long)]
    quiet: bool,
}

/// 初始化日志系统
fn init_logging(config: &LogConfig, verbose: u8) {
    if !config.enabled {
        // 日志已禁用，只初始化一个空的 subscriber
        let _ = tracing::subscriber::set_global_default(tracing_subscriber::registry());
        return;
    }

    let level = match verbose {
        0 => config.tracing_level(),
        1 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    let env_filter =
        EnvFilter::from_default_env().add_directive(LevelFilter::from_level(level).into());

    // 标准输出留给同步动作，诊断信息写到 stderr
    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false);

    let file_layer = config.dir.as_ref().and_then(|dir| {
        match SizeRotatingWriter::new(dir, config.max_size_mb) {
            Ok(writer) => Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_target(false),
            ),
            Err(e) => {
                eprintln!("无法创建诊断日志文件 {}: {}", dir.display(), e);
                None
            }
        }
    });

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer);

    let _ = tracing::subscriber::set_global_default(subscriber);
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = match &cli.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::default(),
    };

    // 命令行参数覆盖配置文件
    if cli.checksum {
        config.compare.checksum = true;
    }
    if cli.timestamps {
        config.sync_log.timestamps = true;
    }
    if cli.quiet || cli.json {
        config.sync_log.echo = false;
    }

    init_logging(&config.log, cli.verbose);

    let interval = validate_interval(cli.interval)?;

    let engine = SyncEngine::local(
        &cli.source_folder,
        &cli.replica_folder,
        config.compare.to_compare_config(),
    );

    let mut scheduler = Scheduler::new(engine, &cli.log_file, interval)
        .with_log_options(config.sync_log.to_options());
    if cli.once {
        scheduler = scheduler.with_max_passes(1);
    }

    let report = scheduler.run().await?;

    if cli.json {
        if let Some(report) = report {
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            let code = e
                .downcast_ref::<SyncError>()
                .map(SyncError::exit_code)
                .unwrap_or(1);
            ExitCode::from(code as u8)
        }
    }
}
