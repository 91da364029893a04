//! 定时同步调度

use crate::core::engine::{SyncEngine, SyncReport};
use crate::core::sync_log::{ensure_log_file, SyncLog, SyncLogOptions};
use crate::error::SyncError;
use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, info, warn};

/// 调度器：按固定间隔反复执行同步
///
/// 两轮之间严格串行，不会出现重叠的同步。
pub struct Scheduler {
    engine: SyncEngine,
    log_path: PathBuf,
    interval: Duration,
    log_options: SyncLogOptions,
    /// 最多执行的轮数，`None` 表示一直运行
    max_passes: Option<u64>,
}

impl Scheduler {
    pub fn new(engine: SyncEngine, log_path: impl Into<PathBuf>, interval: Duration) -> Self {
        Self {
            engine,
            log_path: log_path.into(),
            interval,
            log_options: SyncLogOptions::default(),
            max_passes: None,
        }
    }

    pub fn with_log_options(mut self, options: SyncLogOptions) -> Self {
        self.log_options = options;
        self
    }

    pub fn with_max_passes(mut self, passes: u64) -> Self {
        self.max_passes = Some(passes);
        self
    }

    pub fn engine(&self) -> &SyncEngine {
        &self.engine
    }

    /// 运行调度循环，返回最后一轮的报告
    ///
    /// 启动时源目录不存在立即返回 [`SyncError::SourceMissing`]；
    /// 之后某一轮源目录消失只会跳过该轮。
    pub async fn run(&self) -> Result<Option<SyncReport>, SyncError> {
        if self.interval.is_zero() {
            return Err(SyncError::ConfigInvalid("同步间隔必须大于 0".to_string()));
        }

        if !self.engine.source_available().await {
            let path = self.engine.source().root().to_path_buf();
            println!("Source folder '{}' does not exist.", path.display());
            return Err(SyncError::SourceMissing { path });
        }

        ensure_log_file(&self.log_path)?;

        let mut passes = 0u64;
        let mut last_report = None;

        loop {
            passes += 1;

            match self.run_pass().await {
                Ok(report) => last_report = Some(report),
                Err(e) if e.is_transient() => {
                    warn!("本轮同步跳过: {}", e);
                    println!("{}", e);
                }
                Err(e) => {
                    error!("同步终止: {}", e);
                    return Err(e);
                }
            }

            if self.max_passes.is_some_and(|max| passes >= max) {
                return Ok(last_report);
            }

            println!(
                "Synchronization completed. Waiting {} seconds for the next synchronization.",
                self.interval.as_secs()
            );

            if !self.wait_next(tokio::signal::ctrl_c()).await {
                return Ok(last_report);
            }
        }
    }

    /// 等待一个同步间隔，返回 `false` 表示收到中断信号
    ///
    /// 无法监听信号时只记录警告，仍然等满整个间隔。
    async fn wait_next<F>(&self, shutdown: F) -> bool
    where
        F: Future<Output = io::Result<()>>,
    {
        let deadline = Instant::now() + self.interval;

        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => true,
            result = shutdown => match result {
                Ok(()) => {
                    info!("收到中断信号，停止同步");
                    false
                }
                Err(e) => {
                    warn!("无法监听中断信号: {}", e);
                    tokio::time::sleep_until(deadline).await;
                    true
                }
            },
        }
    }

    /// 执行一轮同步：打开日志、同步、刷新并关闭日志
    pub async fn run_pass(&self) -> Result<SyncReport, SyncError> {
        let mut log = SyncLog::open(&self.log_path, self.log_options)?;
        let result = self.engine.synchronize(&mut log).await;

        // 无论本轮是否有条目失败，日志都要刷新
        if let Err(e) = log.finish() {
            warn!("刷新同步日志失败: {}", e);
        }

        let report = result?;
        if !report.is_clean() {
            warn!(
                "本轮同步有 {} 个条目失败，将在下一轮重试",
                report.errors.len()
            );
        }
        Ok(report)
    }
}
