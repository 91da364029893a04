//! 错误类型

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// 同步过程中的致命错误
///
/// 单个条目的失败不会出现在这里，而是记录在
/// [`SyncReport::errors`](crate::core::SyncReport) 中，整轮同步继续进行。
#[derive(Debug, Error)]
pub enum SyncError {
    /// 源目录不存在（本轮跳过，下一轮重试）
    #[error("源目录不存在: {}", path.display())]
    SourceMissing { path: PathBuf },

    #[error("源路径不是目录: {}", path.display())]
    SourceNotDirectory { path: PathBuf },

    /// 副本根目录不可用（不是目录或无法创建）
    #[error("副本目录不可用: {}: {source}", path.display())]
    ReplicaUnavailable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// 源目录与副本目录相互包含
    #[error(
        "源目录与副本目录重叠: {} <-> {}",
        source_root.display(),
        replica_root.display()
    )]
    Overlap {
        source_root: PathBuf,
        replica_root: PathBuf,
    },

    #[error("配置无效: {0}")]
    ConfigInvalid(String),

    #[error("无法打开同步日志 {}: {source}", path.display())]
    LogFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl SyncError {
    /// 是否只影响当前这一轮（下一轮可能自行恢复）
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SyncError::SourceMissing { .. }
                | SyncError::SourceNotDirectory { .. }
                | SyncError::ReplicaUnavailable { .. }
                | SyncError::LogFile { .. }
                | SyncError::Io(_)
        )
    }

    /// 进程退出码
    pub fn exit_code(&self) -> i32 {
        match self {
            SyncError::ConfigInvalid(_) => 2,
            _ => 1,
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
