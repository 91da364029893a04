//! 同步日志 - 记录每个成功执行的动作
//!
//! 纯文本、按行追加。文件创建时第一行为 [`LOG_HEADER`]，之后每行是
//! `Copied: <src> -> <dst>` 或 `Removed: <dst>`。

use crate::error::SyncError;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

/// 日志文件首行
pub const LOG_HEADER: &str = "Synchronization Log";

/// 一条日志记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogEntry {
    Copied { source: PathBuf, replica: PathBuf },
    Removed { replica: PathBuf },
}

impl std::fmt::Display for LogEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogEntry::Copied { source, replica } => {
                write!(f, "Copied: {} -> {}", source.display(), replica.display())
            }
            LogEntry::Removed { replica } => write!(f, "Removed: {}", replica.display()),
        }
    }
}

/// 日志输出选项
#[derive(Debug, Clone, Copy)]
pub struct SyncLogOptions {
    /// 同时输出到标准输出
    pub echo: bool,
    /// 每行加 RFC 3339 时间戳前缀
    pub timestamps: bool,
}

impl Default for SyncLogOptions {
    fn default() -> Self {
        Self {
            echo: true,
            timestamps: false,
        }
    }
}

/// 同步日志写入器
///
/// 每轮同步打开一次，结束时调用 [`SyncLog::finish`] 刷新。
/// 即使中途有条目失败，drop 时 `BufWriter` 也会刷新。
pub struct SyncLog<W: Write> {
    writer: W,
    options: SyncLogOptions,
    entries_written: u64,
}

impl SyncLog<BufWriter<File>> {
    /// 以追加模式打开日志文件，不存在时先写入首行
    pub fn open(path: &Path, options: SyncLogOptions) -> Result<Self, SyncError> {
        ensure_log_file(path)?;
        let file = OpenOptions::new()
            .append(true)
            .open(path)
            .map_err(|source| SyncError::LogFile {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(Self::new(BufWriter::new(file), options))
    }
}

impl<W: Write> SyncLog<W> {
    pub fn new(writer: W, options: SyncLogOptions) -> Self {
        Self {
            writer,
            options,
            entries_written: 0,
        }
    }

    /// 记录一个已完成的动作：先输出到标准输出，再写入日志文件
    pub fn record(&mut self, entry: &LogEntry) -> io::Result<()> {
        let line = entry.to_string();

        if self.options.echo {
            println!("{}", line);
        }

        if self.options.timestamps {
            let now = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
            writeln!(self.writer, "[{}] {}", now, line)?;
        } else {
            writeln!(self.writer, "{}", line)?;
        }

        self.entries_written += 1;
        Ok(())
    }

    pub fn entries_written(&self) -> u64 {
        self.entries_written
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }

    /// 刷新并取回底层写入器
    pub fn finish(mut self) -> io::Result<W> {
        self.writer.flush()?;
        Ok(self.writer)
    }
}

/// 日志文件不存在时创建并写入首行，返回是否新建
pub fn ensure_log_file(path: &Path) -> Result<bool, SyncError> {
    let to_err = |source: io::Error| SyncError::LogFile {
        path: path.to_path_buf(),
        source,
    };

    match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(mut file) => {
            writeln!(file, "{}", LOG_HEADER).map_err(to_err)?;
            tracing::info!("已创建同步日志: {}", path.display());
            Ok(true)
        }
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(to_err(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn quiet() -> SyncLogOptions {
        SyncLogOptions {
            echo: false,
            timestamps: false,
        }
    }

    #[test]
    fn test_entry_format() {
        let copied = LogEntry::Copied {
            source: PathBuf::from("src/a.txt"),
            replica: PathBuf::from("dst/a.txt"),
        };
        let removed = LogEntry::Removed {
            replica: PathBuf::from("dst/b.txt"),
        };

        assert_eq!(copied.to_string(), "Copied: src/a.txt -> dst/a.txt");
        assert_eq!(removed.to_string(), "Removed: dst/b.txt");
    }

    #[test]
    fn test_open_creates_header_once() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sync.log");

        assert!(ensure_log_file(&path).unwrap());
        assert!(!ensure_log_file(&path).unwrap());

        {
            let mut log = SyncLog::open(&path, quiet()).unwrap();
            log.record(&LogEntry::Removed {
                replica: PathBuf::from("r/old.txt"),
            })
            .unwrap();
            log.finish().unwrap();
        }
        {
            let log = SyncLog::open(&path, quiet()).unwrap();
            log.finish().unwrap();
        }

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "Synchronization Log\nRemoved: r/old.txt\n");
    }

    #[test]
    fn test_existing_log_is_appended_not_truncated() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sync.log");
        std::fs::write(&path, "Synchronization Log\nCopied: a -> b\n").unwrap();

        let mut log = SyncLog::open(&path, quiet()).unwrap();
        log.record(&LogEntry::Removed {
            replica: PathBuf::from("b"),
        })
        .unwrap();
        assert_eq!(log.entries_written(), 1);
        drop(log);

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 3);
        assert!(content.ends_with("Removed: b\n"));
    }

    #[test]
    fn test_timestamp_prefix() {
        let mut log = SyncLog::new(
            Vec::new(),
            SyncLogOptions {
                echo: false,
                timestamps: true,
            },
        );
        log.record(&LogEntry::Removed {
            replica: PathBuf::from("x"),
        })
        .unwrap();

        let out = String::from_utf8(log.finish().unwrap()).unwrap();
        assert!(out.starts_with('['));
        assert!(out.trim_end().ends_with("] Removed: x"));
    }

    #[test]
    fn test_open_in_missing_dir_fails() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing").join("sync.log");
        let err = SyncLog::open(&path, quiet()).err().unwrap();
        assert!(matches!(err, SyncError::LogFile { .. }));
    }
}
