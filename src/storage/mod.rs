pub mod local;

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::ffi::OsString;
use std::fs::Permissions;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::io::AsyncRead;

pub use local::LocalStorage;

/// 读取端（流式复制用）
pub type FileReader = Box<dyn AsyncRead + Send + Unpin>;

/// 条目类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EntryKind {
    File,
    Dir,
}

impl std::fmt::Display for EntryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntryKind::File => write!(f, "file"),
            EntryKind::Dir => write!(f, "dir"),
        }
    }
}

/// 文件元数据
#[derive(Debug, Clone)]
pub struct FileMeta {
    pub kind: EntryKind,
    pub size: u64,
    pub modified: SystemTime,
    pub permissions: Permissions,
}

impl FileMeta {
    pub fn from_std(metadata: &std::fs::Metadata) -> io::Result<Self> {
        let kind = if metadata.is_dir() {
            EntryKind::Dir
        } else {
            EntryKind::File
        };
        Ok(Self {
            kind,
            size: if metadata.is_dir() { 0 } else { metadata.len() },
            modified: metadata.modified()?,
            permissions: metadata.permissions(),
        })
    }

    /// 修改时间（Unix 毫秒）
    pub fn modified_millis(&self) -> i64 {
        match self.modified.duration_since(UNIX_EPOCH) {
            Ok(d) => d.as_millis() as i64,
            Err(e) => -(e.duration().as_millis() as i64),
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Dir
    }
}

/// 单层目录列表
///
/// 只包含直接子条目。符号链接按目标类型归类；
/// 断开的链接、socket、FIFO、设备文件放入 `skipped`，同步时两侧都不处理。
#[derive(Debug, Clone, Default)]
pub struct DirectoryListing {
    pub files: BTreeMap<OsString, FileMeta>,
    pub dirs: BTreeSet<OsString>,
    pub skipped: Vec<OsString>,
}

impl DirectoryListing {
    pub fn kind_of(&self, name: &OsString) -> Option<EntryKind> {
        if self.files.contains_key(name) {
            Some(EntryKind::File)
        } else if self.dirs.contains(name) {
            Some(EntryKind::Dir)
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        self.files.len() + self.dirs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// 存储抽象接口
///
/// 路径参数都是相对于存储根目录的相对路径，空路径表示根目录本身。
#[async_trait]
pub trait Storage: Send + Sync {
    /// 获取存储名称（用于日志）
    fn name(&self) -> &str;

    /// 存储根目录（按调用方给出的形式，不做规范化）
    fn root(&self) -> &Path;

    /// 相对路径对应的完整路径，用于同步日志
    fn full_path(&self, rel: &Path) -> PathBuf {
        if rel.as_os_str().is_empty() {
            self.root().to_path_buf()
        } else {
            self.root().join(rel)
        }
    }

    /// 获取元数据，不存在时返回 `None`
    async fn stat(&self, rel: &Path) -> io::Result<Option<FileMeta>>;

    /// 列出一层目录
    async fn list_dir(&self, rel: &Path) -> io::Result<DirectoryListing>;

    /// 目录的唯一标识（用于检测符号链接环）
    async fn dir_identity(&self, rel: &Path) -> io::Result<PathBuf>;

    /// 打开文件用于读取
    async fn open_read(&self, rel: &Path) -> io::Result<FileReader>;

    /// 写入整个文件并应用修改时间和权限，返回写入字节数
    async fn write_from(&self, rel: &Path, reader: &mut FileReader, meta: &FileMeta)
        -> io::Result<u64>;

    /// 计算文件内容哈希
    async fn checksum(&self, rel: &Path) -> io::Result<String>;

    /// 创建目录（包括缺失的父目录）
    async fn create_dir(&self, rel: &Path) -> io::Result<()>;

    /// 删除文件或整个目录树
    async fn delete(&self, rel: &Path, kind: EntryKind) -> io::Result<()>;
}
