#![allow(dead_code)]

use async_trait::async_trait;
use foldersync_lib::core::{SyncLog, SyncLogOptions};
use foldersync_lib::storage::{
    DirectoryListing, EntryKind, FileMeta, FileReader, LocalStorage, Storage,
};
use std::collections::{BTreeMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use walkdir::WalkDir;

pub fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

pub fn set_mtime(root: &Path, rel: &str, time: SystemTime) {
    let file = std::fs::File::options()
        .write(true)
        .open(root.join(rel))
        .unwrap();
    file.set_modified(time).unwrap();
}

pub fn hours_ago(hours: u64) -> SystemTime {
    SystemTime::now() - Duration::from_secs(hours * 3600)
}

/// 相对路径 -> 文件内容（目录为 None）
pub fn snapshot(root: &Path) -> BTreeMap<String, Option<String>> {
    WalkDir::new(root)
        .min_depth(1)
        .into_iter()
        .map(|e| e.unwrap())
        .map(|e| {
            let rel = e
                .path()
                .strip_prefix(root)
                .unwrap()
                .to_string_lossy()
                .replace('\\', "/");
            let content = if e.file_type().is_dir() {
                None
            } else {
                Some(std::fs::read_to_string(e.path()).unwrap())
            };
            (rel, content)
        })
        .collect()
}

pub fn memory_log() -> SyncLog<Vec<u8>> {
    SyncLog::new(
        Vec::new(),
        SyncLogOptions {
            echo: false,
            timestamps: false,
        },
    )
}

pub fn log_lines(log: SyncLog<Vec<u8>>) -> Vec<String> {
    let bytes = log.finish().unwrap();
    String::from_utf8(bytes)
        .unwrap()
        .lines()
        .map(str::to_string)
        .collect()
}

/// 对指定文件名的写入、删除返回权限错误的本地存储
pub struct FaultyStorage {
    inner: LocalStorage,
    failing: HashSet<String>,
}

impl FaultyStorage {
    pub fn new(root: &Path, failing: &[&str]) -> Self {
        Self {
            inner: LocalStorage::new(root),
            failing: failing.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn check(&self, rel: &Path) -> io::Result<()> {
        let name = rel
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        if self.failing.contains(&name) {
            Err(io::Error::new(io::ErrorKind::PermissionDenied, "injected failure"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Storage for FaultyStorage {
    fn name(&self) -> &str {
        "faulty"
    }

    fn root(&self) -> &Path {
        self.inner.root()
    }

    async fn stat(&self, rel: &Path) -> io::Result<Option<FileMeta>> {
        self.inner.stat(rel).await
    }

    async fn list_dir(&self, rel: &Path) -> io::Result<DirectoryListing> {
        self.check(rel)?;
        self.inner.list_dir(rel).await
    }

    async fn dir_identity(&self, rel: &Path) -> io::Result<PathBuf> {
        self.inner.dir_identity(rel).await
    }

    async fn open_read(&self, rel: &Path) -> io::Result<FileReader> {
        self.inner.open_read(rel).await
    }

    async fn write_from(
        &self,
        rel: &Path,
        reader: &mut FileReader,
        meta: &FileMeta,
    ) -> io::Result<u64> {
        self.check(rel)?;
        self.inner.write_from(rel, reader, meta).await
    }

    async fn checksum(&self, rel: &Path) -> io::Result<String> {
        self.inner.checksum(rel).await
    }

    async fn create_dir(&self, rel: &Path) -> io::Result<()> {
        self.check(rel)?;
        self.inner.create_dir(rel).await
    }

    async fn delete(&self, rel: &Path, kind: EntryKind) -> io::Result<()> {
        self.check(rel)?;
        self.inner.delete(rel, kind).await
    }
}
