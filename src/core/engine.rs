use crate::core::comparator::{
    CompareConfig, DiffResult, FileComparator, FileRelation, SyncAction,
};
use crate::core::sync_log::{LogEntry, SyncLog};
use crate::error::SyncError;
use crate::storage::{DirectoryListing, EntryKind, FileMeta, LocalStorage, Storage};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::ffi::OsString;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// 单个条目失败时所处的操作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryOp {
    List,
    Compare,
    Copy,
    CreateDir,
    Delete,
    Log,
}

/// 单个条目的失败（不会中断整轮同步）
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryError {
    pub op: EntryOp,
    pub path: PathBuf,
    #[serde(skip)]
    pub kind: io::ErrorKind,
    pub message: String,
}

impl std::fmt::Display for EntryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?} {}: {}", self.op, self.path.display(), self.message)
    }
}

/// 一轮同步的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PassStatus {
    Completed,
    /// 部分条目失败，下一轮会重新比较
    PartiallyFailed,
}

/// 同步报告
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub pass_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub status: PassStatus,
    pub dirs_scanned: u32,
    pub files_copied: u32,
    pub dirs_created: u32,
    pub entries_removed: u32,
    pub files_unchanged: u32,
    pub entries_skipped: u32,
    pub bytes_copied: u64,
    pub errors: Vec<EntryError>,
}

impl SyncReport {
    fn new() -> Self {
        let now = Utc::now();
        Self {
            pass_id: uuid::Uuid::new_v4().to_string(),
            started_at: now,
            finished_at: now,
            status: PassStatus::Completed,
            dirs_scanned: 0,
            files_copied: 0,
            dirs_created: 0,
            entries_removed: 0,
            files_unchanged: 0,
            entries_skipped: 0,
            bytes_copied: 0,
            errors: Vec::new(),
        }
    }

    /// 本轮执行的动作数（复制、创建目录、删除）
    pub fn actions(&self) -> u32 {
        self.files_copied + self.dirs_created + self.entries_removed
    }

    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }

    fn push_error(&mut self, op: EntryOp, path: PathBuf, err: &io::Error) {
        warn!("{:?} 失败: {}: {}", op, path.display(), err);
        self.errors.push(EntryError {
            op,
            path,
            kind: err.kind(),
            message: err.to_string(),
        });
    }

    fn finish(&mut self) {
        self.finished_at = Utc::now();
        if !self.errors.is_empty() {
            self.status = PassStatus::PartiallyFailed;
        }
    }
}

/// 同步引擎
///
/// 每次调用 [`SyncEngine::synchronize`] 都从头重新比较整棵树，不保存任何状态，
/// 因此可以反复调用：失败的条目会在下一轮自然重试。
pub struct SyncEngine {
    source: Arc<dyn Storage>,
    replica: Arc<dyn Storage>,
    comparator: FileComparator,
}

impl SyncEngine {
    pub fn new(source: Arc<dyn Storage>, replica: Arc<dyn Storage>) -> Self {
        Self::with_config(source, replica, CompareConfig::default())
    }

    pub fn with_config(
        source: Arc<dyn Storage>,
        replica: Arc<dyn Storage>,
        config: CompareConfig,
    ) -> Self {
        Self {
            source,
            replica,
            comparator: FileComparator::with_config(config),
        }
    }

    /// 两个本地目录之间的同步引擎
    pub fn local(
        source: impl Into<PathBuf>,
        replica: impl Into<PathBuf>,
        config: CompareConfig,
    ) -> Self {
        Self::with_config(
            Arc::new(LocalStorage::new(source)),
            Arc::new(LocalStorage::new(replica)),
            config,
        )
    }

    pub fn source(&self) -> &dyn Storage {
        self.source.as_ref()
    }

    /// 源目录当前是否存在且是目录
    pub async fn source_available(&self) -> bool {
        matches!(self.source.stat(Path::new("")).await, Ok(Some(meta)) if meta.is_dir())
    }

    /// 执行一轮同步
    ///
    /// 只有源目录不可用、目录重叠、副本根目录不可用时返回错误，此时不会修改任何文件。
    /// 其余失败记录在 [`SyncReport::errors`] 中。
    pub async fn synchronize<W: Write>(
        &self,
        log: &mut SyncLog<W>,
    ) -> Result<SyncReport, SyncError> {
        let mut report = SyncReport::new();
        info!(
            pass_id = %report.pass_id,
            "开始同步: {} -> {}",
            self.source.name(),
            self.replica.name()
        );

        self.prepare_roots().await?;

        // 显式工作栈代替递归，按名称顺序深度优先。
        // 每项带上祖先目录的规范路径，指回祖先的符号链接才算环
        let mut pending: Vec<(PathBuf, Arc<Vec<PathBuf>>)> =
            vec![(PathBuf::new(), Arc::new(Vec::new()))];

        while let Some((rel, ancestors)) = pending.pop() {
            let identity = match self.source.dir_identity(&rel).await {
                Ok(identity) => identity,
                Err(e) => {
                    report.push_error(EntryOp::List, self.source.full_path(&rel), &e);
                    continue;
                }
            };
            if ancestors.contains(&identity) {
                warn!("跳过指向上级目录的符号链接（环）: {}", rel.display());
                report.entries_skipped += 1;
                continue;
            }

            let children = self.sync_level(&rel, log, &mut report).await;
            if children.is_empty() {
                continue;
            }

            let mut chain = Vec::with_capacity(ancestors.len() + 1);
            chain.extend(ancestors.iter().cloned());
            chain.push(identity);
            let chain = Arc::new(chain);
            pending.extend(
                children
                    .into_iter()
                    .rev()
                    .map(|child| (child, Arc::clone(&chain))),
            );
        }

        if let Err(e) = log.flush() {
            report.push_error(EntryOp::Log, PathBuf::new(), &e);
        }

        report.finish();
        info!(
            pass_id = %report.pass_id,
            copied = report.files_copied,
            created = report.dirs_created,
            removed = report.entries_removed,
            failed = report.errors.len(),
            "同步完成"
        );

        Ok(report)
    }

    /// 检查源目录、目录重叠，并在需要时创建副本根目录
    async fn prepare_roots(&self) -> Result<(), SyncError> {
        let root = Path::new("");

        match self.source.stat(root).await? {
            Some(meta) if meta.is_dir() => {}
            Some(_) => {
                return Err(SyncError::SourceNotDirectory {
                    path: self.source.root().to_path_buf(),
                })
            }
            None => {
                return Err(SyncError::SourceMissing {
                    path: self.source.root().to_path_buf(),
                })
            }
        }

        let source_root = self.source.root().to_path_buf();
        let replica_root = self.replica.root().to_path_buf();
        let overlap =
            tokio::task::spawn_blocking(move || roots_overlap(&source_root, &replica_root))
                .await
                .map_err(io::Error::other)??;
        if overlap {
            return Err(SyncError::Overlap {
                source_root: self.source.root().to_path_buf(),
                replica_root: self.replica.root().to_path_buf(),
            });
        }

        let unavailable = |source: io::Error| SyncError::ReplicaUnavailable {
            path: self.replica.root().to_path_buf(),
            source,
        };

        match self.replica.stat(root).await.map_err(unavailable)? {
            Some(meta) if meta.is_dir() => Ok(()),
            Some(_) => Err(unavailable(io::Error::new(
                io::ErrorKind::AlreadyExists,
                "副本路径已存在且不是目录",
            ))),
            None => {
                self.replica.create_dir(root).await.map_err(unavailable)?;
                info!("已创建副本目录: {}", self.replica.root().display());
                Ok(())
            }
        }
    }

    /// 同步一层目录，返回需要继续处理的子目录
    async fn sync_level<W: Write>(
        &self,
        rel: &Path,
        log: &mut SyncLog<W>,
        report: &mut SyncReport,
    ) -> Vec<PathBuf> {
        let Some((source_listing, replica_listing)) = self.list_pair(rel, report).await else {
            return Vec::new();
        };

        report.dirs_scanned += 1;
        report.entries_skipped +=
            (source_listing.skipped.len() + replica_listing.skipped.len()) as u32;

        let diff = DiffResult::between(&source_listing, &replica_listing);
        debug!(
            dir = %rel.display(),
            source_only = diff.source_only.len(),
            replica_only = diff.replica_only.len(),
            common_files = diff.common_files.len(),
            common_dirs = diff.common_dirs.len(),
            kind_changed = diff.kind_changed.len(),
            "目录比较完成"
        );

        let mut children = Vec::new();

        // 1. 复制只在源中存在的文件和内容不同的文件
        let mut to_copy: Vec<&OsString> = diff
            .source_only
            .iter()
            .filter(|(_, kind)| *kind == EntryKind::File)
            .map(|(name, _)| name)
            .collect();

        for name in &diff.common_files {
            let (Some(src), Some(dst)) =
                (source_listing.files.get(name), replica_listing.files.get(name))
            else {
                continue;
            };
            if self.file_changed(&rel.join(name), src, dst).await {
                to_copy.push(name);
            } else {
                report.files_unchanged += 1;
            }
        }
        to_copy.sort();

        for name in to_copy {
            let child = rel.join(name);
            self.apply(Self::copy_action(&child, EntryKind::File), log, report)
                .await;
        }

        // 2. 删除只在副本中存在的条目
        for (name, kind) in &diff.replica_only {
            let action = SyncAction::Delete {
                replica: rel.join(name),
                kind: *kind,
            };
            self.apply(action, log, report).await;
        }

        // 3. 类型不同：以源为准，先删除再重建
        for (name, source_kind, replica_kind) in &diff.kind_changed {
            let child = rel.join(name);
            let removed = self
                .apply(
                    SyncAction::Delete {
                        replica: child.clone(),
                        kind: *replica_kind,
                    },
                    log,
                    report,
                )
                .await;
            if !removed {
                continue;
            }
            let recreated = self
                .apply(Self::copy_action(&child, *source_kind), log, report)
                .await;
            if recreated && *source_kind == EntryKind::Dir {
                children.push(child);
            }
        }

        // 4. 创建只在源中存在的目录，其内容在处理该目录时复制
        for (name, kind) in &diff.source_only {
            if *kind != EntryKind::Dir {
                continue;
            }
            let child = rel.join(name);
            if self
                .apply(Self::copy_action(&child, EntryKind::Dir), log, report)
                .await
            {
                children.push(child);
            }
        }

        // 5. 两侧都有的目录
        children.extend(diff.common_dirs.iter().map(|name| rel.join(name)));
        children.sort();
        children
    }

    async fn list_pair(
        &self,
        rel: &Path,
        report: &mut SyncReport,
    ) -> Option<(DirectoryListing, DirectoryListing)> {
        let source_listing = match self.source.list_dir(rel).await {
            Ok(listing) => listing,
            Err(e) => {
                report.push_error(EntryOp::List, self.source.full_path(rel), &e);
                return None;
            }
        };

        let replica_listing = match self.replica.list_dir(rel).await {
            Ok(listing) => listing,
            Err(e) => {
                report.push_error(EntryOp::List, self.replica.full_path(rel), &e);
                return None;
            }
        };

        Some((source_listing, replica_listing))
    }

    fn copy_action(rel: &Path, kind: EntryKind) -> SyncAction {
        SyncAction::Copy {
            source: rel.to_path_buf(),
            replica: rel.to_path_buf(),
            kind,
        }
    }

    /// 判断两侧都存在的文件是否需要重新复制
    async fn file_changed(&self, rel: &Path, source: &FileMeta, replica: &FileMeta) -> bool {
        match self.comparator.compare_meta(source, replica) {
            FileRelation::Equal => false,
            FileRelation::Different => true,
            FileRelation::NeedsContentCheck => {
                let source_hash = self.source.checksum(rel).await;
                let replica_hash = self.replica.checksum(rel).await;
                match (source_hash, replica_hash) {
                    (Ok(a), Ok(b)) => a != b,
                    (Err(e), _) | (_, Err(e)) => {
                        // 无法比较时按已变更处理，复制失败会单独记录
                        debug!("计算哈希失败 {}: {}", rel.display(), e);
                        true
                    }
                }
            }
        }
    }

    /// 执行一个动作，成功后立即写日志。返回是否成功
    async fn apply<W: Write>(
        &self,
        action: SyncAction,
        log: &mut SyncLog<W>,
        report: &mut SyncReport,
    ) -> bool {
        let (op, result, entry) = match &action {
            SyncAction::Copy {
                source,
                replica,
                kind,
            } => {
                let entry = LogEntry::Copied {
                    source: self.source.full_path(source),
                    replica: self.replica.full_path(replica),
                };
                match kind {
                    EntryKind::File => {
                        let result = self.copy_file(source, replica).await.map(|bytes| {
                            report.files_copied += 1;
                            report.bytes_copied += bytes;
                        });
                        (EntryOp::Copy, result, entry)
                    }
                    EntryKind::Dir => {
                        let result = self
                            .replica
                            .create_dir(replica)
                            .await
                            .map(|_| report.dirs_created += 1);
                        (EntryOp::CreateDir, result, entry)
                    }
                }
            }
            SyncAction::Delete { replica, kind } => {
                let entry = LogEntry::Removed {
                    replica: self.replica.full_path(replica),
                };
                let result = self
                    .replica
                    .delete(replica, *kind)
                    .await
                    .map(|_| report.entries_removed += 1);
                (EntryOp::Delete, result, entry)
            }
        };

        match result {
            Ok(()) => {
                if let Err(e) = log.record(&entry) {
                    report.push_error(EntryOp::Log, self.action_path(&action), &e);
                }
                true
            }
            Err(e) => {
                report.push_error(op, self.action_path(&action), &e);
                false
            }
        }
    }

    fn action_path(&self, action: &SyncAction) -> PathBuf {
        match action {
            SyncAction::Copy { replica, .. } | SyncAction::Delete { replica, .. } => {
                self.replica.full_path(replica)
            }
        }
    }

    /// 复制文件内容、修改时间和权限
    async fn copy_file(&self, source: &Path, replica: &Path) -> io::Result<u64> {
        let meta = self
            .source
            .stat(source)
            .await?
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "源文件已不存在"))?;
        let mut reader = self.source.open_read(source).await?;
        self.replica.write_from(replica, &mut reader, &meta).await
    }
}

/// 副本目录与源目录是否相互包含（含相同）
///
/// 副本目录可能还不存在，此时规范化最近的已存在祖先目录。
pub fn roots_overlap(source: &Path, replica: &Path) -> io::Result<bool> {
    let source = std::fs::canonicalize(source)?;
    let replica = canonicalize_lenient(replica)?;
    Ok(replica.starts_with(&source) || source.starts_with(&replica))
}

fn canonicalize_lenient(path: &Path) -> io::Result<PathBuf> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };

    let mut existing = absolute.as_path();
    let mut missing: Vec<OsString> = Vec::new();

    loop {
        match std::fs::canonicalize(existing) {
            Ok(mut resolved) => {
                for name in missing.iter().rev() {
                    resolved.push(name);
                }
                return Ok(resolved);
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                match (existing.parent(), existing.file_name()) {
                    (Some(parent), Some(name)) => {
                        missing.push(name.to_os_string());
                        existing = parent;
                    }
                    _ => return Err(e),
                }
            }
            Err(e) => return Err(e),
        }
    }
}
