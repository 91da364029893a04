use crate::storage::{DirectoryListing, EntryKind, FileMeta};
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::path::PathBuf;

/// 同步动作
///
/// 动作不会被收集成批次，生成后立即执行并记录日志。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncAction {
    /// 复制：源路径 -> 副本路径（目录则只创建）
    Copy {
        source: PathBuf,
        replica: PathBuf,
        kind: EntryKind,
    },
    /// 删除副本中的条目（目录则删除整个子树）
    Delete { replica: PathBuf, kind: EntryKind },
}

/// 内容比较方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompareMode {
    /// 先比较大小和修改时间，时间不一致时再比较哈希
    #[default]
    Quick,
    /// 大小相同时总是比较哈希
    Checksum,
}

/// 比较配置
#[derive(Debug, Clone)]
pub struct CompareConfig {
    pub mode: CompareMode,
    /// 修改时间容差（毫秒）
    pub time_tolerance_ms: u64,
}

impl Default for CompareConfig {
    fn default() -> Self {
        Self {
            mode: CompareMode::Quick,
            time_tolerance_ms: 0,
        }
    }
}

/// 根据元数据得出的比较结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileRelation {
    Equal,
    Different,
    /// 元数据无法判断，需要比较内容哈希
    NeedsContentCheck,
}

/// 单层目录的差异
///
/// 各集合按名称排序且互不相交。名称在两侧都存在但类型不同的条目
/// 只出现在 `kind_changed` 中。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffResult {
    /// 只存在于源目录
    pub source_only: Vec<(OsString, EntryKind)>,
    /// 只存在于副本目录
    pub replica_only: Vec<(OsString, EntryKind)>,
    /// 两侧都是文件，需要比较内容
    pub common_files: Vec<OsString>,
    /// 两侧都是目录，需要递归
    pub common_dirs: Vec<OsString>,
    /// 两侧类型不同：(名称, 源类型, 副本类型)
    pub kind_changed: Vec<(OsString, EntryKind, EntryKind)>,
}

impl DiffResult {
    /// 计算单层差异
    pub fn between(source: &DirectoryListing, replica: &DirectoryListing) -> Self {
        let mut diff = DiffResult::default();

        let source_names = source
            .files
            .keys()
            .map(|n| (n, EntryKind::File))
            .chain(source.dirs.iter().map(|n| (n, EntryKind::Dir)));

        for (name, src_kind) in source_names {
            match replica.kind_of(name) {
                None => diff.source_only.push((name.clone(), src_kind)),
                Some(dst_kind) if dst_kind != src_kind => {
                    diff.kind_changed.push((name.clone(), src_kind, dst_kind))
                }
                Some(EntryKind::File) => diff.common_files.push(name.clone()),
                Some(EntryKind::Dir) => diff.common_dirs.push(name.clone()),
            }
        }

        let replica_names = replica
            .files
            .keys()
            .map(|n| (n, EntryKind::File))
            .chain(replica.dirs.iter().map(|n| (n, EntryKind::Dir)));

        for (name, dst_kind) in replica_names {
            if source.kind_of(name).is_none() {
                diff.replica_only.push((name.clone(), dst_kind));
            }
        }

        // 文件和目录分两段收集，这里统一按名称排序
        diff.source_only.sort();
        diff.replica_only.sort();
        diff.kind_changed.sort();

        diff
    }
}

/// 文件比较器
pub struct FileComparator {
    config: CompareConfig,
}

impl FileComparator {
    pub fn new(use_checksum: bool) -> Self {
        Self {
            config: CompareConfig {
                mode: if use_checksum {
                    CompareMode::Checksum
                } else {
                    CompareMode::Quick
                },
                ..Default::default()
            },
        }
    }

    pub fn with_config(config: CompareConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CompareConfig {
        &self.config
    }

    /// 根据元数据比较两个文件
    pub fn compare_meta(&self, source: &FileMeta, replica: &FileMeta) -> FileRelation {
        // 大小不同，肯定不同
        if source.size != replica.size {
            return FileRelation::Different;
        }

        match self.config.mode {
            CompareMode::Checksum => FileRelation::NeedsContentCheck,
            CompareMode::Quick => {
                let time_diff = source
                    .modified_millis()
                    .abs_diff(replica.modified_millis());
                if time_diff <= self.config.time_tolerance_ms {
                    FileRelation::Equal
                } else {
                    tracing::trace!(time_diff, "修改时间不同，需要比较内容");
                    FileRelation::NeedsContentCheck
                }
            }
        }
    }
}

impl Default for FileComparator {
    fn default() -> Self {
        Self::new(false)
    }
}
