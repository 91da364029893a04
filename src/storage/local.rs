use super::{DirectoryListing, EntryKind, FileMeta, FileReader, Storage};
use async_trait::async_trait;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, trace};
use walkdir::WalkDir;

/// 哈希时的读取块大小
const HASH_BUF_SIZE: usize = 64 * 1024;

/// 临时文件后缀
const TEMP_SUFFIX: &str = "foldersync-tmp";

pub struct LocalStorage {
    base_path: PathBuf,
    name: String,
}

impl LocalStorage {
    /// 不会创建目录，源目录和副本目录的存在性由同步引擎检查
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let base_path = path.into();
        let name = format!("local:{}", base_path.display());
        Self { base_path, name }
    }

    fn resolve_path(&self, rel: &Path) -> PathBuf {
        if rel.as_os_str().is_empty() {
            self.base_path.clone()
        } else {
            self.base_path.join(rel)
        }
    }

    /// 同一目录下的临时文件路径，保证 rename 不跨文件系统
    ///
    /// 名称里不带原文件名，接近文件名长度上限的文件也能写入。
    fn temp_path(target: &Path) -> io::Result<PathBuf> {
        let parent = target.parent().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "目标路径没有父目录")
        })?;
        Ok(parent.join(format!(
            ".{}.{}",
            uuid::Uuid::new_v4().simple(),
            TEMP_SUFFIX
        )))
    }

    fn list_blocking(dir: &Path) -> io::Result<DirectoryListing> {
        let metadata = std::fs::metadata(dir)?;
        if !metadata.is_dir() {
            return Err(io::Error::other(format!("不是目录: {}", dir.display())));
        }

        let mut listing = DirectoryListing::default();

        for entry in WalkDir::new(dir)
            .min_depth(1)
            .max_depth(1)
            .follow_links(false)
        {
            let entry = match entry {
                Ok(e) => e,
                // 目录本身不可读：整个列表失败
                Err(e) if e.depth() == 0 => return Err(e.into()),
                Err(e) => {
                    debug!("读取条目失败，跳过: {}", e);
                    if let Some(name) = e.path().and_then(|p| p.file_name()) {
                        listing.skipped.push(name.to_os_string());
                    }
                    continue;
                }
            };

            let name = entry.file_name().to_os_string();

            // 符号链接按目标归类，断开的链接跳过
            let metadata = if entry.path_is_symlink() {
                std::fs::metadata(entry.path()).ok()
            } else {
                entry.metadata().ok()
            };

            match metadata {
                Some(m) if m.is_dir() => {
                    listing.dirs.insert(name);
                }
                Some(m) if m.is_file() => match FileMeta::from_std(&m) {
                    Ok(meta) => {
                        listing.files.insert(name, meta);
                    }
                    Err(e) => {
                        debug!("无法读取修改时间，跳过 {}: {}", entry.path().display(), e);
                        listing.skipped.push(name);
                    }
                },
                _ => {
                    trace!("跳过特殊条目: {}", entry.path().display());
                    listing.skipped.push(name);
                }
            }
        }

        Ok(listing)
    }

    fn checksum_blocking(path: &Path) -> io::Result<String> {
        let mut file = std::fs::File::open(path)?;
        let mut hasher = blake3::Hasher::new();
        let mut buf = vec![0u8; HASH_BUF_SIZE];
        loop {
            let n = file.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(hasher.finalize().to_hex().to_string())
    }
}

#[async_trait]
impl Storage for LocalStorage {
    fn name(&self) -> &str {
        &self.name
    }

    fn root(&self) -> &Path {
        &self.base_path
    }

    async fn stat(&self, rel: &Path) -> io::Result<Option<FileMeta>> {
        match fs::metadata(self.resolve_path(rel)).await {
            Ok(metadata) => Ok(Some(FileMeta::from_std(&metadata)?)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn list_dir(&self, rel: &Path) -> io::Result<DirectoryListing> {
        let dir = self.resolve_path(rel);

        // 使用 spawn_blocking 避免阻塞 async runtime
        tokio::task::spawn_blocking(move || Self::list_blocking(&dir))
            .await
            .map_err(io::Error::other)?
    }

    async fn dir_identity(&self, rel: &Path) -> io::Result<PathBuf> {
        fs::canonicalize(self.resolve_path(rel)).await
    }

    async fn open_read(&self, rel: &Path) -> io::Result<FileReader> {
        let file = fs::File::open(self.resolve_path(rel)).await?;
        Ok(Box::new(file))
    }

    async fn write_from(
        &self,
        rel: &Path,
        reader: &mut FileReader,
        meta: &FileMeta,
    ) -> io::Result<u64> {
        let target = self.resolve_path(rel);
        let temp_path = Self::temp_path(&target)?;

        // 先写临时文件，设置元数据后再原子重命名
        let result: io::Result<u64> = async {
            let mut file = fs::File::create(&temp_path).await?;
            let written = tokio::io::copy(reader, &mut file).await?;
            file.flush().await?;
            file.sync_all().await?;

            let std_file = file.into_std().await;
            let modified = meta.modified;
            tokio::task::spawn_blocking(move || std_file.set_modified(modified))
                .await
                .map_err(io::Error::other)??;

            fs::set_permissions(&temp_path, meta.permissions.clone()).await?;
            fs::rename(&temp_path, &target).await?;
            Ok(written)
        }
        .await;

        if result.is_err() {
            let _ = fs::remove_file(&temp_path).await;
        }

        result
    }

    async fn checksum(&self, rel: &Path) -> io::Result<String> {
        let path = self.resolve_path(rel);
        tokio::task::spawn_blocking(move || Self::checksum_blocking(&path))
            .await
            .map_err(io::Error::other)?
    }

    async fn create_dir(&self, rel: &Path) -> io::Result<()> {
        fs::create_dir_all(self.resolve_path(rel)).await
    }

    async fn delete(&self, rel: &Path, kind: EntryKind) -> io::Result<()> {
        let full_path = self.resolve_path(rel);

        let result = match kind {
            EntryKind::Dir => fs::remove_dir_all(&full_path).await,
            EntryKind::File => fs::remove_file(&full_path).await,
        };

        match result {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsString;
    use std::time::{Duration, SystemTime};
    use tempfile::TempDir;

    fn write(dir: &TempDir, rel: &str, content: &str) {
        let path = dir.path().join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    async fn copy_between(src: &LocalStorage, dst: &LocalStorage, rel: &str) -> u64 {
        let rel = Path::new(rel);
        let meta = src.stat(rel).await.unwrap().unwrap();
        let mut reader = src.open_read(rel).await.unwrap();
        dst.write_from(rel, &mut reader, &meta).await.unwrap()
    }

    #[tokio::test]
    async fn test_list_dir_partitions_files_and_dirs() {
        let dir = TempDir::new().unwrap();
        write(&dir, "a.txt", "hello");
        write(&dir, "sub/inner.txt", "nested");
        std::fs::create_dir(dir.path().join("empty")).unwrap();

        let storage = LocalStorage::new(dir.path());
        let listing = storage.list_dir(Path::new("")).await.unwrap();

        assert_eq!(listing.files.len(), 1);
        assert_eq!(listing.files[&OsString::from("a.txt")].size, 5);
        assert!(listing.dirs.contains(&OsString::from("sub")));
        assert!(listing.dirs.contains(&OsString::from("empty")));
        // 只列一层
        assert!(!listing.files.contains_key(&OsString::from("inner.txt")));
    }

    #[tokio::test]
    async fn test_list_missing_dir_fails() {
        let dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(dir.path().join("nope"));
        let err = storage.list_dir(Path::new("")).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_broken_symlink_is_skipped() {
        let dir = TempDir::new().unwrap();
        write(&dir, "real.txt", "x");
        std::os::unix::fs::symlink(dir.path().join("missing"), dir.path().join("dangling"))
            .unwrap();
        std::os::unix::fs::symlink(dir.path().join("real.txt"), dir.path().join("alias.txt"))
            .unwrap();

        let storage = LocalStorage::new(dir.path());
        let listing = storage.list_dir(Path::new("")).await.unwrap();

        assert_eq!(listing.skipped, vec![OsString::from("dangling")]);
        assert!(listing.files.contains_key(&OsString::from("alias.txt")));
        assert_eq!(listing.len(), 2);
    }

    #[tokio::test]
    async fn test_write_from_preserves_mtime() {
        let src_dir = TempDir::new().unwrap();
        let dst_dir = TempDir::new().unwrap();
        write(&src_dir, "doc.txt", "content");

        let old = SystemTime::now() - Duration::from_secs(3600);
        let file = std::fs::File::options()
            .write(true)
            .open(src_dir.path().join("doc.txt"))
            .unwrap();
        file.set_modified(old).unwrap();
        drop(file);

        let src = LocalStorage::new(src_dir.path());
        let dst = LocalStorage::new(dst_dir.path());
        let written = copy_between(&src, &dst, "doc.txt").await;
        assert_eq!(written, 7);

        let src_meta = src.stat(Path::new("doc.txt")).await.unwrap().unwrap();
        let dst_meta = dst.stat(Path::new("doc.txt")).await.unwrap().unwrap();
        assert_eq!(src_meta.modified_millis(), dst_meta.modified_millis());
        assert_eq!(
            std::fs::read_to_string(dst_dir.path().join("doc.txt")).unwrap(),
            "content"
        );

        // 不留下临时文件
        let listing = dst.list_dir(Path::new("")).await.unwrap();
        assert_eq!(listing.len(), 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_write_from_preserves_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let src_dir = TempDir::new().unwrap();
        let dst_dir = TempDir::new().unwrap();
        write(&src_dir, "run.sh", "#!/bin/sh\n");
        std::fs::set_permissions(
            src_dir.path().join("run.sh"),
            std::fs::Permissions::from_mode(0o750),
        )
        .unwrap();

        let src = LocalStorage::new(src_dir.path());
        let dst = LocalStorage::new(dst_dir.path());
        copy_between(&src, &dst, "run.sh").await;

        let mode = std::fs::metadata(dst_dir.path().join("run.sh"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o750);
    }

    #[tokio::test]
    async fn test_write_from_overwrites_existing() {
        let src_dir = TempDir::new().unwrap();
        let dst_dir = TempDir::new().unwrap();
        write(&src_dir, "c.txt", "new content");
        write(&dst_dir, "c.txt", "old");

        let src = LocalStorage::new(src_dir.path());
        let dst = LocalStorage::new(dst_dir.path());
        copy_between(&src, &dst, "c.txt").await;

        assert_eq!(
            std::fs::read_to_string(dst_dir.path().join("c.txt")).unwrap(),
            "new content"
        );
    }

    #[tokio::test]
    async fn test_write_from_long_file_name() {
        let src_dir = TempDir::new().unwrap();
        let dst_dir = TempDir::new().unwrap();
        let name = format!("{}.txt", "n".repeat(236));
        assert_eq!(name.len(), 240);
        write(&src_dir, &name, "long");

        let src = LocalStorage::new(src_dir.path());
        let dst = LocalStorage::new(dst_dir.path());
        assert_eq!(copy_between(&src, &dst, &name).await, 4);

        assert_eq!(
            std::fs::read_to_string(dst_dir.path().join(&name)).unwrap(),
            "long"
        );
        let listing = dst.list_dir(Path::new("")).await.unwrap();
        assert_eq!(listing.len(), 1);
    }

    #[test]
    fn test_temp_path_is_short_and_hidden() {
        let target = Path::new("/replica/dir").join("x".repeat(250));
        let temp = LocalStorage::temp_path(&target).unwrap();

        assert_eq!(temp.parent(), target.parent());
        let temp_name = temp.file_name().unwrap().to_string_lossy().to_string();
        assert!(temp_name.starts_with('.'));
        assert!(temp_name.ends_with(TEMP_SUFFIX));
        assert!(temp_name.len() < 64);
    }

    #[tokio::test]
    async fn test_delete_file_and_tree() {
        let dir = TempDir::new().unwrap();
        write(&dir, "gone.txt", "bye");
        write(&dir, "tree/a/b.txt", "deep");

        let storage = LocalStorage::new(dir.path());
        storage
            .delete(Path::new("gone.txt"), EntryKind::File)
            .await
            .unwrap();
        storage
            .delete(Path::new("tree"), EntryKind::Dir)
            .await
            .unwrap();
        // 已不存在的条目不报错
        storage
            .delete(Path::new("gone.txt"), EntryKind::File)
            .await
            .unwrap();

        assert!(!dir.path().join("gone.txt").exists());
        assert!(!dir.path().join("tree").exists());
    }

    #[tokio::test]
    async fn test_checksum_matches_for_equal_content() {
        let dir = TempDir::new().unwrap();
        write(&dir, "one.txt", "same bytes");
        write(&dir, "two.txt", "same bytes");
        write(&dir, "three.txt", "other byte");

        let storage = LocalStorage::new(dir.path());
        let one = storage.checksum(Path::new("one.txt")).await.unwrap();
        let two = storage.checksum(Path::new("two.txt")).await.unwrap();
        let three = storage.checksum(Path::new("three.txt")).await.unwrap();

        assert_eq!(one, two);
        assert_ne!(one, three);
    }

    #[tokio::test]
    async fn test_stat_missing_returns_none() {
        let dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(dir.path());
        assert!(storage.stat(Path::new("absent")).await.unwrap().is_none());
        assert!(storage.stat(Path::new("")).await.unwrap().unwrap().is_dir());
    }
}
