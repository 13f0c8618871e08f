use crate::error::SourceError;
use crate::filters::{FileListFilter, PersistentAcceptOnceFileListFilter, SimpleMetadataStore};
use crate::storage::FileEntry;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;
use tracing::{debug, info};
use walkdir::WalkDir;

use super::synchronizer::DEFAULT_TEMPORARY_FILE_SUFFIX;

/// 本地目录中的文件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFile {
    pub path: PathBuf,
    pub name: String,
    pub size: u64,
    /// 修改时间（秒）
    pub modified_time: i64,
    key: String,
}

impl LocalFile {
    /// 读取文件元数据；不存在或不是普通文件时返回 None
    pub fn from_path(path: &Path) -> std::io::Result<Option<Self>> {
        let metadata = match std::fs::metadata(path) {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        if !metadata.is_file() {
            return Ok(None);
        }

        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return Ok(None);
        };

        let modified_time = metadata
            .modified()?
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);

        Ok(Some(Self {
            path: path.to_path_buf(),
            name: name.to_string(),
            size: metadata.len(),
            modified_time,
            key: path.to_string_lossy().replace('\\', "/"),
        }))
    }
}

impl FileEntry for LocalFile {
    fn path(&self) -> &str {
        &self.key
    }

    fn filename(&self) -> &str {
        &self.name
    }

    fn is_file(&self) -> bool {
        true
    }

    fn modified(&self) -> i64 {
        self.modified_time
    }
}

/// 本地文件是否需要忽略：隐藏文件与下载中的临时文件
pub(crate) fn is_ignored(name: &str, temporary_file_suffix: &str) -> bool {
    name.starts_with('.') || (!temporary_file_suffix.is_empty() && name.ends_with(temporary_file_suffix))
}

/// 默认的本地过滤器：按路径与修改时间只接受一次
pub(crate) fn default_local_filter() -> Arc<dyn FileListFilter<LocalFile>> {
    Arc::new(PersistentAcceptOnceFileListFilter::new(
        Arc::new(SimpleMetadataStore::new()),
        "local:",
    ))
}

/// 本地目录扫描器
///
/// 每次扫描列出目录下（不递归）的新文件，按修改时间与文件名排序。
/// `head(n)` 模式下只返回前 n 个，其余文件撤销后留给下一次扫描。
pub struct DirectoryScanner {
    max_files: Option<usize>,
    temporary_file_suffix: String,
    filter: Arc<dyn FileListFilter<LocalFile>>,
}

impl DirectoryScanner {
    pub fn new() -> Self {
        Self {
            max_files: None,
            temporary_file_suffix: DEFAULT_TEMPORARY_FILE_SUFFIX.to_string(),
            filter: default_local_filter(),
        }
    }

    /// 每次扫描最多返回 max_files 个文件，至少为 1
    pub fn head(max_files: usize) -> Self {
        Self {
            max_files: Some(max_files.max(1)),
            ..Self::new()
        }
    }

    pub fn with_filter(mut self, filter: Arc<dyn FileListFilter<LocalFile>>) -> Self {
        self.filter = filter;
        self
    }

    pub(crate) fn set_temporary_file_suffix(&mut self, suffix: &str) {
        self.temporary_file_suffix = suffix.to_string();
    }

    pub fn max_files(&self) -> Option<usize> {
        self.max_files
    }

    pub async fn list_files(&self, directory: &Path) -> Result<Vec<LocalFile>, SourceError> {
        let dir = directory.to_path_buf();
        let suffix = self.temporary_file_suffix.clone();

        let mut files = tokio::task::spawn_blocking(move || {
            WalkDir::new(&dir)
                .min_depth(1)
                .max_depth(1)
                .follow_links(false)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|entry| entry.file_type().is_file())
                .filter(|entry| {
                    entry
                        .file_name()
                        .to_str()
                        .map(|name| !is_ignored(name, &suffix))
                        .unwrap_or(false)
                })
                .filter_map(|entry| LocalFile::from_path(entry.path()).ok().flatten())
                .collect::<Vec<_>>()
        })
        .await
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;

        files.sort_by(|a, b| {
            a.modified_time
                .cmp(&b.modified_time)
                .then_with(|| a.name.cmp(&b.name))
        });

        let mut accepted = self.filter.filter_files(files).await?;

        if let Some(max) = self.max_files {
            if accepted.len() > max {
                let deferred = accepted.split_off(max);
                if self.filter.is_reversible() {
                    for file in &deferred {
                        self.filter.rollback(file).await?;
                    }
                }
                debug!("扫描结果超出上限 {}，推迟 {} 个文件", max, deferred.len());
            }
        }

        if !accepted.is_empty() {
            info!("扫描到 {} 个新文件: {:?}", accepted.len(), directory);
        }

        Ok(accepted)
    }
}

impl Default for DirectoryScanner {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use filetime::FileTime;

    fn touch(dir: &Path, name: &str, mtime: i64) {
        let path = dir.join(name);
        std::fs::write(&path, name).unwrap();
        filetime::set_file_mtime(&path, FileTime::from_unix_time(mtime, 0)).unwrap();
    }

    fn names(files: &[LocalFile]) -> Vec<&str> {
        files.iter().map(|f| f.name.as_str()).collect()
    }

    #[test]
    fn test_is_ignored() {
        assert!(is_ignored(".hidden", ".writing"));
        assert!(is_ignored("a.txt.writing", ".writing"));
        assert!(!is_ignored("a.txt", ".writing"));
        assert!(!is_ignored("a.writing.txt", ".writing"));
    }

    #[tokio::test]
    async fn test_orders_by_modified_then_name() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "c.txt", 100);
        touch(dir.path(), "b.txt", 200);
        touch(dir.path(), "a.txt", 200);
        touch(dir.path(), ".hidden", 50);
        touch(dir.path(), "d.txt.writing", 50);
        std::fs::create_dir(dir.path().join("sub")).unwrap();

        let scanner = DirectoryScanner::new();
        let files = scanner.list_files(dir.path()).await.unwrap();
        assert_eq!(names(&files), vec!["c.txt", "a.txt", "b.txt"]);

        assert!(scanner.list_files(dir.path()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_head_defers_the_rest() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "a.txt", 100);
        touch(dir.path(), "b.txt", 200);
        touch(dir.path(), "c.txt", 300);

        let scanner = DirectoryScanner::head(2);
        assert_eq!(scanner.max_files(), Some(2));
        assert_eq!(
            names(&scanner.list_files(dir.path()).await.unwrap()),
            vec!["a.txt", "b.txt"]
        );
        assert_eq!(
            names(&scanner.list_files(dir.path()).await.unwrap()),
            vec!["c.txt"]
        );
        assert!(scanner.list_files(dir.path()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_head_zero_still_makes_progress() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "a.txt", 100);
        touch(dir.path(), "b.txt", 200);

        let scanner = DirectoryScanner::head(0);
        assert_eq!(scanner.max_files(), Some(1));
        assert_eq!(
            names(&scanner.list_files(dir.path()).await.unwrap()),
            vec!["a.txt"]
        );
        assert_eq!(
            names(&scanner.list_files(dir.path()).await.unwrap()),
            vec!["b.txt"]
        );
    }

    #[tokio::test]
    async fn test_modified_file_is_listed_again() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "a.txt", 100);

        let scanner = DirectoryScanner::new();
        assert_eq!(scanner.list_files(dir.path()).await.unwrap().len(), 1);

        touch(dir.path(), "a.txt", 500);
        let again = scanner.list_files(dir.path()).await.unwrap();
        assert_eq!(names(&again), vec!["a.txt"]);
        assert_eq!(again[0].modified_time, 500);
    }
}
