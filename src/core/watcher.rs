use super::scanner::{default_local_filter, is_ignored, DirectoryScanner, LocalFile};
use crate::error::SourceError;
use crate::filters::FileListFilter;
use notify::event::{CreateKind, ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// 从文件系统事件中取出可能出现了新文件的路径
fn event_to_paths(event: Event) -> Vec<PathBuf> {
    match event.kind {
        EventKind::Create(CreateKind::File) | EventKind::Create(CreateKind::Any) => event.paths,
        EventKind::Modify(ModifyKind::Data(_)) => event.paths,
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            // (from, to)，只关心目标
            event.paths.into_iter().last().into_iter().collect()
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::To))
        | EventKind::Modify(ModifyKind::Name(RenameMode::Any)) => event.paths,
        _ => Vec::new(),
    }
}

/// 基于操作系统文件事件的本地目录监听
///
/// 启动时先扫描一次目录，之后只处理事件通知。事件在回调线程中写入通道，
/// `poll_files` 非阻塞地取出积累的事件。
pub struct WatchService {
    directory: PathBuf,
    temporary_file_suffix: String,
    filter: Arc<dyn FileListFilter<LocalFile>>,
    watcher: Option<RecommendedWatcher>,
    events: Option<mpsc::UnboundedReceiver<PathBuf>>,
}

impl WatchService {
    pub fn new(directory: impl Into<PathBuf>, temporary_file_suffix: &str) -> Self {
        Self {
            directory: directory.into(),
            temporary_file_suffix: temporary_file_suffix.to_string(),
            filter: default_local_filter(),
            watcher: None,
            events: None,
        }
    }

    pub fn is_watching(&self) -> bool {
        self.watcher.is_some()
    }

    /// 开始监听，返回目录中已存在的文件
    pub async fn start(&mut self) -> Result<Vec<LocalFile>, SourceError> {
        if self.is_watching() {
            return Ok(Vec::new());
        }

        // 事件路径总是绝对路径，相对目录需要先转换才能比较
        self.directory = tokio::fs::canonicalize(&self.directory).await?;

        let (tx, rx) = mpsc::unbounded_channel();
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    for path in event_to_paths(event) {
                        let _ = tx.send(path);
                    }
                }
                Err(e) => error!("文件监听错误: {}", e),
            },
            notify::Config::default(),
        )?;
        watcher.watch(&self.directory, RecursiveMode::NonRecursive)?;

        self.watcher = Some(watcher);
        self.events = Some(rx);
        info!("开始监听本地目录: {:?}", self.directory);

        let mut initial = DirectoryScanner::new().with_filter(self.filter.clone());
        initial.set_temporary_file_suffix(&self.temporary_file_suffix);
        initial.list_files(&self.directory).await
    }

    /// 取出自上次调用以来新出现的文件（按事件到达顺序）
    pub async fn poll_files(&mut self) -> Result<Vec<LocalFile>, SourceError> {
        let Some(events) = self.events.as_mut() else {
            return Ok(Vec::new());
        };

        let mut paths = Vec::new();
        while let Ok(path) = events.try_recv() {
            paths.push(path);
        }

        let mut candidates = Vec::new();
        for path in paths {
            match self.candidate(&path) {
                Ok(Some(file)) => candidates.push(file),
                Ok(None) => {}
                Err(e) => warn!("读取本地文件失败，跳过 {:?}: {}", path, e),
            }
        }

        if candidates.is_empty() {
            return Ok(candidates);
        }

        Ok(self.filter.filter_files(candidates).await?)
    }

    fn candidate(&self, path: &Path) -> Result<Option<LocalFile>, SourceError> {
        if path.parent() != Some(self.directory.as_path()) {
            return Ok(None);
        }
        let ignored = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|name| is_ignored(name, &self.temporary_file_suffix))
            .unwrap_or(true);
        if ignored {
            debug!("忽略本地事件: {:?}", path);
            return Ok(None);
        }
        Ok(LocalFile::from_path(path)?)
    }

    pub fn stop(&mut self) {
        if let Some(mut watcher) = self.watcher.take() {
            if let Err(e) = watcher.unwatch(&self.directory) {
                error!("停止监听失败: {}", e);
            }
            info!("停止监听本地目录: {:?}", self.directory);
        }
        self.events = None;
    }
}

impl Drop for WatchService {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{DataChange, RemoveKind};

    fn event(kind: EventKind, paths: &[&str]) -> Event {
        let mut event = Event::new(kind);
        for p in paths {
            event = event.add_path(PathBuf::from(p));
        }
        event
    }

    #[test]
    fn test_event_to_paths() {
        assert_eq!(
            event_to_paths(event(EventKind::Create(CreateKind::File), &["/d/a"])),
            vec![PathBuf::from("/d/a")]
        );
        assert_eq!(
            event_to_paths(event(
                EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
                &["/d/a.writing", "/d/a"]
            )),
            vec![PathBuf::from("/d/a")]
        );
        assert_eq!(
            event_to_paths(event(
                EventKind::Modify(ModifyKind::Data(DataChange::Content)),
                &["/d/b"]
            )),
            vec![PathBuf::from("/d/b")]
        );
        assert!(event_to_paths(event(EventKind::Remove(RemoveKind::File), &["/d/a"])).is_empty());
        assert!(event_to_paths(event(
            EventKind::Modify(ModifyKind::Name(RenameMode::From)),
            &["/d/a"]
        ))
        .is_empty());
    }

    #[tokio::test]
    async fn test_start_reports_existing_files_once() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"a").unwrap();
        std::fs::write(dir.path().join("a.txt.writing"), b"partial").unwrap();

        let mut watch = WatchService::new(dir.path(), ".writing");
        let initial = watch.start().await.unwrap();
        assert_eq!(initial.len(), 1);
        assert_eq!(initial[0].name, "a.txt");
        assert!(watch.is_watching());

        // 再次启动不会重复报告
        assert!(watch.start().await.unwrap().is_empty());

        watch.stop();
        assert!(!watch.is_watching());
        assert!(watch.poll_files().await.unwrap().is_empty());
    }

    #[test]
    fn test_candidate_ignores_other_directories_and_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"a").unwrap();
        std::fs::write(dir.path().join("b.writing"), b"b").unwrap();
        let watch = WatchService::new(dir.path(), ".writing");

        assert!(watch.candidate(&dir.path().join("a.txt")).unwrap().is_some());
        assert!(watch.candidate(&dir.path().join("b.writing")).unwrap().is_none());
        assert!(watch.candidate(&dir.path().join("gone.txt")).unwrap().is_none());
        assert!(watch
            .candidate(Path::new("/elsewhere/a.txt"))
            .unwrap()
            .is_none());
    }

    /// 反复轮询直到有文件到达，最多约 5 秒
    async fn poll_until_found(watch: &mut WatchService) -> Vec<LocalFile> {
        for _ in 0..50 {
            let files = watch.poll_files().await.unwrap();
            if !files.is_empty() {
                return files;
            }
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        }
        Vec::new()
    }

    #[tokio::test]
    async fn test_relative_directory_receives_events() {
        let dir = tempfile::Builder::new()
            .prefix("watch-relative")
            .tempdir_in(".")
            .unwrap();
        let cwd = std::env::current_dir().unwrap();
        let relative = dir.path().strip_prefix(&cwd).unwrap_or(dir.path());
        assert!(relative.is_relative());

        let mut watch = WatchService::new(relative, ".writing");
        assert!(watch.start().await.unwrap().is_empty());

        std::fs::write(dir.path().join("a.txt.writing"), b"a").unwrap();
        std::fs::rename(dir.path().join("a.txt.writing"), dir.path().join("a.txt")).unwrap();

        let files = poll_until_found(&mut watch).await;
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].name, "a.txt");
        assert!(files[0].path.is_absolute());
        watch.stop();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unreadable_entry_does_not_drop_other_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut watch = WatchService::new(dir.path(), ".writing");
        watch.start().await.unwrap();

        std::fs::write(dir.path().join("a.txt.writing"), b"a").unwrap();
        std::fs::rename(dir.path().join("a.txt.writing"), dir.path().join("a.txt")).unwrap();
        // 指向自身的符号链接，读取元数据会失败
        std::os::unix::fs::symlink("loop", dir.path().join("loop")).unwrap();

        let files = poll_until_found(&mut watch).await;
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].name, "a.txt");
        watch.stop();
    }
}
