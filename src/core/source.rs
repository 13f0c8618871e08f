//! 同步源：每次接收前先同步远程目录，再从本地目录取出一个新文件

use super::scanner::{DirectoryScanner, LocalFile};
use super::synchronizer::{FetchLimit, RemoteFileSynchronizer};
use super::watcher::WatchService;
use crate::config::SourceConfig;
use crate::error::{ConfigError, SourceError};
use crate::storage::{create_session_factory, FileEntry, FileInfo};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// 本地变更检测方式，二者只能选其一
pub enum ChangeDetection {
    Scanner(DirectoryScanner),
    WatchService,
}

impl Default for ChangeDetection {
    fn default() -> Self {
        ChangeDetection::Scanner(DirectoryScanner::new())
    }
}

enum Detector {
    Scanner(DirectoryScanner),
    Watch(WatchService),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceState {
    Configured,
    Started,
    Stopped,
}

pub struct SourceBuilder<F: FileEntry> {
    synchronizer: RemoteFileSynchronizer<F>,
    local_directory: Option<PathBuf>,
    auto_create_local_directory: bool,
    max_fetch_size: FetchLimit,
    use_watch_service: bool,
    scanner: Option<DirectoryScanner>,
}

impl<F: FileEntry> SourceBuilder<F> {
    pub fn local_directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.local_directory = Some(directory.into());
        self
    }

    pub fn auto_create_local_directory(mut self, auto_create: bool) -> Self {
        self.auto_create_local_directory = auto_create;
        self
    }

    /// 负数表示不限制，0 表示不从远程抓取
    pub fn max_fetch_size(mut self, max_fetch_size: i64) -> Self {
        self.max_fetch_size = FetchLimit::from(max_fetch_size);
        self
    }

    pub fn use_watch_service(mut self, use_watch_service: bool) -> Self {
        self.use_watch_service = use_watch_service;
        self
    }

    pub fn scanner(mut self, scanner: DirectoryScanner) -> Self {
        self.scanner = Some(scanner);
        self
    }

    pub fn build(self) -> Result<SynchronizingSource<F>, ConfigError> {
        let local_directory = self
            .local_directory
            .filter(|p| !p.as_os_str().is_empty())
            .ok_or(ConfigError::MissingLocalDirectory)?;

        let detection = match (self.use_watch_service, self.scanner) {
            (true, Some(_)) => return Err(ConfigError::ScannerWithWatchService),
            (true, None) => ChangeDetection::WatchService,
            (false, Some(scanner)) => ChangeDetection::Scanner(scanner),
            (false, None) => ChangeDetection::default(),
        };

        let suffix = self.synchronizer.temporary_file_suffix().to_string();
        let detector = match detection {
            ChangeDetection::Scanner(mut scanner) => {
                scanner.set_temporary_file_suffix(&suffix);
                Detector::Scanner(scanner)
            }
            ChangeDetection::WatchService => {
                Detector::Watch(WatchService::new(local_directory.clone(), &suffix))
            }
        };

        Ok(SynchronizingSource {
            synchronizer: Arc::new(self.synchronizer),
            local_directory,
            auto_create_local_directory: self.auto_create_local_directory,
            max_fetch_size: self.max_fetch_size,
            detector,
            queue: VecDeque::new(),
            state: SourceState::Configured,
        })
    }
}

pub struct SynchronizingSource<F: FileEntry> {
    synchronizer: Arc<RemoteFileSynchronizer<F>>,
    local_directory: PathBuf,
    auto_create_local_directory: bool,
    max_fetch_size: FetchLimit,
    detector: Detector,
    queue: VecDeque<LocalFile>,
    state: SourceState,
}

impl<F: FileEntry> SynchronizingSource<F> {
    pub fn builder(synchronizer: RemoteFileSynchronizer<F>) -> SourceBuilder<F> {
        SourceBuilder {
            synchronizer,
            local_directory: None,
            auto_create_local_directory: true,
            max_fetch_size: FetchLimit::Unbounded,
            use_watch_service: false,
            scanner: None,
        }
    }

    pub fn state(&self) -> SourceState {
        self.state
    }

    pub fn local_directory(&self) -> &Path {
        &self.local_directory
    }

    pub fn synchronizer(&self) -> &RemoteFileSynchronizer<F> {
        &self.synchronizer
    }

    pub fn uses_watch_service(&self) -> bool {
        matches!(self.detector, Detector::Watch(_))
    }

    pub async fn start(&mut self) -> Result<(), SourceError> {
        if self.state == SourceState::Started {
            return Ok(());
        }

        self.ensure_local_directory().await?;

        if let Detector::Watch(watch) = &mut self.detector {
            let existing = watch.start().await?;
            self.queue.extend(existing);
        }

        self.state = SourceState::Started;
        info!(
            "同步源已启动: {} -> {:?}",
            self.synchronizer.remote_directory(),
            self.local_directory
        );
        Ok(())
    }

    pub fn stop(&mut self) {
        if self.state != SourceState::Started {
            return;
        }
        if let Detector::Watch(watch) = &mut self.detector {
            watch.stop();
        }
        self.state = SourceState::Stopped;
        info!("同步源已停止: {:?}", self.local_directory);
    }

    /// 同步远程目录后返回下一个本地文件；没有新文件时返回 None
    pub async fn receive(&mut self) -> Result<Option<LocalFile>, SourceError> {
        match self.state {
            SourceState::Configured => return Err(SourceError::NotStarted),
            SourceState::Stopped => return Err(SourceError::Stopped),
            SourceState::Started => {}
        }

        self.synchronizer
            .synchronize(&self.local_directory, self.max_fetch_size)
            .await?;

        match &mut self.detector {
            Detector::Scanner(scanner) => {
                if self.queue.is_empty() {
                    let files = scanner.list_files(&self.local_directory).await?;
                    self.queue.extend(files);
                }
            }
            Detector::Watch(watch) => {
                let files = watch.poll_files().await?;
                self.queue.extend(files);
            }
        }

        let next = self.queue.pop_front();
        if let Some(file) = &next {
            debug!("接收本地文件: {:?}", file.path);
        }
        Ok(next)
    }

    async fn ensure_local_directory(&self) -> Result<(), SourceError> {
        match tokio::fs::metadata(&self.local_directory).await {
            Ok(meta) if meta.is_dir() => Ok(()),
            Ok(_) => Err(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                format!("本地路径不是目录: {:?}", self.local_directory),
            )
            .into()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && self.auto_create_local_directory => {
                tokio::fs::create_dir_all(&self.local_directory).await?;
                info!("已创建本地目录: {:?}", self.local_directory);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// 在后台按固定间隔接收文件，返回控制句柄与文件流
    ///
    /// 每个间隔最多接收 max_messages_per_poll 个文件；接收出错时记录日志，下一个间隔重试。
    pub fn spawn_poller(
        mut self,
        interval: Duration,
        max_messages_per_poll: usize,
    ) -> (Poller<F>, ReceiverStream<LocalFile>) {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let (tx, rx) = mpsc::channel(max_messages_per_poll.max(1) * 4);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            'poll: loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        for _ in 0..max_messages_per_poll.max(1) {
                            match self.receive().await {
                                Ok(Some(file)) => {
                                    if tx.send(file).await.is_err() {
                                        debug!("文件流已关闭，停止轮询");
                                        break 'poll;
                                    }
                                }
                                Ok(None) => break,
                                Err(e) => {
                                    warn!("轮询失败，下个周期重试: {}", e);
                                    break;
                                }
                            }
                        }
                    }
                }
            }

            self.stop();
            self
        });

        (Poller { cancel, handle }, ReceiverStream::new(rx))
    }
}

impl SynchronizingSource<FileInfo> {
    /// 按配置构建同步源（未启动）
    pub async fn from_config(config: &SourceConfig) -> Result<Self, SourceError> {
        config.validate()?;

        let session_factory = create_session_factory(&config.storage).await?;
        let filter = config.build_filter().await?;

        let synchronizer = RemoteFileSynchronizer::new(session_factory, config.remote_directory.clone())
            .with_filter(filter)
            .with_temporary_file_suffix(config.temporary_file_suffix.clone())
            .with_preserve_timestamp(config.preserve_timestamp)
            .with_post_process(config.post_process.clone())
            .with_failed_entry_policy(config.failed_entry_policy);

        let mut builder = SynchronizingSource::builder(synchronizer)
            .local_directory(config.local_directory.clone())
            .auto_create_local_directory(config.auto_create_local_directory)
            .max_fetch_size(config.max_fetch_size)
            .use_watch_service(config.use_watch_service);

        if let Some(scanner) = &config.scanner {
            builder = builder.scanner(match scanner.max_files {
                Some(max) => DirectoryScanner::head(max),
                None => DirectoryScanner::new(),
            });
        }

        Ok(builder.build()?)
    }
}

/// 后台轮询任务的句柄
pub struct Poller<F: FileEntry> {
    cancel: CancellationToken,
    handle: JoinHandle<SynchronizingSource<F>>,
}

impl<F: FileEntry> Poller<F> {
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// 停止轮询并取回（已停止的）同步源
    pub async fn shutdown(self) -> Result<SynchronizingSource<F>, tokio::task::JoinError> {
        self.cancel.cancel();
        self.handle.await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{LocalSessionFactory, SessionFactory};
    use tokio_stream::StreamExt;

    fn synchronizer(remote: &Path) -> RemoteFileSynchronizer<FileInfo> {
        let factory: Arc<dyn SessionFactory<FileInfo>> =
            Arc::new(LocalSessionFactory::new(remote.to_str().unwrap()));
        RemoteFileSynchronizer::new(factory, "inbox")
    }

    fn remote_with(names: &[&str]) -> tempfile::TempDir {
        let remote = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(remote.path().join("inbox")).unwrap();
        for name in names {
            std::fs::write(remote.path().join("inbox").join(name), name).unwrap();
        }
        remote
    }

    #[test]
    fn test_build_rejects_scanner_with_watch_service() {
        let remote = remote_with(&[]);
        let result = SynchronizingSource::builder(synchronizer(remote.path()))
            .local_directory("/tmp/unused")
            .use_watch_service(true)
            .scanner(DirectoryScanner::head(1))
            .build();
        assert!(matches!(result, Err(ConfigError::ScannerWithWatchService)));
    }

    #[test]
    fn test_build_requires_local_directory() {
        let remote = remote_with(&[]);
        let result = SynchronizingSource::builder(synchronizer(remote.path())).build();
        assert!(matches!(result, Err(ConfigError::MissingLocalDirectory)));
    }

    #[tokio::test]
    async fn test_lifecycle() {
        let remote = remote_with(&["a.txt"]);
        let local = tempfile::tempdir().unwrap();
        let mut source = SynchronizingSource::builder(synchronizer(remote.path()))
            .local_directory(local.path().join("auto"))
            .build()
            .unwrap();

        assert_eq!(source.state(), SourceState::Configured);
        assert!(matches!(source.receive().await, Err(SourceError::NotStarted)));

        source.start().await.unwrap();
        assert!(local.path().join("auto").is_dir());

        let file = source.receive().await.unwrap().unwrap();
        assert_eq!(file.name, "a.txt");
        assert!(source.receive().await.unwrap().is_none());

        source.stop();
        assert_eq!(source.state(), SourceState::Stopped);
        assert!(matches!(source.receive().await, Err(SourceError::Stopped)));
    }

    #[tokio::test]
    async fn test_start_fails_without_auto_create() {
        let remote = remote_with(&[]);
        let local = tempfile::tempdir().unwrap();
        let mut source = SynchronizingSource::builder(synchronizer(remote.path()))
            .local_directory(local.path().join("missing"))
            .auto_create_local_directory(false)
            .build()
            .unwrap();

        assert!(matches!(source.start().await, Err(SourceError::Io(_))));
        assert_eq!(source.state(), SourceState::Configured);
    }

    #[tokio::test]
    async fn test_poller_streams_files_until_shutdown() {
        let remote = remote_with(&["a.txt", "b.txt"]);
        let local = tempfile::tempdir().unwrap();
        let mut source = SynchronizingSource::builder(synchronizer(remote.path()))
            .local_directory(local.path())
            .build()
            .unwrap();
        source.start().await.unwrap();

        let (poller, mut files) = source.spawn_poller(Duration::from_millis(10), 1);
        let mut names = vec![
            files.next().await.unwrap().name,
            files.next().await.unwrap().name,
        ];
        names.sort();
        assert_eq!(names, vec!["a.txt", "b.txt"]);

        let source = poller.shutdown().await.unwrap();
        assert_eq!(source.state(), SourceState::Stopped);
    }
}
