//! 远程目录到本地目录的同步
//!
//! 一次同步（pass）：获取会话 → 列出远程目录 → 过滤 → 按抓取上限逐个下载 → 释放会话。
//! 下载先写入带临时后缀的文件，完成后原子重命名，本地观察者不会看到半个文件。
//! 单个文件失败时本次同步立即停止，并把失败文件及其后的文件从过滤器中撤销，
//! 下一次同步会重新尝试它们。

use crate::error::{SyncError, TransportError};
use crate::filters::{AcceptOnceFileListFilter, FileListFilter};
use crate::storage::{FileEntry, Session, SessionFactory};
use filetime::FileTime;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info, warn};

/// 默认的下载临时文件后缀
pub const DEFAULT_TEMPORARY_FILE_SUFFIX: &str = ".writing";
/// 默认的完成标记后缀
pub const DEFAULT_DONE_SUFFIX: &str = ".done";

/// 单次同步的抓取上限
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FetchLimit {
    #[default]
    Unbounded,
    Capped(usize),
}

impl FetchLimit {
    /// 负数表示不限制
    pub fn from_max_fetch_size(max_fetch_size: i64) -> Self {
        if max_fetch_size < 0 {
            FetchLimit::Unbounded
        } else {
            FetchLimit::Capped(max_fetch_size as usize)
        }
    }

    pub fn is_zero(&self) -> bool {
        matches!(self, FetchLimit::Capped(0))
    }
}

impl From<i64> for FetchLimit {
    fn from(max_fetch_size: i64) -> Self {
        Self::from_max_fetch_size(max_fetch_size)
    }
}

/// 下载成功后对远程文件的处理
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PostProcess {
    #[default]
    None,
    Remove,
    /// 重命名为 `<远程路径><suffix>`
    Rename {
        #[serde(default = "default_done_suffix")]
        suffix: String,
    },
}

fn default_done_suffix() -> String {
    DEFAULT_DONE_SUFFIX.to_string()
}

/// 下载失败的文件是否在下一次同步中重试
///
/// 过滤器在下载前就已接受文件，失败后能否重试取决于过滤器是否支持撤销。
/// 失败文件之后尚未尝试的文件总会被撤销。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailedEntryPolicy {
    /// 撤销失败文件，下一次同步重试
    #[default]
    Retry,
    /// 失败文件保持已接受状态，不再重试
    Skip,
}

/// 一次同步的统计
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PassSummary {
    pub listed: usize,
    pub accepted: usize,
    pub copied: usize,
    /// 本地已存在而跳过的文件
    pub skipped: usize,
}

pub type LocalFilenameGenerator = Arc<dyn Fn(&str) -> String + Send + Sync>;

pub struct RemoteFileSynchronizer<F: FileEntry> {
    session_factory: Arc<dyn SessionFactory<F>>,
    remote_directory: String,
    remote_file_separator: String,
    filter: Arc<dyn FileListFilter<F>>,
    temporary_file_suffix: String,
    preserve_timestamp: bool,
    post_process: PostProcess,
    failed_entry_policy: FailedEntryPolicy,
    local_filename_generator: Option<LocalFilenameGenerator>,
}

impl<F: FileEntry> RemoteFileSynchronizer<F> {
    /// 默认使用进程内的 accept-once 过滤器
    pub fn new(session_factory: Arc<dyn SessionFactory<F>>, remote_directory: impl Into<String>) -> Self {
        Self {
            session_factory,
            remote_directory: remote_directory.into(),
            remote_file_separator: "/".to_string(),
            filter: Arc::new(AcceptOnceFileListFilter::new()),
            temporary_file_suffix: DEFAULT_TEMPORARY_FILE_SUFFIX.to_string(),
            preserve_timestamp: false,
            post_process: PostProcess::None,
            failed_entry_policy: FailedEntryPolicy::Retry,
            local_filename_generator: None,
        }
    }

    pub fn with_filter(mut self, filter: Arc<dyn FileListFilter<F>>) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_remote_file_separator(mut self, separator: impl Into<String>) -> Self {
        self.remote_file_separator = separator.into();
        self
    }

    pub fn with_temporary_file_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.temporary_file_suffix = suffix.into();
        self
    }

    pub fn with_preserve_timestamp(mut self, preserve: bool) -> Self {
        self.preserve_timestamp = preserve;
        self
    }

    pub fn with_post_process(mut self, post_process: PostProcess) -> Self {
        self.post_process = post_process;
        self
    }

    pub fn with_failed_entry_policy(mut self, policy: FailedEntryPolicy) -> Self {
        self.failed_entry_policy = policy;
        self
    }

    pub fn with_local_filename_generator(mut self, generator: LocalFilenameGenerator) -> Self {
        self.local_filename_generator = Some(generator);
        self
    }

    pub fn remote_directory(&self) -> &str {
        &self.remote_directory
    }

    pub fn temporary_file_suffix(&self) -> &str {
        &self.temporary_file_suffix
    }

    /// 执行一次同步
    ///
    /// 成功时返回统计；任意文件失败时返回唯一的 [`SyncError`]，失败前已下载的文件保留在本地。
    /// 会话在所有路径上都会被关闭且只关闭一次。
    pub async fn synchronize(
        &self,
        local_directory: &Path,
        limit: FetchLimit,
    ) -> Result<PassSummary, SyncError> {
        if limit.is_zero() {
            debug!("抓取上限为 0，跳过同步: {}", self.remote_directory);
            return Ok(PassSummary::default());
        }

        match fs::metadata(local_directory).await {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => {
                return Err(SyncError::LocalDirectory {
                    path: local_directory.to_path_buf(),
                    source: std::io::Error::new(std::io::ErrorKind::Other, "不是目录"),
                })
            }
            Err(source) => {
                return Err(SyncError::LocalDirectory {
                    path: local_directory.to_path_buf(),
                    source,
                })
            }
        }

        let session = self
            .session_factory
            .get_session()
            .await
            .map_err(SyncError::Session)?;

        let mut session = scopeguard::guard(session, |mut s| {
            s.close();
        });

        self.run_pass(&mut **session, local_directory, limit).await
    }

    async fn run_pass(
        &self,
        session: &mut dyn Session<F>,
        local_directory: &Path,
        limit: FetchLimit,
    ) -> Result<PassSummary, SyncError> {
        let storage = self.session_factory.name();
        let mut summary = PassSummary::default();

        let entries = session
            .list(&self.remote_directory)
            .await
            .map_err(|source| SyncError::List {
                directory: self.remote_directory.clone(),
                source,
            })?;
        summary.listed = entries.len();

        // 仅同步当前目录下的文件，不递归
        let files: Vec<F> = entries
            .into_iter()
            .filter(|e| e.is_file() && !self.is_done_marker(e.filename()))
            .collect();

        if files.is_empty() {
            debug!("远程目录没有可同步的文件: [{}] {}", storage, self.remote_directory);
            return Ok(summary);
        }

        let mut accepted = self.filter.filter_files(files).await?;

        if let FetchLimit::Capped(max) = limit {
            if accepted.len() > max {
                let deferred = accepted.split_off(max);
                debug!("超出抓取上限 {}，推迟 {} 个文件", max, deferred.len());
                self.rollback_entries(&deferred).await?;
            }
        }
        summary.accepted = accepted.len();

        for (index, file) in accepted.iter().enumerate() {
            match self
                .copy_file_to_local_directory(session, file, local_directory)
                .await
            {
                Ok(true) => summary.copied += 1,
                Ok(false) => summary.skipped += 1,
                Err(source) => {
                    let remote_path = self.remote_path(file.filename());
                    error!("同步远程文件失败: {}: {}", remote_path, source);

                    let retry_from = match self.failed_entry_policy {
                        FailedEntryPolicy::Retry => index,
                        FailedEntryPolicy::Skip => index + 1,
                    };
                    if let Err(e) = self.rollback_entries(&accepted[retry_from..]).await {
                        warn!("撤销过滤器状态失败: {}", e);
                    }

                    return Err(SyncError::Transfer {
                        remote_path,
                        source,
                    });
                }
            }
        }

        info!(
            "同步完成: [{}] {} (列出 {}, 接受 {}, 下载 {}, 跳过 {})",
            storage,
            self.remote_directory,
            summary.listed,
            summary.accepted,
            summary.copied,
            summary.skipped
        );

        Ok(summary)
    }

    async fn rollback_entries(&self, entries: &[F]) -> Result<(), SyncError> {
        if entries.is_empty() {
            return Ok(());
        }

        if !self.filter.is_reversible() {
            warn!(
                "过滤器不支持撤销，{} 个文件不会在后续同步中重试",
                entries.len()
            );
            return Ok(());
        }

        for entry in entries {
            self.filter.rollback(entry).await?;
        }
        debug!("已撤销 {} 个文件的过滤状态", entries.len());
        Ok(())
    }

    /// 下载单个文件；本地已存在时返回 false
    async fn copy_file_to_local_directory(
        &self,
        session: &mut dyn Session<F>,
        file: &F,
        local_directory: &Path,
    ) -> Result<bool, TransportError> {
        let remote_path = self.remote_path(file.filename());
        let local_name = self.local_filename(file.filename());
        let local_file = local_directory.join(&local_name);

        if fs::try_exists(&local_file).await? {
            debug!("本地文件已存在，跳过: {:?}", local_file);
            return Ok(false);
        }

        let temp_file =
            local_directory.join(format!("{}{}", local_name, self.temporary_file_suffix));

        debug!("下载: {} -> {:?}", remote_path, local_file);

        let download = async {
            let mut out = fs::File::create(&temp_file).await?;
            session.read(&remote_path, &mut out).await?;
            out.flush().await?;
            out.sync_all().await?;
            Ok::<(), TransportError>(())
        }
        .await;

        if let Err(e) = download {
            let _ = fs::remove_file(&temp_file).await;
            return Err(e);
        }

        if let Err(e) = fs::rename(&temp_file, &local_file).await {
            let _ = fs::remove_file(&temp_file).await;
            return Err(e.into());
        }

        if self.preserve_timestamp {
            filetime::set_file_mtime(&local_file, FileTime::from_unix_time(file.modified(), 0))?;
        }

        self.apply_post_process(session, &remote_path).await?;

        Ok(true)
    }

    async fn apply_post_process(
        &self,
        session: &mut dyn Session<F>,
        remote_path: &str,
    ) -> Result<(), TransportError> {
        match &self.post_process {
            PostProcess::None => {}
            PostProcess::Remove => {
                if session.remove(remote_path).await? {
                    debug!("已删除远程文件: {}", remote_path);
                } else {
                    warn!("远程文件已不存在: {}", remote_path);
                }
            }
            PostProcess::Rename { suffix } => {
                let done_path = format!("{}{}", remote_path, suffix);
                session.rename(remote_path, &done_path).await?;
                debug!("远程文件已标记完成: {}", done_path);
            }
        }
        Ok(())
    }

    fn is_done_marker(&self, filename: &str) -> bool {
        match &self.post_process {
            PostProcess::Rename { suffix } => !suffix.is_empty() && filename.ends_with(suffix),
            _ => false,
        }
    }

    fn remote_path(&self, filename: &str) -> String {
        if self.remote_directory.is_empty() {
            filename.to_string()
        } else if self.remote_directory.ends_with(&self.remote_file_separator) {
            format!("{}{}", self.remote_directory, filename)
        } else {
            format!(
                "{}{}{}",
                self.remote_directory, self.remote_file_separator, filename
            )
        }
    }

    fn local_filename(&self, remote_filename: &str) -> String {
        match &self.local_filename_generator {
            Some(generator) => generator(remote_filename),
            None => remote_filename.to_string(),
        }
    }
}
