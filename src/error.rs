//! 错误类型

use std::path::PathBuf;
use thiserror::Error;

/// 会话（远程传输）层错误
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("I/O 错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("存储错误: {0}")]
    Storage(#[from] opendal::Error),

    #[error("远程文件不存在: {0}")]
    NotFound(String),

    #[error("会话已关闭")]
    Closed,

    #[error("{0}")]
    Other(String),
}

/// 过滤器错误
#[derive(Debug, Error)]
pub enum FilterError {
    #[error("元数据存储错误: {0}")]
    Store(String),
}

impl From<sqlx::Error> for FilterError {
    fn from(e: sqlx::Error) -> Self {
        FilterError::Store(e.to_string())
    }
}

/// 同步错误：一次同步只会向调用方报告一个错误
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("获取远程会话失败")]
    Session(#[source] TransportError),

    #[error("列出远程目录失败: {directory}")]
    List {
        directory: String,
        #[source]
        source: TransportError,
    },

    #[error("同步远程文件失败: {remote_path}")]
    Transfer {
        remote_path: String,
        #[source]
        source: TransportError,
    },

    #[error("过滤文件列表失败")]
    Filter(#[from] FilterError),

    #[error("本地目录不可用: {path:?}")]
    LocalDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// 配置错误，在启动前报告
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("scanner 与 watch service 不能同时配置")]
    ScannerWithWatchService,

    #[error("缺少远程目录配置")]
    MissingRemoteDirectory,

    #[error("缺少本地目录配置")]
    MissingLocalDirectory,

    #[error("无效的匹配模式 {pattern}: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("存储配置缺少字段: {0}")]
    MissingStorageField(&'static str),

    #[error("加载配置失败: {0}")]
    Load(String),
}

/// 同步源错误
#[derive(Debug, Error)]
pub enum SourceError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error("同步源尚未启动")]
    NotStarted,

    #[error("同步源已停止")]
    Stopped,

    #[error("过滤本地文件失败: {0}")]
    Filter(#[from] FilterError),

    #[error("文件监听失败: {0}")]
    Watch(#[from] notify::Error),

    #[error("本地 I/O 错误: {0}")]
    Io(#[from] std::io::Error),
}
