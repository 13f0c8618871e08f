//! 远程目录到本地目录的文件同步
//!
//! 远程存储（本地目录、S3、WebDAV）中的文件经过过滤后下载到本地目录，
//! 再由扫描器或文件监听把新出现的本地文件逐个交给调用方。

pub mod config;
pub mod core;
pub mod db;
pub mod error;
pub mod filters;
pub mod logging;
pub mod storage;

pub use config::{SourceConfig, StorageConfig, StorageType};
pub use core::{
    DirectoryScanner, FailedEntryPolicy, FetchLimit, LocalFile, PassSummary, PostProcess,
    RemoteFileSynchronizer, SynchronizingSource,
};
pub use error::{ConfigError, SourceError, SyncError, TransportError};
pub use storage::{FileEntry, FileInfo, Session, SessionFactory};

pub mod dirs {
    use std::path::PathBuf;

    pub fn config_dir() -> Option<PathBuf> {
        if cfg!(target_os = "windows") {
            std::env::var("APPDATA").ok().map(PathBuf::from)
        } else if cfg!(target_os = "macos") {
            std::env::var("HOME")
                .ok()
                .map(|h| PathBuf::from(h).join("Library").join("Application Support"))
        } else {
            std::env::var("XDG_CONFIG_HOME")
                .ok()
                .map(PathBuf::from)
                .or_else(|| {
                    std::env::var("HOME")
                        .ok()
                        .map(|h| PathBuf::from(h).join(".config"))
                })
        }
    }
}
