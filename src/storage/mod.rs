pub mod local;
pub mod operator;
pub mod s3;
pub mod webdav;

use crate::config::{StorageConfig, StorageType};
use crate::error::{ConfigError, TransportError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::io::AsyncWrite;

pub use local::{LocalSession, LocalSessionFactory};
pub use operator::{OperatorSession, OperatorSessionFactory};
pub use s3::s3_session_factory;
pub use webdav::webdav_session_factory;

// ============ 公共常量 ============

/// 非 IO 操作超时（秒）- stat, delete 等
pub const OP_TIMEOUT_SECS: u64 = 60;
/// IO 操作超时（秒）- read, write 等
pub const IO_TIMEOUT_SECS: u64 = 300;

/// 远程列表条目的访问接口，由传输实现提供
pub trait FileEntry: Clone + Send + Sync + 'static {
    /// 列表返回的完整路径，用作去重键
    fn path(&self) -> &str;
    /// 路径中的文件名部分
    fn filename(&self) -> &str;
    fn is_file(&self) -> bool;
    /// 最后修改时间（Unix 秒）
    fn modified(&self) -> i64;
}

/// 文件信息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    pub path: String,
    pub name: String,
    pub size: u64,
    pub modified_time: i64,
    pub is_dir: bool,
}

impl FileEntry for FileInfo {
    fn path(&self) -> &str {
        &self.path
    }

    fn filename(&self) -> &str {
        &self.name
    }

    fn is_file(&self) -> bool {
        !self.is_dir
    }

    fn modified(&self) -> i64 {
        self.modified_time
    }
}

/// 纯路径条目：以 `/` 结尾的视为目录，没有修改时间
impl FileEntry for String {
    fn path(&self) -> &str {
        self
    }

    fn filename(&self) -> &str {
        self.trim_end_matches('/').rsplit('/').next().unwrap_or("")
    }

    fn is_file(&self) -> bool {
        !self.ends_with('/')
    }

    fn modified(&self) -> i64 {
        0
    }
}

/// 绑定到一个远程连接的会话
#[async_trait]
pub trait Session<F: FileEntry>: Send {
    /// 列出目录下的条目（不递归）
    async fn list(&mut self, path: &str) -> Result<Vec<F>, TransportError>;

    /// 把远程文件内容写入 sink
    async fn read(
        &mut self,
        path: &str,
        sink: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<(), TransportError>;

    /// 上传文件
    async fn write(&mut self, data: Vec<u8>, path: &str) -> Result<(), TransportError>;

    async fn exists(&mut self, path: &str) -> Result<bool, TransportError>;

    /// 删除远程文件，返回文件是否存在
    async fn remove(&mut self, path: &str) -> Result<bool, TransportError>;

    async fn rename(&mut self, from: &str, to: &str) -> Result<(), TransportError>;

    /// 释放会话，可重复调用
    fn close(&mut self);

    fn is_open(&self) -> bool;
}

/// 会话工厂
#[async_trait]
pub trait SessionFactory<F: FileEntry>: Send + Sync {
    async fn get_session(&self) -> Result<Box<dyn Session<F>>, TransportError>;

    /// 获取存储名称（用于日志）
    fn name(&self) -> &str;
}

/// 根据配置创建会话工厂
pub async fn create_session_factory(
    config: &StorageConfig,
) -> Result<Arc<dyn SessionFactory<FileInfo>>, ConfigError> {
    match config.typ {
        StorageType::Local => {
            let path = config
                .path
                .as_ref()
                .ok_or(ConfigError::MissingStorageField("path"))?;
            tracing::info!("初始化本地会话工厂: {}", path);
            Ok(Arc::new(LocalSessionFactory::new(path)) as Arc<dyn SessionFactory<FileInfo>>)
        }
        StorageType::S3 => {
            let bucket = config
                .bucket
                .as_ref()
                .ok_or(ConfigError::MissingStorageField("bucket"))?;
            let region = config
                .region
                .as_ref()
                .ok_or(ConfigError::MissingStorageField("region"))?;
            let access_key = config
                .access_key
                .as_ref()
                .ok_or(ConfigError::MissingStorageField("accessKey"))?;
            let secret_key = config
                .secret_key
                .as_ref()
                .ok_or(ConfigError::MissingStorageField("secretKey"))?;
            tracing::info!("初始化S3会话工厂: bucket={}, region={}", bucket, region);
            let factory = s3_session_factory(
                bucket,
                region,
                access_key,
                secret_key,
                config.endpoint.clone(),
                config.prefix.clone(),
            )
            .map_err(|e| ConfigError::Load(e.to_string()))?;
            Ok(Arc::new(factory) as Arc<dyn SessionFactory<FileInfo>>)
        }
        StorageType::WebDav => {
            let endpoint = config
                .webdav_endpoint
                .as_ref()
                .ok_or(ConfigError::MissingStorageField("webdavEndpoint"))?;
            let username = config
                .username
                .as_ref()
                .ok_or(ConfigError::MissingStorageField("username"))?;
            let password = config
                .password
                .as_ref()
                .ok_or(ConfigError::MissingStorageField("password"))?;
            tracing::info!("创建WebDAV会话工厂: endpoint={}, root={:?}", endpoint, config.root);
            let factory = webdav_session_factory(endpoint, username, password, config.root.clone())
                .await
                .map_err(|e| ConfigError::Load(e.to_string()))?;
            Ok(Arc::new(factory) as Arc<dyn SessionFactory<FileInfo>>)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_entry_accessors() {
        let file = "remote/dir/report.csv".to_string();
        assert_eq!(file.filename(), "report.csv");
        assert!(file.is_file());
        assert_eq!(file.modified(), 0);

        let dir = "remote/dir/".to_string();
        assert_eq!(dir.filename(), "dir");
        assert!(!dir.is_file());

        let bare = "foo".to_string();
        assert_eq!(bare.filename(), "foo");
    }
}
