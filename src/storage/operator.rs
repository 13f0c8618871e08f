//! 基于 opendal Operator 的会话，S3 与 WebDAV 共用

use super::{FileInfo, Session, SessionFactory};
use crate::error::TransportError;
use async_trait::async_trait;
use futures::TryStreamExt;
use opendal::{ErrorKind, Metakey, Operator};
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// 下载时每次读取的字节数
const READ_CHUNK_SIZE: u64 = 4 * 1024 * 1024;

pub struct OperatorSession {
    operator: Operator,
    open: bool,
    chunk_size: u64,
}

impl OperatorSession {
    pub fn new(operator: Operator) -> Self {
        Self {
            operator,
            open: true,
            chunk_size: READ_CHUNK_SIZE,
        }
    }

    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.open {
            Ok(())
        } else {
            Err(TransportError::Closed)
        }
    }

    /// opendal 要求目录路径以 `/` 结尾
    fn dir_path(path: &str) -> String {
        let path = path.replace('\\', "/");
        let path = path.trim_start_matches('/');
        if path.is_empty() || path.ends_with('/') {
            path.to_string()
        } else {
            format!("{}/", path)
        }
    }

    fn not_found(path: &str, e: opendal::Error) -> TransportError {
        if e.kind() == ErrorKind::NotFound {
            TransportError::NotFound(path.to_string())
        } else {
            e.into()
        }
    }
}

#[async_trait]
impl Session<FileInfo> for OperatorSession {
    async fn list(&mut self, path: &str) -> Result<Vec<FileInfo>, TransportError> {
        self.ensure_open()?;
        let dir = Self::dir_path(path);
        let mut files = Vec::new();

        let mut lister = self
            .operator
            .lister_with(&dir)
            .metakey(Metakey::ContentLength | Metakey::LastModified | Metakey::Mode)
            .await?;

        while let Some(entry) = lister.try_next().await? {
            let path_str = entry.path().to_string();

            // 跳过目录自身
            if path_str.is_empty() || path_str == "/" || path_str == dir {
                continue;
            }

            let meta = entry.metadata();

            files.push(FileInfo {
                path: path_str.trim_start_matches('/').to_string(),
                name: entry.name().trim_end_matches('/').to_string(),
                size: meta.content_length(),
                modified_time: meta.last_modified().map_or(0, |t| t.timestamp()),
                is_dir: meta.is_dir(),
            });
        }

        Ok(files)
    }

    async fn read(
        &mut self,
        path: &str,
        sink: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<(), TransportError> {
        self.ensure_open()?;
        let size = self
            .operator
            .stat(path)
            .await
            .map_err(|e| Self::not_found(path, e))?
            .content_length();
        let reader = self
            .operator
            .reader(path)
            .await
            .map_err(|e| Self::not_found(path, e))?;

        // 分段读取，避免整个文件驻留内存
        let mut offset = 0;
        while offset < size {
            let end = (offset + self.chunk_size).min(size);
            let buffer = reader
                .read(offset..end)
                .await
                .map_err(|e| Self::not_found(path, e))?;
            for bytes in buffer {
                sink.write_all(&bytes).await?;
            }
            offset = end;
        }
        sink.flush().await?;
        Ok(())
    }

    async fn write(&mut self, data: Vec<u8>, path: &str) -> Result<(), TransportError> {
        self.ensure_open()?;
        self.operator.write(path, data).await?;
        Ok(())
    }

    async fn exists(&mut self, path: &str) -> Result<bool, TransportError> {
        self.ensure_open()?;
        match self.operator.stat(path).await {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn remove(&mut self, path: &str) -> Result<bool, TransportError> {
        // S3 删除不存在的文件不会报错，先确认是否存在
        if !self.exists(path).await? {
            return Ok(false);
        }
        match self.operator.delete(path).await {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn rename(&mut self, from: &str, to: &str) -> Result<(), TransportError> {
        self.ensure_open()?;
        match self.operator.rename(from, to).await {
            Ok(()) => Ok(()),
            // S3 没有 rename，退化为 copy + delete
            Err(e) if e.kind() == ErrorKind::Unsupported => {
                self.operator
                    .copy(from, to)
                    .await
                    .map_err(|e| Self::not_found(from, e))?;
                self.operator.delete(from).await?;
                Ok(())
            }
            Err(e) => Err(Self::not_found(from, e)),
        }
    }

    fn close(&mut self) {
        self.open = false;
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

/// 每次获取会话都复用同一个 Operator（内部已带连接池）
pub struct OperatorSessionFactory {
    operator: Operator,
    name: String,
}

impl OperatorSessionFactory {
    pub fn new(operator: Operator, name: String) -> Self {
        Self { operator, name }
    }
}

#[async_trait]
impl SessionFactory<FileInfo> for OperatorSessionFactory {
    async fn get_session(&self) -> Result<Box<dyn Session<FileInfo>>, TransportError> {
        Ok(Box::new(OperatorSession::new(self.operator.clone())))
    }

    fn name(&self) -> &str {
        &self.name
    }
}
