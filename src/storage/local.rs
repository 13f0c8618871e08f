use super::{FileInfo, Session, SessionFactory};
use crate::error::TransportError;
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::fs;
use tokio::io::AsyncWrite;
use walkdir::WalkDir;

/// 以本地目录充当远程存储的会话
pub struct LocalSession {
    base_path: PathBuf,
    open: bool,
}

impl LocalSession {
    pub fn new(base_path: PathBuf) -> Self {
        Self {
            base_path,
            open: true,
        }
    }

    fn resolve_path(&self, path: &str) -> PathBuf {
        let path = path.trim_start_matches('/').trim_start_matches('\\');
        if path.is_empty() {
            self.base_path.clone()
        } else {
            self.base_path.join(path)
        }
    }

    /// 规范化路径分隔符（统一使用 /）
    fn normalize_path(path: &str) -> String {
        path.replace('\\', "/")
    }

    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.open {
            Ok(())
        } else {
            Err(TransportError::Closed)
        }
    }
}

#[async_trait]
impl Session<FileInfo> for LocalSession {
    async fn list(&mut self, path: &str) -> Result<Vec<FileInfo>, TransportError> {
        self.ensure_open()?;
        let dir = self.resolve_path(path);

        if !dir.exists() {
            return Ok(Vec::new());
        }

        let base_path = self.base_path.clone();

        // 使用 spawn_blocking 避免阻塞 async runtime
        let entries = tokio::task::spawn_blocking(move || {
            WalkDir::new(&dir)
                .min_depth(1)
                .max_depth(1)
                .follow_links(false)
                .sort_by_file_name()
                .into_iter()
                .filter_map(|e| e.ok())
                .filter_map(|entry| {
                    let metadata = entry.metadata().ok()?;
                    let relative_path = entry
                        .path()
                        .strip_prefix(&base_path)
                        .ok()?
                        .to_str()?
                        .to_string();

                    let modified = metadata
                        .modified()
                        .ok()?
                        .duration_since(std::time::UNIX_EPOCH)
                        .ok()?
                        .as_secs() as i64;

                    Some(FileInfo {
                        path: Self::normalize_path(&relative_path),
                        name: entry.file_name().to_str()?.to_string(),
                        size: if metadata.is_dir() { 0 } else { metadata.len() },
                        modified_time: modified,
                        is_dir: metadata.is_dir(),
                    })
                })
                .collect::<Vec<_>>()
        })
        .await
        .map_err(|e| TransportError::Other(format!("列目录任务失败: {}", e)))?;

        Ok(entries)
    }

    async fn read(
        &mut self,
        path: &str,
        sink: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<(), TransportError> {
        self.ensure_open()?;
        let full_path = self.resolve_path(path);
        let mut file = match fs::File::open(&full_path).await {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(TransportError::NotFound(path.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        tokio::io::copy(&mut file, sink).await?;
        Ok(())
    }

    async fn write(&mut self, data: Vec<u8>, path: &str) -> Result<(), TransportError> {
        self.ensure_open()?;
        let full_path = self.resolve_path(path);

        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // 使用临时文件写入，然后原子重命名
        let file_name = full_path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| TransportError::Other(format!("无效的文件路径: {}", path)))?;
        let temp_path =
            full_path.with_file_name(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4()));
        fs::write(&temp_path, data).await?;
        if let Err(e) = fs::rename(&temp_path, &full_path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }

        Ok(())
    }

    async fn exists(&mut self, path: &str) -> Result<bool, TransportError> {
        self.ensure_open()?;
        Ok(fs::try_exists(self.resolve_path(path)).await?)
    }

    async fn remove(&mut self, path: &str) -> Result<bool, TransportError> {
        self.ensure_open()?;
        let full_path = self.resolve_path(path);

        match fs::remove_file(&full_path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn rename(&mut self, from: &str, to: &str) -> Result<(), TransportError> {
        self.ensure_open()?;
        let to_path = self.resolve_path(to);
        if let Some(parent) = to_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::rename(self.resolve_path(from), &to_path).await?;
        Ok(())
    }

    fn close(&mut self) {
        self.open = false;
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

/// 本地会话工厂
pub struct LocalSessionFactory {
    base_path: PathBuf,
    name: String,
}

impl LocalSessionFactory {
    pub fn new(path: &str) -> Self {
        Self {
            base_path: PathBuf::from(path),
            name: format!("local:{}", path),
        }
    }
}

#[async_trait]
impl SessionFactory<FileInfo> for LocalSessionFactory {
    async fn get_session(&self) -> Result<Box<dyn Session<FileInfo>>, TransportError> {
        if !self.base_path.is_dir() {
            return Err(TransportError::NotFound(self.base_path.display().to_string()));
        }
        Ok(Box::new(LocalSession::new(self.base_path.clone())))
    }

    fn name(&self) -> &str {
        &self.name
    }
}
