//! 基于元数据存储的 accept-once 过滤器
//!
//! 键为 `prefix + path`，值为文件修改时间。修改时间变化的文件会被再次接受。

use super::FileListFilter;
use crate::error::FilterError;
use crate::storage::FileEntry;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

/// 键值元数据存储
#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn put(&self, key: &str, value: &str) -> Result<(), FilterError>;

    async fn get(&self, key: &str) -> Result<Option<String>, FilterError>;

    /// 键不存在时写入并返回 None，否则返回现有值
    async fn put_if_absent(&self, key: &str, value: &str) -> Result<Option<String>, FilterError>;

    /// 仅当当前值等于 old_value 时替换
    async fn replace(&self, key: &str, old_value: &str, new_value: &str)
        -> Result<bool, FilterError>;

    async fn remove(&self, key: &str) -> Result<Option<String>, FilterError>;
}

/// 内存元数据存储
#[derive(Debug, Default)]
pub struct SimpleMetadataStore {
    entries: Mutex<HashMap<String, String>>,
}

impl SimpleMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MetadataStore for SimpleMetadataStore {
    async fn put(&self, key: &str, value: &str) -> Result<(), FilterError> {
        self.entries
            .lock()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, FilterError> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn put_if_absent(&self, key: &str, value: &str) -> Result<Option<String>, FilterError> {
        let mut entries = self.entries.lock().await;
        if let Some(existing) = entries.get(key) {
            return Ok(Some(existing.clone()));
        }
        entries.insert(key.to_string(), value.to_string());
        Ok(None)
    }

    async fn replace(
        &self,
        key: &str,
        old_value: &str,
        new_value: &str,
    ) -> Result<bool, FilterError> {
        let mut entries = self.entries.lock().await;
        match entries.get_mut(key) {
            Some(current) if current == old_value => {
                *current = new_value.to_string();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn remove(&self, key: &str) -> Result<Option<String>, FilterError> {
        Ok(self.entries.lock().await.remove(key))
    }
}

pub struct PersistentAcceptOnceFileListFilter {
    store: Arc<dyn MetadataStore>,
    prefix: String,
}

impl PersistentAcceptOnceFileListFilter {
    pub fn new(store: Arc<dyn MetadataStore>, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
        }
    }

    fn key<F: FileEntry>(&self, file: &F) -> String {
        format!("{}{}", self.prefix, file.path())
    }

    async fn accept<F: FileEntry>(&self, file: &F) -> Result<bool, FilterError> {
        let key = self.key(file);
        let new_value = file.modified().to_string();

        match self.store.put_if_absent(&key, &new_value).await? {
            None => Ok(true),
            Some(old_value) if old_value != new_value => {
                let replaced = self.store.replace(&key, &old_value, &new_value).await?;
                if replaced {
                    debug!("文件已更新，重新接受: {}", key);
                }
                Ok(replaced)
            }
            Some(_) => Ok(false),
        }
    }
}

#[async_trait]
impl<F: FileEntry> FileListFilter<F> for PersistentAcceptOnceFileListFilter {
    async fn filter_files(&self, files: Vec<F>) -> Result<Vec<F>, FilterError> {
        let mut accepted = Vec::with_capacity(files.len());
        for file in files {
            if self.accept(&file).await? {
                accepted.push(file);
            }
        }
        Ok(accepted)
    }

    fn is_reversible(&self) -> bool {
        true
    }

    async fn rollback(&self, file: &F) -> Result<bool, FilterError> {
        Ok(self.store.remove(&self.key(file)).await?.is_some())
    }
}
