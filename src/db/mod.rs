//! sqlite 元数据存储，让 accept-once 状态跨进程重启保留

use crate::error::FilterError;
use crate::filters::MetadataStore;
use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
pub use sqlx::SqlitePool;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// 元数据行
#[derive(Debug, sqlx::FromRow)]
struct MetadataRow {
    value: String,
}

pub struct SqliteMetadataStore {
    db: Arc<SqlitePool>,
}

impl SqliteMetadataStore {
    /// 打开（或创建）数据库文件
    pub async fn open(db_path: &Path) -> Result<Self, FilterError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| FilterError::Store(e.to_string()))?;
        }

        // SQLite 连接字符串格式: sqlite://path 或 sqlite:path
        // Windows 路径需要转换反斜杠为正斜杠
        let db_path_str = db_path
            .to_str()
            .ok_or_else(|| FilterError::Store("Invalid database path".to_string()))?
            .replace('\\', "/");

        let db = SqlitePoolOptions::new()
            .max_connections(5) // SQLite 单文件，不需要太多连接
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600)) // 10分钟空闲超时
            .connect(&format!("sqlite:{}?mode=rwc", db_path_str))
            .await?;

        Self::from_pool(Arc::new(db)).await
    }

    /// 使用已有连接池，必要时建表
    pub async fn from_pool(db: Arc<SqlitePool>) -> Result<Self, FilterError> {
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS metadata_store (
                   key TEXT PRIMARY KEY NOT NULL,
                   value TEXT NOT NULL,
                   updated_at INTEGER NOT NULL
               )"#,
        )
        .execute(&*db)
        .await?;

        Ok(Self { db })
    }

    /// 关闭连接池
    pub async fn close(&self) {
        self.db.close().await;
    }
}

#[async_trait]
impl MetadataStore for SqliteMetadataStore {
    async fn put(&self, key: &str, value: &str) -> Result<(), FilterError> {
        let now = chrono::Utc::now().timestamp();

        sqlx::query(
            r#"INSERT INTO metadata_store (key, value, updated_at)
               VALUES (?, ?, ?)
               ON CONFLICT(key) DO UPDATE SET
                   value = excluded.value,
                   updated_at = excluded.updated_at"#,
        )
        .bind(key)
        .bind(value)
        .bind(now)
        .execute(&*self.db)
        .await?;

        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, FilterError> {
        let row = sqlx::query_as::<_, MetadataRow>("SELECT value FROM metadata_store WHERE key = ?")
            .bind(key)
            .fetch_optional(&*self.db)
            .await?;

        Ok(row.map(|r| r.value))
    }

    async fn put_if_absent(&self, key: &str, value: &str) -> Result<Option<String>, FilterError> {
        let now = chrono::Utc::now().timestamp();

        let result = sqlx::query(
            r#"INSERT INTO metadata_store (key, value, updated_at)
               VALUES (?, ?, ?)
               ON CONFLICT(key) DO NOTHING"#,
        )
        .bind(key)
        .bind(value)
        .bind(now)
        .execute(&*self.db)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(None);
        }

        self.get(key).await
    }

    async fn replace(
        &self,
        key: &str,
        old_value: &str,
        new_value: &str,
    ) -> Result<bool, FilterError> {
        let now = chrono::Utc::now().timestamp();

        let result = sqlx::query(
            "UPDATE metadata_store SET value = ?, updated_at = ? WHERE key = ? AND value = ?",
        )
        .bind(new_value)
        .bind(now)
        .bind(key)
        .bind(old_value)
        .execute(&*self.db)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn remove(&self, key: &str) -> Result<Option<String>, FilterError> {
        let existing = self.get(key).await?;
        if existing.is_some() {
            sqlx::query("DELETE FROM metadata_store WHERE key = ?")
                .bind(key)
                .execute(&*self.db)
                .await?;
            debug!("移除元数据: {}", key);
        }
        Ok(existing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::{FileListFilter, PersistentAcceptOnceFileListFilter};

    #[tokio::test]
    async fn test_store_semantics() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteMetadataStore::open(&dir.path().join("meta.db"))
            .await
            .unwrap();

        assert_eq!(store.put_if_absent("k", "1").await.unwrap(), None);
        assert_eq!(
            store.put_if_absent("k", "2").await.unwrap(),
            Some("1".to_string())
        );
        assert!(store.replace("k", "1", "5").await.unwrap());
        assert!(!store.replace("k", "1", "6").await.unwrap());
        store.put("other", "x").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some("5".to_string()));
        assert_eq!(store.remove("k").await.unwrap(), Some("5".to_string()));
        assert_eq!(store.remove("k").await.unwrap(), None);
        assert_eq!(store.get("other").await.unwrap(), Some("x".to_string()));
        store.close().await;
    }

    #[tokio::test]
    async fn test_filter_state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("state/meta.db");
        let listing = vec!["foo".to_string(), "bar".to_string()];

        {
            let store = Arc::new(SqliteMetadataStore::open(&db_path).await.unwrap());
            let filter = PersistentAcceptOnceFileListFilter::new(store.clone(), "inbox:");
            assert_eq!(filter.filter_files(listing.clone()).await.unwrap().len(), 2);
            store.close().await;
        }

        let store = Arc::new(SqliteMetadataStore::open(&db_path).await.unwrap());
        let filter = PersistentAcceptOnceFileListFilter::new(store, "inbox:");
        assert!(filter.filter_files(listing).await.unwrap().is_empty());
    }
}
