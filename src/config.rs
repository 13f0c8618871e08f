//! 配置模块
//!
//! 所有配置保存在配置目录下的 `config.json` 中，按段落划分：`source` 为同步源，`log` 为日志。

use crate::core::{FailedEntryPolicy, PostProcess, DEFAULT_TEMPORARY_FILE_SUFFIX};
use crate::db::SqliteMetadataStore;
use crate::error::{ConfigError, SourceError};
use crate::filters::{
    AcceptAllFileListFilter, AcceptOnceFileListFilter, CompositeFileListFilter, FileListFilter,
    MetadataStore, PersistentAcceptOnceFileListFilter, RegexPatternFileListFilter,
    SimpleMetadataStore, SimplePatternFileListFilter,
};
use crate::storage::FileInfo;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const CONFIG_FILE_NAME: &str = "config.json";

/// 读取 config.json 中的一个段落；文件或段落不存在时返回 None
pub fn load_section<T: DeserializeOwned>(
    config_dir: &Path,
    section: &str,
) -> Result<Option<T>, ConfigError> {
    let config_file = config_dir.join(CONFIG_FILE_NAME);
    if !config_file.exists() {
        return Ok(None);
    }

    let content = fs::read_to_string(&config_file)
        .map_err(|e| ConfigError::Load(format!("{:?}: {}", config_file, e)))?;
    let config: serde_json::Value = serde_json::from_str(&content)
        .map_err(|e| ConfigError::Load(format!("{:?}: {}", config_file, e)))?;

    match config.get(section) {
        Some(value) => serde_json::from_value(value.clone())
            .map(Some)
            .map_err(|e| ConfigError::Load(format!("{}: {}", section, e))),
        None => Ok(None),
    }
}

/// 存储类型
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    Local,
    S3,
    WebDav,
}

/// 远程存储配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageConfig {
    #[serde(rename = "type")]
    pub typ: StorageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webdav_endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<String>,
}

/// 远程文件列表过滤方式
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum FilterConfig {
    /// 进程内 accept-once
    AcceptOnce {
        #[serde(default, rename = "maxCapacity")]
        max_capacity: Option<usize>,
    },
    /// 基于元数据存储的 accept-once；未配置 sqlitePath 时使用内存存储
    Persistent {
        #[serde(default = "default_persistent_prefix")]
        prefix: String,
        #[serde(default, rename = "sqlitePath")]
        sqlite_path: Option<PathBuf>,
    },
    AcceptAll,
}

impl Default for FilterConfig {
    fn default() -> Self {
        FilterConfig::AcceptOnce { max_capacity: None }
    }
}

fn default_persistent_prefix() -> String {
    "remote:".to_string()
}

/// 本地扫描器配置
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ScannerConfig {
    /// 每次扫描最多返回的文件数，不设置表示不限制
    #[serde(default)]
    pub max_files: Option<usize>,
}

/// 同步源配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceConfig {
    pub storage: StorageConfig,
    pub remote_directory: String,
    pub local_directory: PathBuf,
    #[serde(default = "default_true")]
    pub auto_create_local_directory: bool,
    #[serde(default)]
    pub filter: FilterConfig,
    /// 文件名 glob 模式
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    /// 文件名正则表达式
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regex: Option<String>,
    /// 每次同步最多下载的文件数，负数表示不限制
    #[serde(default = "default_max_fetch_size")]
    pub max_fetch_size: i64,
    #[serde(default)]
    pub use_watch_service: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scanner: Option<ScannerConfig>,
    #[serde(default = "default_temporary_file_suffix")]
    pub temporary_file_suffix: String,
    #[serde(default)]
    pub preserve_timestamp: bool,
    #[serde(default)]
    pub post_process: PostProcess,
    #[serde(default)]
    pub failed_entry_policy: FailedEntryPolicy,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_max_fetch_size() -> i64 {
    -1
}

fn default_temporary_file_suffix() -> String {
    DEFAULT_TEMPORARY_FILE_SUFFIX.to_string()
}

fn default_poll_interval_secs() -> u64 {
    5
}

impl SourceConfig {
    /// 从配置目录加载 `source` 段落并校验
    pub fn load(config_dir: &Path) -> Result<Self, ConfigError> {
        let config: SourceConfig = load_section(config_dir, "source")?.ok_or_else(|| {
            ConfigError::Load(format!(
                "{:?} 中缺少 source 配置",
                config_dir.join(CONFIG_FILE_NAME)
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.remote_directory.trim().is_empty() {
            return Err(ConfigError::MissingRemoteDirectory);
        }
        if self.local_directory.as_os_str().is_empty() {
            return Err(ConfigError::MissingLocalDirectory);
        }
        if self.use_watch_service && self.scanner.is_some() {
            return Err(ConfigError::ScannerWithWatchService);
        }
        Ok(())
    }

    /// 构建远程文件过滤器：先按文件名匹配，再做 accept-once
    pub async fn build_filter(&self) -> Result<Arc<dyn FileListFilter<FileInfo>>, SourceError> {
        let mut filters: Vec<Arc<dyn FileListFilter<FileInfo>>> = Vec::new();

        if let Some(pattern) = &self.pattern {
            filters.push(Arc::new(SimplePatternFileListFilter::new(pattern)?));
        }
        if let Some(regex) = &self.regex {
            filters.push(Arc::new(RegexPatternFileListFilter::new(regex)?));
        }

        let once: Arc<dyn FileListFilter<FileInfo>> = match &self.filter {
            FilterConfig::AcceptOnce {
                max_capacity: Some(capacity),
            } => Arc::new(AcceptOnceFileListFilter::with_capacity(*capacity)),
            FilterConfig::AcceptOnce { max_capacity: None } => {
                Arc::new(AcceptOnceFileListFilter::new())
            }
            FilterConfig::Persistent {
                prefix,
                sqlite_path,
            } => {
                let store: Arc<dyn MetadataStore> = match sqlite_path {
                    Some(path) => Arc::new(SqliteMetadataStore::open(path).await?),
                    None => Arc::new(SimpleMetadataStore::new()),
                };
                Arc::new(PersistentAcceptOnceFileListFilter::new(store, prefix.clone()))
            }
            FilterConfig::AcceptAll => Arc::new(AcceptAllFileListFilter),
        };

        if filters.is_empty() {
            return Ok(once);
        }
        filters.push(once);
        Ok(Arc::new(CompositeFileListFilter::new(filters)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::DEFAULT_DONE_SUFFIX;

    fn write_config(dir: &Path, value: serde_json::Value) {
        fs::write(
            dir.join(CONFIG_FILE_NAME),
            serde_json::to_string_pretty(&value).unwrap(),
        )
        .unwrap();
    }

    #[test]
    fn test_load_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        write_config(
            dir.path(),
            serde_json::json!({
                "source": {
                    "storage": { "type": "local", "path": "/srv/remote" },
                    "remoteDirectory": "inbox",
                    "localDirectory": "/var/spool/inbox"
                }
            }),
        );

        let config = SourceConfig::load(dir.path()).unwrap();
        assert_eq!(config.storage.typ, StorageType::Local);
        assert_eq!(config.max_fetch_size, -1);
        assert!(config.auto_create_local_directory);
        assert_eq!(config.filter, FilterConfig::default());
        assert_eq!(config.temporary_file_suffix, ".writing");
        assert_eq!(config.post_process, PostProcess::None);
        assert_eq!(config.failed_entry_policy, FailedEntryPolicy::Retry);
        assert_eq!(config.poll_interval_secs, 5);
    }

    #[test]
    fn test_load_full_config() {
        let dir = tempfile::tempdir().unwrap();
        write_config(
            dir.path(),
            serde_json::json!({
                "log": { "level": "debug" },
                "source": {
                    "storage": {
                        "type": "s3",
                        "bucket": "drop",
                        "region": "us-east-1",
                        "accessKey": "ak",
                        "secretKey": "sk"
                    },
                    "remoteDirectory": "incoming",
                    "localDirectory": "/data/in",
                    "filter": { "type": "persistent", "prefix": "s3:", "sqlitePath": "/data/state.db" },
                    "pattern": "*.csv",
                    "maxFetchSize": 5,
                    "scanner": { "maxFiles": 2 },
                    "postProcess": { "type": "rename" },
                    "failedEntryPolicy": "skip"
                }
            }),
        );

        let config = SourceConfig::load(dir.path()).unwrap();
        assert_eq!(config.storage.access_key.as_deref(), Some("ak"));
        assert_eq!(
            config.filter,
            FilterConfig::Persistent {
                prefix: "s3:".to_string(),
                sqlite_path: Some(PathBuf::from("/data/state.db")),
            }
        );
        assert_eq!(config.scanner, Some(ScannerConfig { max_files: Some(2) }));
        assert_eq!(
            config.post_process,
            PostProcess::Rename {
                suffix: DEFAULT_DONE_SUFFIX.to_string()
            }
        );
        assert_eq!(config.failed_entry_policy, FailedEntryPolicy::Skip);
    }

    #[test]
    fn test_scanner_with_watch_service_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write_config(
            dir.path(),
            serde_json::json!({
                "source": {
                    "storage": { "type": "local", "path": "/srv/remote" },
                    "remoteDirectory": "inbox",
                    "localDirectory": "/data/in",
                    "useWatchService": true,
                    "scanner": {}
                }
            }),
        );

        assert!(matches!(
            SourceConfig::load(dir.path()),
            Err(ConfigError::ScannerWithWatchService)
        ));
    }

    #[test]
    fn test_missing_section_and_directories() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            SourceConfig::load(dir.path()),
            Err(ConfigError::Load(_))
        ));

        write_config(
            dir.path(),
            serde_json::json!({
                "source": {
                    "storage": { "type": "local", "path": "/srv/remote" },
                    "remoteDirectory": " ",
                    "localDirectory": "/data/in"
                }
            }),
        );
        assert!(matches!(
            SourceConfig::load(dir.path()),
            Err(ConfigError::MissingRemoteDirectory)
        ));
    }

    #[tokio::test]
    async fn test_build_filter_combines_pattern_and_accept_once() {
        let dir = tempfile::tempdir().unwrap();
        write_config(
            dir.path(),
            serde_json::json!({
                "source": {
                    "storage": { "type": "local", "path": "/srv/remote" },
                    "remoteDirectory": "inbox",
                    "localDirectory": "/data/in",
                    "pattern": "*.csv"
                }
            }),
        );
        let config = SourceConfig::load(dir.path()).unwrap();
        let filter = config.build_filter().await.unwrap();

        let entry = |name: &str| FileInfo {
            path: format!("inbox/{}", name),
            name: name.to_string(),
            size: 1,
            modified_time: 0,
            is_dir: false,
        };
        let listing = vec![entry("a.csv"), entry("b.txt")];
        assert_eq!(
            filter.filter_files(listing.clone()).await.unwrap(),
            vec![entry("a.csv")]
        );
        assert!(filter.filter_files(listing).await.unwrap().is_empty());
        assert!(filter.is_reversible());
    }
}
