//! 文件列表过滤器
//!
//! 过滤器在每次同步时拿到完整的远程列表，返回本次允许传输的子集。
//! 有状态的过滤器（如 accept-once）需要支持撤销，这样传输失败或超出
//! 本次抓取上限的文件才能在下一次同步中重新被接受。

pub mod accept_once;
pub mod pattern;
pub mod persistent;

use crate::error::FilterError;
use crate::storage::FileEntry;
use async_trait::async_trait;
use std::sync::Arc;

pub use accept_once::AcceptOnceFileListFilter;
pub use pattern::{RegexPatternFileListFilter, SimplePatternFileListFilter};
pub use persistent::{MetadataStore, PersistentAcceptOnceFileListFilter, SimpleMetadataStore};

#[async_trait]
pub trait FileListFilter<F: FileEntry>: Send + Sync {
    /// 返回允许传输的条目，保持输入顺序
    async fn filter_files(&self, files: Vec<F>) -> Result<Vec<F>, FilterError>;

    /// 撤销后条目能否再次通过（无状态过滤器天然满足）
    fn is_reversible(&self) -> bool {
        false
    }

    /// 撤销对条目的接受，返回是否有状态被移除
    async fn rollback(&self, _file: &F) -> Result<bool, FilterError> {
        Ok(false)
    }
}

/// 接受所有条目
#[derive(Debug, Default, Clone)]
pub struct AcceptAllFileListFilter;

#[async_trait]
impl<F: FileEntry> FileListFilter<F> for AcceptAllFileListFilter {
    async fn filter_files(&self, files: Vec<F>) -> Result<Vec<F>, FilterError> {
        Ok(files)
    }

    fn is_reversible(&self) -> bool {
        true
    }
}

/// 按顺序串联多个过滤器，前一个的输出作为后一个的输入
pub struct CompositeFileListFilter<F: FileEntry> {
    filters: Vec<Arc<dyn FileListFilter<F>>>,
}

impl<F: FileEntry> CompositeFileListFilter<F> {
    pub fn new(filters: Vec<Arc<dyn FileListFilter<F>>>) -> Self {
        Self { filters }
    }

    pub fn add_filter(mut self, filter: Arc<dyn FileListFilter<F>>) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}

#[async_trait]
impl<F: FileEntry> FileListFilter<F> for CompositeFileListFilter<F> {
    async fn filter_files(&self, files: Vec<F>) -> Result<Vec<F>, FilterError> {
        let mut remaining = files;
        for filter in &self.filters {
            if remaining.is_empty() {
                break;
            }
            remaining = filter.filter_files(remaining).await?;
        }
        Ok(remaining)
    }

    fn is_reversible(&self) -> bool {
        self.filters.iter().all(|f| f.is_reversible())
    }

    async fn rollback(&self, file: &F) -> Result<bool, FilterError> {
        let mut removed = false;
        for filter in &self.filters {
            removed |= filter.rollback(file).await?;
        }
        Ok(removed)
    }
}
