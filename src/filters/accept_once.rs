use super::FileListFilter;
use crate::error::FilterError;
use crate::storage::FileEntry;
use async_trait::async_trait;
use std::collections::{HashSet, VecDeque};
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Debug, Default)]
struct SeenState {
    seen: HashSet<String>,
    /// 接受顺序，容量满时淘汰最早的键
    order: VecDeque<String>,
}

/// 每个路径只接受一次（进程内存）
#[derive(Debug, Default)]
pub struct AcceptOnceFileListFilter {
    state: Mutex<SeenState>,
    max_capacity: Option<usize>,
}

impl AcceptOnceFileListFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// 限制记住的路径数量，超出后最早接受的路径会被遗忘
    pub fn with_capacity(max_capacity: usize) -> Self {
        Self {
            state: Mutex::new(SeenState::default()),
            max_capacity: Some(max_capacity.max(1)),
        }
    }

    pub async fn seen_count(&self) -> usize {
        self.state.lock().await.seen.len()
    }
}

#[async_trait]
impl<F: FileEntry> FileListFilter<F> for AcceptOnceFileListFilter {
    async fn filter_files(&self, files: Vec<F>) -> Result<Vec<F>, FilterError> {
        let mut state = self.state.lock().await;
        let mut accepted = Vec::with_capacity(files.len());

        for file in files {
            let key = file.path().to_string();
            if state.seen.contains(&key) {
                continue;
            }

            if let Some(cap) = self.max_capacity {
                while state.order.len() >= cap {
                    if let Some(oldest) = state.order.pop_front() {
                        debug!("accept-once 容量已满，遗忘: {}", oldest);
                        state.seen.remove(&oldest);
                    }
                }
            }

            state.seen.insert(key.clone());
            state.order.push_back(key);
            accepted.push(file);
        }

        Ok(accepted)
    }

    fn is_reversible(&self) -> bool {
        true
    }

    async fn rollback(&self, file: &F) -> Result<bool, FilterError> {
        let mut state = self.state.lock().await;
        let key = file.path();
        if state.seen.remove(key) {
            state.order.retain(|k| k != key);
            Ok(true)
        } else {
            Ok(false)
        }
    }
}
