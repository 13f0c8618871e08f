use super::FileListFilter;
use crate::error::{ConfigError, FilterError};
use crate::storage::FileEntry;
use async_trait::async_trait;
use regex::Regex;

/// 按文件名匹配 glob 模式（`*` 与 `?`），目录按配置决定是否放行
#[derive(Debug, Clone)]
pub struct SimplePatternFileListFilter {
    pattern: String,
    regex: Regex,
    accept_directories: bool,
}

impl SimplePatternFileListFilter {
    pub fn new(pattern: &str) -> Result<Self, ConfigError> {
        let regex = Self::glob_to_regex(pattern)?;
        Ok(Self {
            pattern: pattern.to_string(),
            regex,
            accept_directories: false,
        })
    }

    pub fn accept_directories(mut self, accept: bool) -> Self {
        self.accept_directories = accept;
        self
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// 简单的 glob 模式转换
    fn glob_to_regex(pattern: &str) -> Result<Regex, ConfigError> {
        let mut regex_pattern = String::with_capacity(pattern.len() + 8);
        regex_pattern.push('^');
        for ch in pattern.chars() {
            match ch {
                '*' => regex_pattern.push_str(".*"),
                '?' => regex_pattern.push('.'),
                c => regex_pattern.push_str(&regex::escape(&c.to_string())),
            }
        }
        regex_pattern.push('$');

        Regex::new(&regex_pattern).map_err(|e| ConfigError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })
    }

    fn matches<F: FileEntry>(&self, file: &F) -> bool {
        (self.accept_directories && !file.is_file()) || self.regex.is_match(file.filename())
    }
}

#[async_trait]
impl<F: FileEntry> FileListFilter<F> for SimplePatternFileListFilter {
    async fn filter_files(&self, files: Vec<F>) -> Result<Vec<F>, FilterError> {
        Ok(files.into_iter().filter(|f| self.matches(f)).collect())
    }

    fn is_reversible(&self) -> bool {
        true
    }
}

/// 按文件名匹配正则表达式
#[derive(Debug, Clone)]
pub struct RegexPatternFileListFilter {
    regex: Regex,
    accept_directories: bool,
}

impl RegexPatternFileListFilter {
    pub fn new(pattern: &str) -> Result<Self, ConfigError> {
        let regex = Regex::new(pattern).map_err(|e| ConfigError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            regex,
            accept_directories: false,
        })
    }

    pub fn accept_directories(mut self, accept: bool) -> Self {
        self.accept_directories = accept;
        self
    }

    fn matches<F: FileEntry>(&self, file: &F) -> bool {
        (self.accept_directories && !file.is_file()) || self.regex.is_match(file.filename())
    }
}

#[async_trait]
impl<F: FileEntry> FileListFilter<F> for RegexPatternFileListFilter {
    async fn filter_files(&self, files: Vec<F>) -> Result<Vec<F>, FilterError> {
        Ok(files.into_iter().filter(|f| self.matches(f)).collect())
    }

    fn is_reversible(&self) -> bool {
        true
    }
}
