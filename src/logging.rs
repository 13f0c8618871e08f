//! 日志模块 - 提供文件日志和大小管理功能

use crate::config::load_section;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

const LOG_FILE_NAME: &str = "remotesync.log";

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogConfig {
    /// 是否写入日志文件
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// 最大日志文件大小（MB）
    #[serde(default = "default_max_size_mb")]
    pub max_size_mb: u32,
    /// 日志级别: "error", "warn", "info", "debug", "trace"
    #[serde(default = "default_level")]
    pub level: String,
    /// 是否同时输出到控制台
    #[serde(default = "default_enabled")]
    pub console: bool,
}

fn default_enabled() -> bool {
    true
}

fn default_max_size_mb() -> u32 {
    5 // 默认 5MB
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            max_size_mb: default_max_size_mb(),
            level: default_level(),
            console: default_enabled(),
        }
    }
}

impl LogConfig {
    /// 从配置文件加载日志配置，缺失或无效时使用默认值
    pub fn load(config_dir: &Path) -> Self {
        match load_section::<LogConfig>(config_dir, "log") {
            Ok(Some(config)) => config,
            Ok(None) => Self::default(),
            Err(e) => {
                eprintln!("日志配置无效，使用默认配置: {}", e);
                Self::default()
            }
        }
    }

    /// 将配置的日志级别转换为 tracing Level
    pub fn tracing_level(&self) -> tracing::Level {
        match self.level.to_lowercase().as_str() {
            "error" => tracing::Level::ERROR,
            "warn" => tracing::Level::WARN,
            "debug" => tracing::Level::DEBUG,
            "trace" => tracing::Level::TRACE,
            _ => tracing::Level::INFO,
        }
    }
}

struct RotatingFile {
    writer: BufWriter<File>,
    written: u64,
}

/// 带大小限制的日志写入器，超出后轮转为 `.old`
#[derive(Clone)]
pub struct SizeRotatingWriter {
    file_path: PathBuf,
    max_size: u64,
    state: Arc<Mutex<RotatingFile>>,
}

impl SizeRotatingWriter {
    pub fn new(log_dir: &Path, max_size_mb: u32) -> io::Result<Self> {
        fs::create_dir_all(log_dir)?;

        let file_path = log_dir.join(LOG_FILE_NAME);
        let max_size = (max_size_mb.max(1) as u64) * 1024 * 1024;
        let state = Self::open_file(&file_path, max_size)?;

        Ok(Self {
            file_path,
            max_size,
            state: Arc::new(Mutex::new(state)),
        })
    }

    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    fn open_file(file_path: &Path, max_size: u64) -> io::Result<RotatingFile> {
        let mut written = fs::metadata(file_path).map(|m| m.len()).unwrap_or(0);
        if written > max_size {
            Self::rotate_log(file_path)?;
            written = 0;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(file_path)?;

        Ok(RotatingFile {
            writer: BufWriter::new(file),
            written,
        })
    }

    /// 轮转日志文件
    fn rotate_log(file_path: &Path) -> io::Result<()> {
        let backup_path = file_path.with_extension("log.old");
        if backup_path.exists() {
            fs::remove_file(&backup_path)?;
        }
        fs::rename(file_path, &backup_path)
    }

    fn lock(&self) -> MutexGuard<'_, RotatingFile> {
        // 写日志时 panic 不应导致之后的日志全部丢失
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// 单次日志写入
pub struct LogWriter<'a> {
    owner: &'a SizeRotatingWriter,
}

impl Write for LogWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.owner.lock();
        let n = state.writer.write(buf)?;
        state.writer.flush()?;
        state.written += n as u64;

        if state.written > self.owner.max_size {
            SizeRotatingWriter::rotate_log(&self.owner.file_path)?;
            *state = SizeRotatingWriter::open_file(&self.owner.file_path, self.owner.max_size)?;
        }

        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.owner.lock().writer.flush()
    }
}

impl<'a> MakeWriter<'a> for SizeRotatingWriter {
    type Writer = LogWriter<'a>;

    fn make_writer(&'a self) -> Self::Writer {
        LogWriter { owner: self }
    }
}

/// 默认配置目录，同时作为日志目录
pub fn default_config_dir() -> PathBuf {
    crate::dirs::config_dir()
        .map(|p| p.join("remotesync"))
        .unwrap_or_else(|| PathBuf::from(".remotesync"))
}

/// 初始化日志系统
///
/// 文件日志写入 `log_dir`；文件无法创建时回退到控制台。可以用 `RUST_LOG` 覆盖级别。
pub fn init_logging(log_dir: &Path, config: &LogConfig) {
    let directives = std::env::var(EnvFilter::DEFAULT_ENV)
        .unwrap_or_else(|_| config.tracing_level().to_string());
    let env_filter = EnvFilter::builder()
        .with_default_directive(config.tracing_level().into())
        .parse_lossy(format!("{},sqlx=warn,hyper=warn", directives));

    let console_layer = config.console.then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false)
    });

    let file_layer = if config.enabled {
        match SizeRotatingWriter::new(log_dir, config.max_size_mb) {
            Ok(writer) => Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_thread_names(false),
            ),
            Err(e) => {
                eprintln!("无法创建日志文件 {:?}: {}", log_dir, e);
                None
            }
        }
    } else {
        None
    };

    // 文件日志不可用时至少保留控制台输出
    let console_layer = match (&file_layer, console_layer) {
        (None, None) => Some(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false),
        ),
        (_, layer) => layer,
    };

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer);

    let _ = tracing::subscriber::set_global_default(subscriber);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_config_load() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(LogConfig::load(dir.path()).level, "info");

        fs::write(
            dir.path().join("config.json"),
            r#"{ "log": { "level": "DEBUG", "maxSizeMb": 1 } }"#,
        )
        .unwrap();
        let config = LogConfig::load(dir.path());
        assert_eq!(config.max_size_mb, 1);
        assert_eq!(config.tracing_level(), tracing::Level::DEBUG);
        assert!(config.enabled);
    }

    #[test]
    fn test_writer_rotates_when_full() {
        let dir = tempfile::tempdir().unwrap();
        let writer = SizeRotatingWriter::new(dir.path(), 1).unwrap();
        let chunk = vec![b'x'; 64 * 1024];

        for _ in 0..17 {
            writer.make_writer().write_all(&chunk).unwrap();
        }

        let backup = dir.path().join("remotesync.log.old");
        assert!(backup.exists());
        assert!(fs::metadata(&backup).unwrap().len() > 1024 * 1024);
        assert!(fs::metadata(writer.file_path()).unwrap().len() < 1024 * 1024);
    }
}
