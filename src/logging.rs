//! 日志模块 - 提供文件日志和大小管理功能

use crate::config;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::EnvFilter;

/// 日志文件名
pub const LOG_FILE_NAME: &str = "photosync.log";

/// 日志配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
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
        }
    }
}

impl LogConfig {
    /// 从配置文件加载日志配置
    pub fn load(config_dir: &Path) -> Self {
        config::read_section(config_dir, "log")
            .and_then(|value| serde_json::from_value::<LogConfig>(value).ok())
            .unwrap_or_default()
    }

    /// 保存日志配置
    pub fn save(&self, config_dir: &Path) -> io::Result<()> {
        config::write_section(config_dir, "log", serde_json::to_value(self)?)
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

/// 带大小限制的日志写入器
///
/// 超过上限时把当前文件改名为 `photosync.log.old`（覆盖旧备份）并重新打开。
pub struct SizeRotatingWriter {
    file_path: PathBuf,
    max_size: u64,
    written: u64,
    writer: BufWriter<File>,
}

impl SizeRotatingWriter {
    pub fn new(log_dir: &Path, max_size_mb: u32) -> io::Result<Self> {
        fs::create_dir_all(log_dir)?;

        let file_path = log_dir.join(LOG_FILE_NAME);
        let max_size = (max_size_mb.max(1) as u64) * 1024 * 1024;
        Self::with_limit(file_path, max_size)
    }

    fn with_limit(file_path: PathBuf, max_size: u64) -> io::Result<Self> {
        // 检查现有文件大小，如果超过限制则轮转
        let existing = fs::metadata(&file_path).map(|m| m.len()).unwrap_or(0);
        if existing > max_size {
            Self::rotate_log(&file_path)?;
        }

        let (writer, written) = Self::open_file(&file_path)?;
        Ok(Self {
            file_path,
            max_size,
            written,
            writer,
        })
    }

    fn open_file(file_path: &Path) -> io::Result<(BufWriter<File>, u64)> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(file_path)?;
        let len = file.metadata()?.len();
        Ok((BufWriter::new(file), len))
    }

    /// 轮转日志文件
    fn rotate_log(file_path: &Path) -> io::Result<()> {
        let backup_path = file_path.with_extension("log.old");

        if backup_path.exists() {
            fs::remove_file(&backup_path)?;
        }
        fs::rename(file_path, &backup_path)
    }

    fn rotate(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        Self::rotate_log(&self.file_path)?;
        let (writer, written) = Self::open_file(&self.file_path)?;
        self.writer = writer;
        self.written = written;
        Ok(())
    }
}

impl Write for SizeRotatingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.written > 0 && self.written + buf.len() as u64 > self.max_size {
            self.rotate()?;
        }

        let n = self.writer.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

/// 初始化日志系统
///
/// 控制台始终输出；启用文件日志时通过后台线程写入 `config_dir/photosync.log`。
/// 返回的 guard 需要保持到进程结束，否则缓冲中的日志会丢失。
pub fn init_logging(config_dir: &Path, verbose: bool) -> Option<WorkerGuard> {
    let config = LogConfig::load(config_dir);

    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        config.tracing_level()
    };
    let mut env_filter = EnvFilter::from_default_env().add_directive(level.into());
    // 隐藏 sqlx 的语句日志
    if let Ok(directive) = "sqlx=warn".parse::<Directive>() {
        env_filter = env_filter.add_directive(directive);
    }

    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false);

    let file_writer = if config.enabled {
        match SizeRotatingWriter::new(config_dir, config.max_size_mb) {
            Ok(writer) => Some(writer),
            Err(e) => {
                eprintln!("无法创建日志文件 {:?}: {}", config_dir, e);
                None
            }
        }
    } else {
        None
    };

    let (file_layer, guard) = match file_writer {
        Some(writer) => {
            let (non_blocking, guard) = tracing_appender::non_blocking(writer);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer);
    let _ = tracing::subscriber::set_global_default(subscriber);
    guard
}
