//! 应用配置模块

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// 配置文件名（位于配置目录下）
pub const CONFIG_FILE_NAME: &str = "config.json";

/// 引擎配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    /// 并发计算哈希的任务数
    #[serde(default = "default_scan_workers")]
    pub scan_workers: usize,
    /// 并发复制的任务数
    #[serde(default = "default_copy_workers")]
    pub copy_workers: usize,
    /// 扫描时每计算多少个文件写入一次指纹库
    #[serde(default = "default_checkpoint_interval")]
    pub checkpoint_interval: usize,
    /// 是否扫描隐藏文件
    #[serde(default)]
    pub include_hidden: bool,
    /// 排除规则
    #[serde(default = "default_exclude_patterns")]
    pub exclude_patterns: Vec<String>,
    /// 硬盘上归档子目录的候选名称，按顺序取第一个已存在的
    #[serde(default = "default_backup_subdir_candidates")]
    pub backup_subdir_candidates: Vec<String>,
    /// 候选目录都不存在时使用的子目录
    #[serde(default = "default_backup_subdir")]
    pub default_backup_subdir: String,
}

fn default_scan_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
        .min(8)
}

fn default_copy_workers() -> usize {
    2 // USB 硬盘并发写入过多反而更慢
}

fn default_checkpoint_interval() -> usize {
    500
}

fn default_exclude_patterns() -> Vec<String> {
    vec![
        ".DS_Store".to_string(),
        "Thumbs.db".to_string(),
        "*.tmp".to_string(),
        "desktop.ini".to_string(),
    ]
}

fn default_backup_subdir_candidates() -> Vec<String> {
    ["archive", "Archive", "photos", "Photos"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_backup_subdir() -> String {
    "archive".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            scan_workers: default_scan_workers(),
            copy_workers: default_copy_workers(),
            checkpoint_interval: default_checkpoint_interval(),
            include_hidden: false,
            exclude_patterns: default_exclude_patterns(),
            backup_subdir_candidates: default_backup_subdir_candidates(),
            default_backup_subdir: default_backup_subdir(),
        }
    }
}

/// 读取 config.json 中的一个顶层键
pub(crate) fn read_section(config_dir: &Path, key: &str) -> Option<serde_json::Value> {
    let content = fs::read_to_string(config_dir.join(CONFIG_FILE_NAME)).ok()?;
    let config = serde_json::from_str::<serde_json::Value>(&content).ok()?;
    config.get(key).cloned()
}

/// 更新 config.json 中的一个顶层键，保留其他内容
pub(crate) fn write_section(
    config_dir: &Path,
    key: &str,
    value: serde_json::Value,
) -> io::Result<()> {
    let config_file = config_dir.join(CONFIG_FILE_NAME);

    // 读取现有配置
    let mut config: serde_json::Value = if config_file.exists() {
        let content = fs::read_to_string(&config_file)?;
        serde_json::from_str(&content).unwrap_or_else(|_| serde_json::json!({}))
    } else {
        serde_json::json!({})
    };
    if !config.is_object() {
        config = serde_json::json!({});
    }

    config[key] = value;

    fs::create_dir_all(config_dir)?;
    let content = serde_json::to_string_pretty(&config)?;
    fs::write(&config_file, content)
}

impl EngineConfig {
    /// 从配置文件加载引擎配置，缺失或无效时使用默认值
    pub fn load(config_dir: &Path) -> Self {
        read_section(config_dir, "engine")
            .and_then(|value| match serde_json::from_value::<EngineConfig>(value) {
                Ok(config) => Some(config),
                Err(e) => {
                    tracing::warn!("引擎配置无效，使用默认值: {}", e);
                    None
                }
            })
            .unwrap_or_default()
    }

    /// 保存引擎配置
    pub fn save(&self, config_dir: &Path) -> io::Result<()> {
        write_section(config_dir, "engine", serde_json::to_value(self)?)
    }
}

/// 默认配置目录（按平台惯例），无法确定时使用当前目录下的 `.photosync`
pub fn default_config_dir() -> PathBuf {
    directories::ProjectDirs::from("", "", "photosync")
        .map(|dirs| dirs.config_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".photosync"))
}
