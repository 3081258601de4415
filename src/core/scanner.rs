use crate::config::EngineConfig;
use crate::core::fingerprint::{self, FileRecord, LocationRecordSet};
use crate::core::store::FingerprintStore;
use crate::db;
use crate::error::{Error, Result};
use futures::StreamExt;
use regex::Regex;
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use walkdir::{DirEntry, WalkDir};

/// 文件扫描器配置
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// 是否包含隐藏文件（以 . 开头）
    pub include_hidden: bool,
    /// 排除规则（glob patterns）
    pub exclude_patterns: Vec<String>,
    /// 并发计算哈希的最大任务数
    pub workers: usize,
    /// 每计算多少个文件就写入一次指纹库
    pub checkpoint_interval: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            include_hidden: false,
            exclude_patterns: vec![
                ".DS_Store".to_string(),
                "Thumbs.db".to_string(),
                "desktop.ini".to_string(),
                "*.tmp".to_string(),
            ],
            workers: 4,
            checkpoint_interval: 500,
        }
    }
}

impl From<&EngineConfig> for ScanConfig {
    fn from(config: &EngineConfig) -> Self {
        Self {
            include_hidden: config.include_hidden,
            exclude_patterns: config.exclude_patterns.clone(),
            workers: config.scan_workers.max(1),
            checkpoint_interval: config.checkpoint_interval.max(1),
        }
    }
}

/// 单个文件的扫描警告（读取失败等），不会中断扫描
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanWarning {
    pub relative_path: String,
    pub message: String,
}

/// 一次扫描的统计
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanSession {
    pub root: PathBuf,
    pub files_found: usize,
    /// 大小和修改时间未变，直接复用旧 checksum
    pub files_reused: usize,
    pub files_rehashed: usize,
    pub files_unreadable: usize,
    /// 清理掉的中断复制残留临时文件
    pub temp_files_removed: usize,
    pub warnings: Vec<ScanWarning>,
    /// 本次扫描的时间（Unix 秒），确认过的记录都使用这个 last_scanned_time
    pub scanned_at: i64,
    pub duration_ms: u64,
}

impl ScanSession {
    fn warn(&mut self, relative_path: String, message: String) {
        warn!("扫描警告 {}: {}", relative_path, message);
        self.files_unreadable += 1;
        self.warnings.push(ScanWarning {
            relative_path,
            message,
        });
    }
}

/// 哈希计算进度，每处理完一个文件回调一次
#[derive(Debug, Clone)]
pub struct ScanProgress {
    pub relative_path: String,
    pub files_done: usize,
    pub files_to_hash: usize,
}

pub type ProgressFn = Arc<dyn Fn(&ScanProgress) + Send + Sync>;

/// 目录遍历得到的候选文件
#[derive(Debug, Clone)]
struct Candidate {
    relative_path: String,
    absolute_path: PathBuf,
    size_bytes: u64,
    modified_time: i64,
}

/// 编译后的排除规则
#[derive(Debug, Clone)]
struct ScanFilter {
    include_hidden: bool,
    /// (是否匹配完整相对路径, 正则)
    patterns: Vec<(bool, Regex)>,
}

impl ScanFilter {
    fn new(config: &ScanConfig) -> Self {
        let patterns = config
            .exclude_patterns
            .iter()
            .filter_map(|pattern| match compile_pattern(pattern) {
                Some(compiled) => Some(compiled),
                None => {
                    warn!("无效的排除规则: {}", pattern);
                    None
                }
            })
            .collect();

        Self {
            include_hidden: config.include_hidden,
            patterns,
        }
    }

    /// 文件名是否应跳过
    fn skip_name(&self, name: &str) -> bool {
        if db::is_reserved_name(name) {
            return true;
        }
        !self.include_hidden && name.starts_with('.')
    }

    fn is_excluded(&self, relative_path: &str) -> bool {
        let name = relative_path.rsplit('/').next().unwrap_or(relative_path);
        self.patterns.iter().any(|(full_path, re)| {
            if *full_path {
                re.is_match(relative_path)
            } else {
                re.is_match(name)
            }
        })
    }

    /// 只剪掉保留名目录；隐藏目录照常进入，其中以 . 开头的文件在遍历时跳过
    fn keep_entry(&self, entry: &DirEntry) -> bool {
        if entry.depth() == 0 || !entry.file_type().is_dir() {
            return true;
        }
        match entry.file_name().to_str() {
            Some(name) => !db::is_reserved_name(name),
            // 非 UTF-8 目录名交给后续步骤报告警告
            None => true,
        }
    }
}

/// 把简单的 glob 规则转成正则
///
/// `dir/**` 匹配目录前缀，`*` 匹配任意字符；不含 `/` 的规则只匹配文件名。
fn compile_pattern(pattern: &str) -> Option<(bool, Regex)> {
    let pattern = pattern.trim().trim_start_matches("./");
    if pattern.is_empty() {
        return None;
    }

    if let Some(prefix) = pattern.strip_suffix("/**") {
        let re = Regex::new(&format!("(?i)^{}/", regex::escape(prefix))).ok()?;
        return Some((true, re));
    }

    let full_path = pattern.contains('/');
    let body = regex::escape(pattern).replace("\\*", ".*").replace("\\?", ".");
    let re = Regex::new(&format!("(?i)^{}$", body)).ok()?;
    Some((full_path, re))
}

/// 文件扫描器
pub struct FileScanner {
    config: ScanConfig,
    filter: ScanFilter,
    cancel: Option<CancellationToken>,
    progress: Option<ProgressFn>,
}

impl FileScanner {
    pub fn new(config: ScanConfig) -> Self {
        let filter = ScanFilter::new(&config);
        Self {
            config,
            filter,
            cancel: None,
            progress: None,
        }
    }

    /// 创建带取消令牌的扫描器
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// 设置进度回调（在扫描协调任务中同步调用）
    pub fn with_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .map(|c| c.is_cancelled())
            .unwrap_or(false)
    }

    /// 扫描 `root`，与已有清单对比，只对新增/变化的文件计算指纹
    ///
    /// 不写入任何指纹库；需要持久化时使用 [`FileScanner::scan_location`]。
    pub async fn scan(
        &self,
        root: &Path,
        existing: &LocationRecordSet,
        force_rescan: bool,
    ) -> Result<(LocationRecordSet, ScanSession)> {
        self.scan_inner(root, existing, force_rescan, None).await
    }

    /// 扫描指纹库所属的位置并把结果写回：加载 → 扫描（定期落盘）→ 清理消失的文件 → 保存
    ///
    /// 同时删除之前中断的复制留下的临时文件。
    /// 被取消时已计算的指纹保留，不做清理，返回 [`Error::Cancelled`]。
    pub async fn scan_location(
        &self,
        store: &mut FingerprintStore,
        force_rescan: bool,
    ) -> Result<(LocationRecordSet, ScanSession)> {
        let root = store.root().to_path_buf();
        let existing = store.load().await?;

        let (records, session) = self
            .scan_inner(&root, &existing, force_rescan, Some(&mut *store))
            .await?;

        let keep: HashSet<String> = records.paths().cloned().collect();
        store.prune(&keep).await?;
        store.touch_all(session.scanned_at);
        store.save().await?;

        Ok((records, session))
    }

    async fn scan_inner(
        &self,
        root: &Path,
        existing: &LocationRecordSet,
        force_rescan: bool,
        mut store: Option<&mut FingerprintStore>,
    ) -> Result<(LocationRecordSet, ScanSession)> {
        if self.is_cancelled() {
            return Err(Error::Cancelled);
        }
        if !root.is_dir() {
            return Err(Error::LocationNotFound(root.to_path_buf()));
        }

        let started = Instant::now();
        info!("开始扫描: {:?} (强制重新计算: {})", root, force_rescan);

        let walk_root = root.to_path_buf();
        let filter = self.filter.clone();
        let walked =
            tokio::task::spawn_blocking(move || walk_location(&walk_root, &filter)).await?;

        let scanned_at = chrono::Utc::now().timestamp();
        let mut session = ScanSession {
            root: root.to_path_buf(),
            files_found: walked.candidates.len(),
            scanned_at,
            ..Default::default()
        };
        for warning in walked.warnings {
            session.warn(warning.relative_path, warning.message);
        }

        // 只在写回指纹库的扫描中清理，纯比较不修改位置
        if store.is_some() {
            for temp in walked.stale_temp_files {
                match tokio::fs::remove_file(&temp).await {
                    Ok(()) => {
                        info!("已删除残留的临时文件: {:?}", temp);
                        session.temp_files_removed += 1;
                    }
                    Err(e) => warn!("无法删除残留的临时文件 {:?}: {}", temp, e),
                }
            }
        }
        let candidates = walked.candidates;

        let mut records = LocationRecordSet::with_capacity(candidates.len());
        let mut to_hash = Vec::new();

        for candidate in candidates {
            match existing.get(&candidate.relative_path) {
                Some(prior)
                    if !force_rescan
                        && prior.matches_metadata(candidate.size_bytes, candidate.modified_time) =>
                {
                    let mut record = prior.clone();
                    record.last_scanned_time = scanned_at;
                    records.upsert(record);
                    session.files_reused += 1;
                }
                _ => to_hash.push(candidate),
            }
        }

        debug!(
            "{:?}: 复用 {} 个, 需要计算 {} 个",
            root,
            session.files_reused,
            to_hash.len()
        );

        let files_to_hash = to_hash.len();
        let cancel = self.cancel.clone();
        let mut results = futures::stream::iter(to_hash.into_iter().map(|candidate| {
            let cancel = cancel.clone();
            async move {
                if cancel.map(|c| c.is_cancelled()).unwrap_or(false) {
                    return (candidate, None);
                }
                let path = candidate.absolute_path.clone();
                let hashed =
                    tokio::task::spawn_blocking(move || fingerprint::hash_file(&path)).await;
                (candidate, Some(hashed))
            }
        }))
        .buffer_unordered(self.config.workers.max(1));

        let mut checkpoint: Vec<FileRecord> = Vec::new();
        let mut cancelled = false;
        let mut files_done = 0;

        while let Some((candidate, hashed)) = results.next().await {
            let hashed = match hashed {
                Some(hashed) => hashed?,
                None => {
                    cancelled = true;
                    continue;
                }
            };
            let relative_path = candidate.relative_path.clone();

            match hashed {
                Ok(checksum) => {
                    let record = FileRecord {
                        relative_path: candidate.relative_path,
                        size_bytes: candidate.size_bytes,
                        modified_time: candidate.modified_time,
                        checksum,
                        last_scanned_time: scanned_at,
                    };
                    debug!("已计算: {}", record.relative_path);
                    session.files_rehashed += 1;
                    checkpoint.push(record.clone());
                    records.upsert(record);
                }
                Err(e) => {
                    let err = Error::ScanRead {
                        path: candidate.relative_path.clone(),
                        source: e,
                    };
                    session.warn(candidate.relative_path, err.to_string());
                }
            }

            if checkpoint.len() >= self.config.checkpoint_interval {
                if let Some(store) = store.as_deref_mut() {
                    store.upsert_batch(checkpoint.drain(..));
                    store.save().await?;
                }
            }

            files_done += 1;
            if let Some(progress) = &self.progress {
                progress(&ScanProgress {
                    relative_path,
                    files_done,
                    files_to_hash,
                });
            }
        }

        let cancelled = cancelled || self.is_cancelled();
        if let Some(store) = store.as_deref_mut() {
            store.upsert_batch(checkpoint.drain(..));
            if cancelled {
                store.save().await?;
            }
        }

        if cancelled {
            info!("扫描已取消: {:?} (已计算 {} 个)", root, session.files_rehashed);
            return Err(Error::Cancelled);
        }

        session.duration_ms = started.elapsed().as_millis() as u64;
        info!(
            "扫描完成: {:?} - {} 个文件, 复用 {}, 重新计算 {}, 无法读取 {}",
            root,
            session.files_found,
            session.files_reused,
            session.files_rehashed,
            session.files_unreadable
        );

        Ok((records, session))
    }
}

impl Default for FileScanner {
    fn default() -> Self {
        Self::new(ScanConfig::default())
    }
}

/// 目录遍历结果
#[derive(Debug, Default)]
struct WalkOutput {
    candidates: Vec<Candidate>,
    warnings: Vec<ScanWarning>,
    stale_temp_files: Vec<PathBuf>,
}

/// 同步遍历目录树（在 blocking 线程中运行）
fn walk_location(root: &Path, filter: &ScanFilter) -> WalkOutput {
    let mut out = WalkOutput::default();

    let walker = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| filter.keep_entry(entry));

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                let relative_path = e
                    .path()
                    .and_then(|p| p.strip_prefix(root).ok())
                    .map(|p| p.to_string_lossy().replace('\\', "/"))
                    .unwrap_or_default();
                out.warnings.push(ScanWarning {
                    relative_path,
                    message: e.to_string(),
                });
                continue;
            }
        };

        if !entry.file_type().is_file() {
            continue;
        }

        let name = entry.file_name().to_string_lossy();
        if db::is_temp_name(&name) {
            out.stale_temp_files.push(entry.path().to_path_buf());
            continue;
        }
        if filter.skip_name(&name) {
            continue;
        }

        let relative = match entry.path().strip_prefix(root) {
            Ok(relative) => relative,
            Err(_) => continue,
        };
        let relative_path = match fingerprint::normalize_relative(relative) {
            Some(path) => path,
            None => {
                out.warnings.push(ScanWarning {
                    relative_path: relative.to_string_lossy().replace('\\', "/"),
                    message: "路径不是有效的 UTF-8".to_string(),
                });
                continue;
            }
        };

        if filter.is_excluded(&relative_path) {
            debug!("排除文件: {}", relative_path);
            continue;
        }

        let metadata = match entry.metadata() {
            Ok(metadata) => metadata,
            Err(e) => {
                out.warnings.push(ScanWarning {
                    relative_path,
                    message: e.to_string(),
                });
                continue;
            }
        };

        out.candidates.push(Candidate {
            relative_path,
            absolute_path: entry.path().to_path_buf(),
            size_bytes: metadata.len(),
            modified_time: fingerprint::modified_nanos(&metadata),
        });
    }

    out
}
