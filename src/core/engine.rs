//! 编排器 - 扫描 → 比较 → 计划 → 执行

use crate::config::EngineConfig;
use crate::core::comparator::{self, ComparisonResult};
use crate::core::executor::{CopyExecutor, CopyOutcome, CopyStatus};
use crate::core::fingerprint::LocationRecordSet;
use crate::core::planner::{self, DirectionPolicy, SyncPlan};
use crate::core::scanner::{FileScanner, ScanConfig, ScanSession};
use crate::core::store::FingerprintStore;
use crate::error::{Error, Result};
use crate::storage::{LocalStorage, Storage};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// 一次运行的汇总（供展示层使用）
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSummary {
    /// A 缺少的文件数（只在 B 中）
    pub missing_in_a: usize,
    /// B 缺少的文件数（只在 A 中）
    pub missing_in_b: usize,
    pub differing: usize,
    pub copied: usize,
    pub would_copy: usize,
    pub skipped: usize,
    pub errors: usize,
    pub cancelled: usize,
    pub bytes_copied: u64,
}

impl SyncSummary {
    pub fn from_run(comparison: &ComparisonResult, outcomes: &[CopyOutcome]) -> Self {
        let mut summary = Self {
            missing_in_a: comparison.only_in_b.len(),
            missing_in_b: comparison.only_in_a.len(),
            differing: comparison.differing.len(),
            ..Default::default()
        };

        for outcome in outcomes {
            match outcome.status {
                CopyStatus::Copied => summary.copied += 1,
                CopyStatus::WouldCopy => summary.would_copy += 1,
                CopyStatus::SkippedExists => summary.skipped += 1,
                CopyStatus::Cancelled => summary.cancelled += 1,
                status if status.is_error() => summary.errors += 1,
                _ => {}
            }
            summary.bytes_copied += outcome.bytes_copied;
        }
        summary
    }

    /// 有失败或被取消的项
    pub fn has_failures(&self) -> bool {
        self.errors > 0 || self.cancelled > 0
    }
}

/// `compare` 的结果（只读）
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompareReport {
    pub root_a: PathBuf,
    pub root_b: PathBuf,
    pub scan_a: ScanSession,
    pub scan_b: ScanSession,
    pub comparison: ComparisonResult,
}

/// `sync` 的结果
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub root_a: PathBuf,
    pub root_b: PathBuf,
    pub scan_a: ScanSession,
    pub scan_b: ScanSession,
    pub comparison: ComparisonResult,
    /// 计划（包含需要手动处理的冲突）
    pub plan: SyncPlan,
    pub outcomes: Vec<CopyOutcome>,
    pub summary: SyncSummary,
    pub dry_run: bool,
}

/// 单个硬盘的备份结果
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveBackupReport {
    pub drive_root: PathBuf,
    /// 归档在硬盘上的子目录
    pub drive_subdir: Option<String>,
    pub scan: Option<ScanSession>,
    pub comparison: Option<ComparisonResult>,
    pub outcomes: Vec<CopyOutcome>,
    pub summary: SyncSummary,
    /// 该硬盘无法处理时的原因（硬盘不存在、指纹库损坏等）
    pub error: Option<String>,
}

impl DriveBackupReport {
    fn failed(drive_root: &Path, error: &Error) -> Self {
        Self {
            drive_root: drive_root.to_path_buf(),
            drive_subdir: None,
            scan: None,
            comparison: None,
            outcomes: Vec::new(),
            summary: SyncSummary::default(),
            error: Some(error.to_string()),
        }
    }
}

/// `backup` 的结果，每个硬盘一项（与输入顺序一致）
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupReport {
    pub archive_root: PathBuf,
    pub archive_scan: ScanSession,
    pub drives: Vec<DriveBackupReport>,
    pub dry_run: bool,
}

impl BackupReport {
    pub fn has_failures(&self) -> bool {
        self.drives
            .iter()
            .any(|d| d.error.is_some() || d.summary.has_failures())
    }
}

/// 同步引擎
pub struct SyncEngine {
    config: EngineConfig,
    storage: Arc<dyn Storage>,
}

impl SyncEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self::with_storage(config, Arc::new(LocalStorage::new()))
    }

    /// 使用自定义的存储实现（测试中模拟空间不足或传输损坏）
    pub fn with_storage(config: EngineConfig, storage: Arc<dyn Storage>) -> Self {
        Self { config, storage }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn scanner(&self, cancel: &CancellationToken) -> FileScanner {
        FileScanner::new(ScanConfig::from(&self.config)).with_cancel(cancel.clone())
    }

    fn executor(&self) -> CopyExecutor {
        CopyExecutor::new(self.storage.clone(), self.config.copy_workers)
    }

    /// 比较两个位置（只读，但会更新两边的指纹库）
    pub async fn compare(
        &self,
        root_a: &Path,
        root_b: &Path,
        rescan: bool,
        cancel: &CancellationToken,
    ) -> Result<CompareReport> {
        let (root_a, root_b) = resolve_pair(root_a, root_b).await?;
        let mut store_a = FingerprintStore::open(&root_a).await?;
        let mut store_b = FingerprintStore::open(&root_b).await?;

        let ((_, scan_a), (_, scan_b), comparison) =
            self.scan_and_compare(&mut store_a, &mut store_b, rescan, cancel).await?;

        info!(
            "比较完成: 仅在 A {} 个, 仅在 B {} 个, 内容不同 {} 个, 相同 {} 个",
            comparison.only_in_a.len(),
            comparison.only_in_b.len(),
            comparison.differing.len(),
            comparison.identical.len()
        );

        Ok(CompareReport {
            root_a,
            root_b,
            scan_a,
            scan_b,
            comparison,
        })
    }

    /// 两个硬盘互相补齐缺失的文件；内容不同的文件只报告
    pub async fn sync(
        &self,
        root_a: &Path,
        root_b: &Path,
        rescan: bool,
        dry_run: bool,
        cancel: &CancellationToken,
    ) -> Result<SyncReport> {
        let (root_a, root_b) = resolve_pair(root_a, root_b).await?;
        let mut store_a = FingerprintStore::open(&root_a).await?;
        let mut store_b = FingerprintStore::open(&root_b).await?;

        let ((_, scan_a), (_, scan_b), comparison) =
            self.scan_and_compare(&mut store_a, &mut store_b, rescan, cancel).await?;

        let plan = planner::plan(
            &comparison,
            &DirectionPolicy::PeerSync {
                root_a: root_a.clone(),
                root_b: root_b.clone(),
            },
        );
        info!(
            "同步计划: {} 个复制 ({} 字节), {} 个冲突需要手动处理",
            plan.items.len(),
            plan.total_bytes(),
            plan.conflicts.len()
        );
        for conflict in &plan.conflicts {
            let (a, b) = conflict.short_checksums();
            warn!("内容冲突: {} (A={} B={})", conflict.relative_path, a, b);
        }

        let outcomes = self
            .executor()
            .execute(&plan.items, &mut [&mut store_a, &mut store_b], cancel, dry_run)
            .await?;
        let summary = SyncSummary::from_run(&comparison, &outcomes);
        log_summary(&summary);

        Ok(SyncReport {
            root_a,
            root_b,
            scan_a,
            scan_b,
            comparison,
            plan,
            outcomes,
            summary,
            dry_run,
        })
    }

    /// 以本地归档为准备份到多个硬盘
    ///
    /// 单个硬盘失败（不存在、指纹库损坏等）记录在该硬盘的结果中，不影响其他硬盘；
    /// 取消后剩余的硬盘不再处理。
    pub async fn backup(
        &self,
        archive_root: &Path,
        drive_roots: &[PathBuf],
        rescan: bool,
        dry_run: bool,
        cancel: &CancellationToken,
    ) -> Result<BackupReport> {
        let archive_root = resolve_location(archive_root).await?;
        let mut archive_store = FingerprintStore::open(&archive_root).await?;
        let (archive_set, archive_scan) = self
            .scanner(cancel)
            .scan_location(&mut archive_store, rescan)
            .await?;

        let mut drives = Vec::with_capacity(drive_roots.len());
        for drive_root in drive_roots {
            if cancel.is_cancelled() {
                drives.push(DriveBackupReport::failed(drive_root, &Error::Cancelled));
                continue;
            }

            let report = match self
                .backup_drive(&archive_root, &archive_set, drive_root, rescan, dry_run, cancel)
                .await
            {
                Ok(report) => report,
                Err(e) => {
                    error!("备份到 {:?} 失败: {}", drive_root, e);
                    DriveBackupReport::failed(drive_root, &e)
                }
            };
            drives.push(report);
        }

        Ok(BackupReport {
            archive_root,
            archive_scan,
            drives,
            dry_run,
        })
    }

    async fn backup_drive(
        &self,
        archive_root: &Path,
        archive_set: &LocationRecordSet,
        drive_root: &Path,
        rescan: bool,
        dry_run: bool,
        cancel: &CancellationToken,
    ) -> Result<DriveBackupReport> {
        let drive_root = resolve_location(drive_root).await?;
        if drive_root == archive_root {
            return Err(Error::SameLocation(drive_root));
        }

        let drive_subdir = self.backup_subdir(&drive_root).await;
        info!("备份 {:?} -> {:?} (子目录: {})", archive_root, drive_root, drive_subdir);

        let mut drive_store = FingerprintStore::open(&drive_root).await?;
        let (drive_set, scan) = self
            .scanner(cancel)
            .scan_location(&mut drive_store, rescan)
            .await?;

        // 只比较子目录中的内容，硬盘上的其他文件不受影响
        let comparison = comparator::compare(archive_set, &drive_set.rebased(&drive_subdir));
        let plan = planner::plan(
            &comparison,
            &DirectionPolicy::ArchiveBackup {
                archive_root: archive_root.to_path_buf(),
                drive_root: drive_root.clone(),
                drive_subdir: drive_subdir.clone(),
            },
        );
        info!(
            "备份计划: {} 个复制 ({} 字节), 其中 {} 个覆盖",
            plan.items.len(),
            plan.total_bytes(),
            plan.items.iter().filter(|i| i.overwrite).count()
        );

        let outcomes = self
            .executor()
            .execute(&plan.items, &mut [&mut drive_store], cancel, dry_run)
            .await?;
        let summary = SyncSummary::from_run(&comparison, &outcomes);
        log_summary(&summary);

        Ok(DriveBackupReport {
            drive_root,
            drive_subdir: Some(drive_subdir),
            scan: Some(scan),
            comparison: Some(comparison),
            outcomes,
            summary,
            error: None,
        })
    }

    /// 硬盘上第一个已存在的候选子目录，都不存在时使用默认名称
    pub async fn backup_subdir(&self, drive_root: &Path) -> String {
        for candidate in &self.config.backup_subdir_candidates {
            let is_dir = tokio::fs::metadata(drive_root.join(candidate))
                .await
                .map(|m| m.is_dir())
                .unwrap_or(false);
            if is_dir {
                return candidate.clone();
            }
        }
        self.config.default_backup_subdir.clone()
    }

    /// 并发扫描两个位置后比较
    async fn scan_and_compare(
        &self,
        store_a: &mut FingerprintStore,
        store_b: &mut FingerprintStore,
        rescan: bool,
        cancel: &CancellationToken,
    ) -> Result<(
        (LocationRecordSet, ScanSession),
        (LocationRecordSet, ScanSession),
        ComparisonResult,
    )> {
        let scanner = self.scanner(cancel);
        let (scanned_a, scanned_b) = tokio::join!(
            scanner.scan_location(store_a, rescan),
            scanner.scan_location(store_b, rescan)
        );
        let scanned_a = scanned_a?;
        let scanned_b = scanned_b?;

        let comparison = comparator::compare(&scanned_a.0, &scanned_b.0);
        Ok((scanned_a, scanned_b, comparison))
    }
}

/// 检查位置存在且是目录，返回规范化后的路径
async fn resolve_location(root: &Path) -> Result<PathBuf> {
    match tokio::fs::canonicalize(root).await {
        Ok(path) if tokio::fs::metadata(&path).await.map(|m| m.is_dir()).unwrap_or(false) => {
            Ok(path)
        }
        _ => Err(Error::LocationNotFound(root.to_path_buf())),
    }
}

async fn resolve_pair(root_a: &Path, root_b: &Path) -> Result<(PathBuf, PathBuf)> {
    let root_a = resolve_location(root_a).await?;
    let root_b = resolve_location(root_b).await?;
    if root_a == root_b {
        return Err(Error::SameLocation(root_a));
    }
    Ok((root_a, root_b))
}

fn log_summary(summary: &SyncSummary) {
    info!(
        "完成: 复制 {} 个 ({} 字节), 跳过 {}, 错误 {}, 取消 {}",
        summary.copied, summary.bytes_copied, summary.skipped, summary.errors, summary.cancelled
    );
}
