//! 硬盘比较、同步和备份命令

use super::format_bytes;
use crate::core::{
    BackupReport, CompareReport, ComparisonResult, CopyOutcome, CopyStatus, DriveBackupReport,
    ScanSession, SyncEngine, SyncReport, SyncSummary,
};
use anyhow::Context;
use std::fmt::Write;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

/// 每一侧最多列出的缺失文件数
const MISSING_LIST_LIMIT: usize = 20;
/// 最多列出的冲突数
const CONFLICT_LIST_LIMIT: usize = 10;

/// 命令的文本输出；`success` 为 false 时进程以非零状态退出
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub text: String,
    pub success: bool,
}

/// 比较两个硬盘
pub async fn compare(
    engine: &SyncEngine,
    drive_a: &Path,
    drive_b: &Path,
    rescan: bool,
    cancel: &CancellationToken,
) -> anyhow::Result<CommandOutput> {
    let report = engine
        .compare(drive_a, drive_b, rescan, cancel)
        .await
        .with_context(|| format!("比较 {:?} 和 {:?} 失败", drive_a, drive_b))?;

    Ok(CommandOutput {
        text: render_compare(&report),
        success: true,
    })
}

/// 同步两个硬盘
pub async fn sync(
    engine: &SyncEngine,
    drive_a: &Path,
    drive_b: &Path,
    rescan: bool,
    dry_run: bool,
    cancel: &CancellationToken,
) -> anyhow::Result<CommandOutput> {
    let report = engine
        .sync(drive_a, drive_b, rescan, dry_run, cancel)
        .await
        .with_context(|| format!("同步 {:?} 和 {:?} 失败", drive_a, drive_b))?;

    Ok(CommandOutput {
        success: !report.summary.has_failures(),
        text: render_sync(&report),
    })
}

/// 把归档备份到一个或多个硬盘
pub async fn backup(
    engine: &SyncEngine,
    archive: &Path,
    drives: &[PathBuf],
    rescan: bool,
    dry_run: bool,
    cancel: &CancellationToken,
) -> anyhow::Result<CommandOutput> {
    let report = engine
        .backup(archive, drives, rescan, dry_run, cancel)
        .await
        .with_context(|| format!("备份归档 {:?} 失败", archive))?;

    Ok(CommandOutput {
        success: !report.has_failures(),
        text: render_backup(&report),
    })
}

fn render_scan(out: &mut String, label: &str, scan: &ScanSession) {
    let _ = writeln!(
        out,
        "{} {}: {} 个文件 (复用 {}, 重新计算 {}, 无法读取 {})",
        label,
        scan.root.display(),
        scan.files_found,
        scan.files_reused,
        scan.files_rehashed,
        scan.files_unreadable
    );
    if scan.temp_files_removed > 0 {
        let _ = writeln!(out, "  已清理 {} 个中断复制留下的临时文件", scan.temp_files_removed);
    }
    for warning in scan.warnings.iter().take(MISSING_LIST_LIMIT) {
        let _ = writeln!(out, "  ! {}: {}", warning.relative_path, warning.message);
    }
}

fn render_comparison(
    out: &mut String,
    comparison: &ComparisonResult,
    label_a: &str,
    label_b: &str,
) {
    let _ = writeln!(out);
    let _ = writeln!(out, "相同: {}", comparison.identical.len());

    for (label, records, bytes) in [
        (
            format!("{} 缺少 (仅在 {} 中)", label_b, label_a),
            &comparison.only_in_a,
            comparison.only_in_a_bytes(),
        ),
        (
            format!("{} 缺少 (仅在 {} 中)", label_a, label_b),
            &comparison.only_in_b,
            comparison.only_in_b_bytes(),
        ),
    ] {
        let _ = writeln!(out, "{}: {} ({})", label, records.len(), format_bytes(bytes));
        for record in records.iter().take(MISSING_LIST_LIMIT) {
            let _ = writeln!(out, "  {}", record.relative_path);
        }
        if records.len() > MISSING_LIST_LIMIT {
            let _ = writeln!(out, "  ... 还有 {} 个", records.len() - MISSING_LIST_LIMIT);
        }
    }

    let _ = writeln!(out, "内容不同: {}", comparison.differing.len());
    for entry in comparison.differing.iter().take(CONFLICT_LIST_LIMIT) {
        let _ = writeln!(
            out,
            "  {} ({}: {}, {}: {})",
            entry.relative_path,
            label_a,
            format_bytes(entry.size_a),
            label_b,
            format_bytes(entry.size_b)
        );
    }
    if comparison.differing.len() > CONFLICT_LIST_LIMIT {
        let _ = writeln!(
            out,
            "  ... 还有 {} 个",
            comparison.differing.len() - CONFLICT_LIST_LIMIT
        );
    }
}

fn render_failures(out: &mut String, outcomes: &[CopyOutcome]) {
    let unrecorded = outcomes
        .iter()
        .filter(|o| o.status == CopyStatus::Copied && o.error.is_some())
        .count();
    if unrecorded > 0 {
        let _ = writeln!(out, "已复制但指纹库未更新: {} 个（下次扫描会重新计算）", unrecorded);
    }

    let failures: Vec<_> = outcomes
        .iter()
        .filter(|o| o.status.is_error())
        .collect();
    if failures.is_empty() {
        return;
    }
    let _ = writeln!(out, "失败: {}", failures.len());
    for outcome in failures.iter().take(MISSING_LIST_LIMIT) {
        let _ = writeln!(
            out,
            "  [{}] {} -> {}: {}",
            outcome.status,
            outcome.item.relative_path,
            outcome.item.dest_root.display(),
            outcome.error.as_deref().unwrap_or("")
        );
    }
}

fn render_summary(out: &mut String, summary: &SyncSummary, dry_run: bool) {
    let _ = writeln!(out);
    if dry_run {
        let _ = writeln!(out, "[dry-run] 将复制 {} 个文件，未做任何修改", summary.would_copy);
    } else {
        let _ = writeln!(
            out,
            "已复制 {} 个 ({}), 跳过 {}, 错误 {}, 取消 {}",
            summary.copied,
            format_bytes(summary.bytes_copied),
            summary.skipped,
            summary.errors,
            summary.cancelled
        );
    }
}

pub fn render_compare(report: &CompareReport) -> String {
    let mut out = String::new();
    render_scan(&mut out, "A", &report.scan_a);
    render_scan(&mut out, "B", &report.scan_b);
    render_comparison(&mut out, &report.comparison, "A", "B");
    if report.comparison.is_synchronized() {
        let _ = writeln!(out, "\n两个位置已同步");
    }
    out
}

pub fn render_sync(report: &SyncReport) -> String {
    let mut out = String::new();
    render_scan(&mut out, "A", &report.scan_a);
    render_scan(&mut out, "B", &report.scan_b);
    render_comparison(&mut out, &report.comparison, "A", "B");

    if !report.plan.conflicts.is_empty() {
        let _ = writeln!(out, "\n冲突（需要手动处理，未复制）:");
        for conflict in report.plan.conflicts.iter().take(CONFLICT_LIST_LIMIT) {
            let (a, b) = conflict.short_checksums();
            let _ = writeln!(out, "  {} (A={} B={})", conflict.relative_path, a, b);
        }
    }

    render_failures(&mut out, &report.outcomes);
    render_summary(&mut out, &report.summary, report.dry_run);
    out
}

fn render_drive(out: &mut String, drive: &DriveBackupReport, dry_run: bool) {
    let _ = writeln!(out, "\n== {} ==", drive.drive_root.display());
    if let Some(error) = &drive.error {
        let _ = writeln!(out, "跳过: {}", error);
        return;
    }
    if let Some(subdir) = &drive.drive_subdir {
        let _ = writeln!(out, "目标子目录: {}", subdir);
    }
    if let Some(scan) = &drive.scan {
        render_scan(out, "硬盘", scan);
    }
    if let Some(comparison) = &drive.comparison {
        render_comparison(out, comparison, "归档", "硬盘");
    }

    let overwritten = drive
        .outcomes
        .iter()
        .filter(|o| o.item.overwrite && o.status == CopyStatus::Copied)
        .count();
    if overwritten > 0 {
        let _ = writeln!(out, "以归档为准覆盖: {}", overwritten);
    }

    render_failures(out, &drive.outcomes);
    render_summary(out, &drive.summary, dry_run);
}

pub fn render_backup(report: &BackupReport) -> String {
    let mut out = String::new();
    render_scan(&mut out, "归档", &report.archive_scan);
    for drive in &report.drives {
        render_drive(&mut out, drive, report.dry_run);
    }
    out
}
