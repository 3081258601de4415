//! 同步计划 - 把比较结果转换为有序的复制操作

use crate::core::comparator::ComparisonResult;
use crate::core::conflict::ConflictItem;
use crate::core::fingerprint::{self, FileRecord};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// 复制方向策略
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectionPolicy {
    /// 两个硬盘互相补齐缺失文件，内容冲突只报告
    PeerSync { root_a: PathBuf, root_b: PathBuf },
    /// 归档是唯一可信来源：缺失和内容不同的文件都从归档复制到硬盘
    ArchiveBackup {
        archive_root: PathBuf,
        drive_root: PathBuf,
        /// 归档在硬盘上的子目录（相对硬盘根目录）
        drive_subdir: String,
    },
}

/// 一个复制操作
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CopyPlanItem {
    pub source_root: PathBuf,
    pub dest_root: PathBuf,
    /// 源位置中的相对路径
    pub relative_path: String,
    /// 目标位置中的相对路径（备份到子目录时带前缀）
    pub dest_relative_path: String,
    pub expected_checksum: String,
    pub size_bytes: u64,
    /// 目标已存在时是否覆盖（只有归档备份的 differing 项为 true）
    pub overwrite: bool,
}

impl CopyPlanItem {
    fn new(
        source_root: &Path,
        dest_root: &Path,
        dest_relative_path: String,
        record: &FileRecord,
        overwrite: bool,
    ) -> Self {
        Self {
            source_root: source_root.to_path_buf(),
            dest_root: dest_root.to_path_buf(),
            relative_path: record.relative_path.clone(),
            dest_relative_path,
            expected_checksum: record.checksum.clone(),
            size_bytes: record.size_bytes,
            overwrite,
        }
    }

    pub fn source_path(&self) -> PathBuf {
        fingerprint::resolve_relative(&self.source_root, &self.relative_path)
    }

    pub fn dest_path(&self) -> PathBuf {
        fingerprint::resolve_relative(&self.dest_root, &self.dest_relative_path)
    }
}

/// 同步计划：复制项 + 需要手动处理的冲突
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncPlan {
    pub items: Vec<CopyPlanItem>,
    pub conflicts: Vec<ConflictItem>,
}

impl SyncPlan {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn total_bytes(&self) -> u64 {
        self.items.iter().map(|i| i.size_bytes).sum()
    }

    /// 每个目标位置需要写入的字节数
    pub fn bytes_per_destination(&self) -> BTreeMap<PathBuf, u64> {
        let mut totals = BTreeMap::new();
        for item in &self.items {
            *totals.entry(item.dest_root.clone()).or_insert(0) += item.size_bytes;
        }
        totals
    }
}

fn join_subdir(subdir: &str, relative_path: &str) -> String {
    let subdir = subdir.trim_matches('/');
    if subdir.is_empty() {
        relative_path.to_string()
    } else {
        format!("{}/{}", subdir, relative_path)
    }
}

/// 根据比较结果和方向策略生成计划
///
/// 结果按 (relative_path, dest_root) 排序，dry-run 与实际执行得到同样的计划。
pub fn plan(comparison: &ComparisonResult, policy: &DirectionPolicy) -> SyncPlan {
    let mut result = SyncPlan::default();

    match policy {
        DirectionPolicy::PeerSync { root_a, root_b } => {
            for record in &comparison.only_in_a {
                result.items.push(CopyPlanItem::new(
                    root_a,
                    root_b,
                    record.relative_path.clone(),
                    record,
                    false,
                ));
            }
            for record in &comparison.only_in_b {
                result.items.push(CopyPlanItem::new(
                    root_b,
                    root_a,
                    record.relative_path.clone(),
                    record,
                    false,
                ));
            }
            // 内容冲突不自动复制到任何一边
            result.conflicts = comparison
                .differing
                .iter()
                .map(|entry| ConflictItem::from_differing(entry, root_a, root_b))
                .collect();
        }
        DirectionPolicy::ArchiveBackup {
            archive_root,
            drive_root,
            drive_subdir,
        } => {
            // A 为归档，B 为硬盘（已对齐到子目录）；硬盘上多出的文件保留不动
            for record in &comparison.only_in_a {
                result.items.push(CopyPlanItem::new(
                    archive_root,
                    drive_root,
                    join_subdir(drive_subdir, &record.relative_path),
                    record,
                    false,
                ));
            }
            for entry in &comparison.differing {
                let record = FileRecord {
                    relative_path: entry.relative_path.clone(),
                    size_bytes: entry.size_a,
                    modified_time: 0,
                    checksum: entry.checksum_a.clone(),
                    last_scanned_time: 0,
                };
                result.items.push(CopyPlanItem::new(
                    archive_root,
                    drive_root,
                    join_subdir(drive_subdir, &entry.relative_path),
                    &record,
                    true,
                ));
            }
        }
    }

    result.items.sort_by(|x, y| {
        x.relative_path
            .cmp(&y.relative_path)
            .then_with(|| x.dest_root.cmp(&y.dest_root))
    });

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::comparator::compare;
    use crate::core::fingerprint::LocationRecordSet;

    fn record(path: &str, size: u64, checksum: &str) -> FileRecord {
        FileRecord {
            relative_path: path.to_string(),
            size_bytes: size,
            modified_time: 0,
            checksum: checksum.to_string(),
            last_scanned_time: 0,
        }
    }

    fn set(records: Vec<FileRecord>) -> LocationRecordSet {
        records.into_iter().collect()
    }

    fn peer() -> DirectionPolicy {
        DirectionPolicy::PeerSync {
            root_a: PathBuf::from("/a"),
            root_b: PathBuf::from("/b"),
        }
    }

    #[test]
    fn test_peer_sync_copies_missing_both_ways() {
        let a = set(vec![record("img1.jpg", 1, "H1"), record("img2.jpg", 2, "H2")]);
        let b = set(vec![record("img1.jpg", 1, "H1"), record("img3.jpg", 3, "H3")]);

        let plan = plan(&compare(&a, &b), &peer());
        assert_eq!(plan.items.len(), 2);

        let first = &plan.items[0];
        assert_eq!(first.relative_path, "img2.jpg");
        assert_eq!(first.source_root, PathBuf::from("/a"));
        assert_eq!(first.dest_root, PathBuf::from("/b"));
        assert_eq!(first.expected_checksum, "H2");
        assert!(!first.overwrite);

        let second = &plan.items[1];
        assert_eq!(second.relative_path, "img3.jpg");
        assert_eq!(second.source_root, PathBuf::from("/b"));
        assert_eq!(second.dest_root, PathBuf::from("/a"));
        assert_eq!(plan.total_bytes(), 5);
        assert!(plan.conflicts.is_empty());
    }

    #[test]
    fn test_peer_sync_never_plans_differing() {
        let a = set(vec![record("x.jpg", 1, "H1")]);
        let b = set(vec![record("x.jpg", 2, "H2")]);

        let plan = plan(&compare(&a, &b), &peer());
        assert!(plan.items.is_empty());
        assert_eq!(plan.conflicts.len(), 1);
        assert_eq!(plan.conflicts[0].relative_path, "x.jpg");
    }

    #[test]
    fn test_archive_backup_overwrites_differing_into_subdir() {
        let archive = set(vec![record("2023/a.jpg", 1, "H1"), record("2023/b.jpg", 2, "H2")]);
        let drive = set(vec![record("2023/b.jpg", 5, "OLD"), record("extra.jpg", 9, "HX")]);

        let policy = DirectionPolicy::ArchiveBackup {
            archive_root: PathBuf::from("/archive"),
            drive_root: PathBuf::from("/drive"),
            drive_subdir: "archive".to_string(),
        };
        let plan = plan(&compare(&archive, &drive), &policy);

        assert_eq!(plan.items.len(), 2);
        assert!(plan.conflicts.is_empty());

        let a = &plan.items[0];
        assert_eq!(a.dest_relative_path, "archive/2023/a.jpg");
        assert!(!a.overwrite);
        assert_eq!(a.dest_path(), PathBuf::from("/drive/archive/2023/a.jpg"));
        assert_eq!(a.source_path(), PathBuf::from("/archive/2023/a.jpg"));

        let b = &plan.items[1];
        assert_eq!(b.relative_path, "2023/b.jpg");
        assert!(b.overwrite);
        assert_eq!(b.expected_checksum, "H2");
        assert_eq!(b.size_bytes, 2);
    }

    #[test]
    fn test_plan_order_is_deterministic() {
        let a = set(vec![
            record("z.jpg", 1, "Z"),
            record("m.jpg", 1, "M"),
            record("a.jpg", 1, "A"),
        ]);
        let b = set(vec![record("k.jpg", 1, "K")]);

        let first = plan(&compare(&a, &b), &peer());
        let second = plan(&compare(&a, &b), &peer());
        assert_eq!(first, second);

        let paths: Vec<_> = first.items.iter().map(|i| i.relative_path.as_str()).collect();
        assert_eq!(paths, vec!["a.jpg", "k.jpg", "m.jpg", "z.jpg"]);
        assert_eq!(first.bytes_per_destination().len(), 2);
    }
}
