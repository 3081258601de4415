use crate::core::comparator::DifferingEntry;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// 需要手动处理的冲突：两个硬盘上同一路径的内容不同
///
/// 点对点同步从不自动选择任何一边，只报告。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictItem {
    pub relative_path: String,
    pub root_a: PathBuf,
    pub root_b: PathBuf,
    pub size_a: u64,
    pub checksum_a: String,
    pub size_b: u64,
    pub checksum_b: String,
}

impl ConflictItem {
    pub fn from_differing(entry: &DifferingEntry, root_a: &Path, root_b: &Path) -> Self {
        Self {
            relative_path: entry.relative_path.clone(),
            root_a: root_a.to_path_buf(),
            root_b: root_b.to_path_buf(),
            size_a: entry.size_a,
            checksum_a: entry.checksum_a.clone(),
            size_b: entry.size_b,
            checksum_b: entry.checksum_b.clone(),
        }
    }

    /// checksum 前 16 位，用于日志
    pub fn short_checksums(&self) -> (&str, &str) {
        (short(&self.checksum_a), short(&self.checksum_b))
    }
}

fn short(checksum: &str) -> &str {
    checksum.get(..16).unwrap_or(checksum)
}
