use crate::core::fingerprint::{FileRecord, LocationRecordSet};
use serde::Serialize;

/// 同一路径、内容不同的文件
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DifferingEntry {
    pub relative_path: String,
    pub size_a: u64,
    pub checksum_a: String,
    pub size_b: u64,
    pub checksum_b: String,
}

impl DifferingEntry {
    fn new(a: &FileRecord, b: &FileRecord) -> Self {
        Self {
            relative_path: a.relative_path.clone(),
            size_a: a.size_bytes,
            checksum_a: a.checksum.clone(),
            size_b: b.size_bytes,
            checksum_b: b.checksum.clone(),
        }
    }
}

/// 两个清单的比较结果
///
/// 四个分区互不相交，A∪B 中的每个路径恰好出现在其中一个分区里；各分区按路径排序。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonResult {
    pub only_in_a: Vec<FileRecord>,
    pub only_in_b: Vec<FileRecord>,
    pub differing: Vec<DifferingEntry>,
    pub identical: Vec<String>,
}

impl ComparisonResult {
    /// 两边完全一致
    pub fn is_synchronized(&self) -> bool {
        self.only_in_a.is_empty() && self.only_in_b.is_empty() && self.differing.is_empty()
    }

    pub fn total_paths(&self) -> usize {
        self.only_in_a.len() + self.only_in_b.len() + self.differing.len() + self.identical.len()
    }

    pub fn only_in_a_bytes(&self) -> u64 {
        self.only_in_a.iter().map(|r| r.size_bytes).sum()
    }

    pub fn only_in_b_bytes(&self) -> u64 {
        self.only_in_b.iter().map(|r| r.size_bytes).sum()
    }
}

/// 比较两个清单（纯函数，无 I/O）
///
/// 路径精确匹配（区分大小写）。checksum 相同为 identical，否则为 differing；
/// 大小不同必然 checksum 不同，不单独分类。基于哈希表，复杂度 O(|A|+|B|)。
pub fn compare(set_a: &LocationRecordSet, set_b: &LocationRecordSet) -> ComparisonResult {
    let mut result = ComparisonResult::default();

    for a in set_a.iter() {
        match set_b.get(&a.relative_path) {
            Some(b) if b.checksum == a.checksum => {
                result.identical.push(a.relative_path.clone());
            }
            Some(b) => {
                tracing::debug!(
                    "内容不同: {} (a={}, b={})",
                    a.relative_path,
                    a.size_bytes,
                    b.size_bytes
                );
                result.differing.push(DifferingEntry::new(a, b));
            }
            None => result.only_in_a.push(a.clone()),
        }
    }

    for b in set_b.iter() {
        if !set_a.contains(&b.relative_path) {
            result.only_in_b.push(b.clone());
        }
    }

    // 按路径排序，确保输出一致
    result
        .only_in_a
        .sort_by(|x, y| x.relative_path.cmp(&y.relative_path));
    result
        .only_in_b
        .sort_by(|x, y| x.relative_path.cmp(&y.relative_path));
    result
        .differing
        .sort_by(|x, y| x.relative_path.cmp(&y.relative_path));
    result.identical.sort();

    result
}
