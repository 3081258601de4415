//! 内容指纹与文件记录

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{File, Metadata};
use std::io::{self, Read};
use std::path::{Component, Path};
use std::time::SystemTime;

/// 哈希读取块大小
const HASH_BLOCK_SIZE: usize = 64 * 1024;

/// 单个文件的指纹记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// 相对位置根目录的路径（统一使用 /）
    pub relative_path: String,
    pub size_bytes: u64,
    /// 修改时间（Unix 纳秒）
    pub modified_time: i64,
    /// BLAKE3 十六进制摘要
    pub checksum: String,
    /// 最近一次扫描时间（Unix 秒）
    pub last_scanned_time: i64,
}

impl FileRecord {
    /// 大小和修改时间都未变化时可以复用旧的 checksum
    pub fn matches_metadata(&self, size_bytes: u64, modified_time: i64) -> bool {
        self.size_bytes == size_bytes && self.modified_time == modified_time
    }
}

/// 一个位置（硬盘或本地归档）的文件清单，每个相对路径最多一条记录
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocationRecordSet {
    records: HashMap<String, FileRecord>,
}

impl LocationRecordSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            records: HashMap::with_capacity(capacity),
        }
    }

    /// 插入或替换记录，返回被替换的旧记录
    pub fn upsert(&mut self, record: FileRecord) -> Option<FileRecord> {
        self.records.insert(record.relative_path.clone(), record)
    }

    pub fn remove(&mut self, relative_path: &str) -> Option<FileRecord> {
        self.records.remove(relative_path)
    }

    pub fn get(&self, relative_path: &str) -> Option<&FileRecord> {
        self.records.get(relative_path)
    }

    pub fn contains(&self, relative_path: &str) -> bool {
        self.records.contains_key(relative_path)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FileRecord> {
        self.records.values()
    }

    pub fn paths(&self) -> impl Iterator<Item = &String> {
        self.records.keys()
    }

    pub fn total_bytes(&self) -> u64 {
        self.records.values().map(|r| r.size_bytes).sum()
    }

    /// 按路径排序的记录列表
    pub fn sorted(&self) -> Vec<&FileRecord> {
        let mut records: Vec<_> = self.records.values().collect();
        records.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
        records
    }

    /// 取出 `prefix` 目录下的记录，并去掉前缀
    ///
    /// 备份时硬盘上的归档放在子目录中，比较前需要把清单对齐到归档根目录。
    pub fn rebased(&self, prefix: &str) -> LocationRecordSet {
        let prefix = prefix.trim_matches('/');
        if prefix.is_empty() {
            return self.clone();
        }
        let dir = format!("{}/", prefix);

        self.records
            .values()
            .filter_map(|record| {
                let stripped = record.relative_path.strip_prefix(&dir)?;
                if stripped.is_empty() {
                    return None;
                }
                Some(FileRecord {
                    relative_path: stripped.to_string(),
                    ..record.clone()
                })
            })
            .collect()
    }

    pub fn into_records(self) -> Vec<FileRecord> {
        self.records.into_values().collect()
    }
}

impl FromIterator<FileRecord> for LocationRecordSet {
    fn from_iter<T: IntoIterator<Item = FileRecord>>(iter: T) -> Self {
        let mut set = LocationRecordSet::new();
        for record in iter {
            set.upsert(record);
        }
        set
    }
}

/// 读取完整文件内容计算 BLAKE3 指纹（256 位，十六进制）
pub fn hash_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    hash_reader(&mut file)
}

pub fn hash_reader<R: Read>(reader: &mut R) -> io::Result<String> {
    let mut hasher = blake3::Hasher::new();
    let mut buffer = vec![0u8; HASH_BLOCK_SIZE];

    loop {
        let n = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&buffer[..n]);
    }

    Ok(hasher.finalize().to_hex().to_string())
}

pub fn hash_bytes(data: &[u8]) -> String {
    blake3::hash(data).to_hex().to_string()
}

/// 文件修改时间（Unix 纳秒），无法获取时为 0
pub fn modified_nanos(metadata: &Metadata) -> i64 {
    metadata
        .modified()
        .map(system_time_nanos)
        .unwrap_or_default()
}

pub fn system_time_nanos(time: SystemTime) -> i64 {
    DateTime::<Utc>::from(time)
        .timestamp_nanos_opt()
        .unwrap_or_default()
}

/// 把相对路径规范化为 `/` 分隔的字符串
///
/// 含有 `..`、根目录或非 UTF-8 组件的路径返回 `None`。
pub fn normalize_relative(path: &Path) -> Option<String> {
    let mut parts = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_str()?),
            Component::CurDir => {}
            _ => return None,
        }
    }
    if parts.is_empty() {
        return None;
    }
    Some(parts.join("/"))
}

/// 把 `/` 分隔的相对路径拼接到根目录下
pub fn resolve_relative(root: &Path, relative_path: &str) -> std::path::PathBuf {
    relative_path
        .split('/')
        .filter(|part| !part.is_empty())
        .fold(root.to_path_buf(), |acc, part| acc.join(part))
}
