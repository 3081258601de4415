use crate::core::fingerprint::FileRecord;

/// file_records 表的数据库行
#[derive(Debug, sqlx::FromRow)]
pub struct FileRecordRow {
    pub relative_path: String,
    pub size_bytes: i64,
    pub modified_time: i64,
    pub checksum: String,
    pub last_scanned_time: i64,
}

impl TryFrom<FileRecordRow> for FileRecord {
    type Error = String;

    fn try_from(row: FileRecordRow) -> Result<Self, Self::Error> {
        let size_bytes = u64::try_from(row.size_bytes)
            .map_err(|_| format!("{}: 非法的文件大小 {}", row.relative_path, row.size_bytes))?;

        if row.checksum.is_empty() {
            return Err(format!("{}: 缺少 checksum", row.relative_path));
        }

        Ok(FileRecord {
            relative_path: row.relative_path,
            size_bytes,
            modified_time: row.modified_time,
            checksum: row.checksum,
            last_scanned_time: row.last_scanned_time,
        })
    }
}
