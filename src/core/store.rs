//! 指纹库 - 每个位置一份持久化的文件清单

use crate::core::fingerprint::{FileRecord, LocationRecordSet};
use crate::db::{self, FileRecordRow, SqlitePool};
use crate::error::{Error, Result};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// 单个位置的指纹库句柄
///
/// 写入先暂存在内存中，`save` 时在一个事务里提交：要么整批落盘，要么都不落盘。
pub struct FingerprintStore {
    root: PathBuf,
    db_path: PathBuf,
    db: SqlitePool,
    pending_upserts: HashMap<String, FileRecord>,
    pending_deletes: HashSet<String>,
    /// 保存时把所有记录的 last_scanned_time 更新为该值
    pending_touch: Option<i64>,
}

impl FingerprintStore {
    /// 打开位置根目录下的指纹库，不存在时创建
    pub async fn open(root: &Path) -> Result<Self> {
        let db_path = root.join(db::STORE_FILE_NAME);
        let db = db::open_store_db(&db_path).await?;

        Ok(Self {
            root: root.to_path_buf(),
            db_path,
            db,
            pending_upserts: HashMap::new(),
            pending_deletes: HashSet::new(),
            pending_touch: None,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// 读取已提交的全部记录（不含暂存的修改）
    pub async fn load(&self) -> Result<LocationRecordSet> {
        let rows = sqlx::query_as::<_, FileRecordRow>(
            "SELECT relative_path, size_bytes, modified_time, checksum, last_scanned_time FROM file_records",
        )
        .fetch_all(&self.db)
        .await?;

        let mut set = LocationRecordSet::with_capacity(rows.len());
        for row in rows {
            let record = FileRecord::try_from(row).map_err(|reason| Error::StoreCorrupt {
                path: self.db_path.clone(),
                reason,
            })?;
            set.upsert(record);
        }

        debug!("从指纹库加载 {} 条记录: {:?}", set.len(), self.root);
        Ok(set)
    }

    pub async fn record_count(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM file_records")
            .fetch_one(&self.db)
            .await?;
        Ok(count.max(0) as u64)
    }

    /// 暂存一批记录的插入/更新
    pub fn upsert_batch<I>(&mut self, records: I)
    where
        I: IntoIterator<Item = FileRecord>,
    {
        for record in records {
            self.pending_deletes.remove(&record.relative_path);
            self.pending_upserts
                .insert(record.relative_path.clone(), record);
        }
    }

    /// 暂存删除：库中不在 `keep_paths` 里的记录都会被删除
    pub async fn prune(&mut self, keep_paths: &HashSet<String>) -> Result<usize> {
        let stored: Vec<String> = sqlx::query_scalar("SELECT relative_path FROM file_records")
            .fetch_all(&self.db)
            .await?;

        let mut staged = 0;
        for path in stored {
            if !keep_paths.contains(&path) {
                self.pending_upserts.remove(&path);
                self.pending_deletes.insert(path);
                staged += 1;
            }
        }
        self.pending_upserts.retain(|path, _| keep_paths.contains(path));

        if staged > 0 {
            debug!("暂存 {} 条已删除文件的记录清理", staged);
        }
        Ok(staged)
    }

    /// 暂存扫描确认：库中所有记录的 last_scanned_time 更新为 `scanned_at`
    ///
    /// 在 prune 之后调用，剩下的记录都已在本次扫描中确认。
    pub fn touch_all(&mut self, scanned_at: i64) {
        self.pending_touch = Some(scanned_at);
    }

    pub fn pending_changes(&self) -> usize {
        self.pending_upserts.len()
            + self.pending_deletes.len()
            + usize::from(self.pending_touch.is_some())
    }

    /// 在一个事务中提交所有暂存的修改
    ///
    /// 提交失败时暂存内容保留，库中数据保持提交前的状态。
    pub async fn save(&mut self) -> Result<()> {
        if self.pending_changes() == 0 {
            return Ok(());
        }

        let mut tx = self.db.begin().await?;

        for path in &self.pending_deletes {
            sqlx::query("DELETE FROM file_records WHERE relative_path = ?")
                .bind(path)
                .execute(&mut *tx)
                .await?;
        }

        if let Some(scanned_at) = self.pending_touch {
            sqlx::query("UPDATE file_records SET last_scanned_time = ?")
                .bind(scanned_at)
                .execute(&mut *tx)
                .await?;
        }

        for record in self.pending_upserts.values() {
            sqlx::query(
                r#"INSERT INTO file_records (relative_path, size_bytes, modified_time, checksum, last_scanned_time)
                   VALUES (?, ?, ?, ?, ?)
                   ON CONFLICT(relative_path) DO UPDATE SET
                       size_bytes = excluded.size_bytes,
                       modified_time = excluded.modified_time,
                       checksum = excluded.checksum,
                       last_scanned_time = excluded.last_scanned_time"#,
            )
            .bind(&record.relative_path)
            .bind(record.size_bytes as i64)
            .bind(record.modified_time)
            .bind(&record.checksum)
            .bind(record.last_scanned_time)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        info!(
            "指纹库已保存: {} 条更新, {} 条删除 ({:?})",
            self.pending_upserts.len(),
            self.pending_deletes.len(),
            self.root
        );
        self.pending_upserts.clear();
        self.pending_deletes.clear();
        self.pending_touch = None;
        Ok(())
    }

    /// 关闭连接（测试中重新打开同一个库时使用）
    pub async fn close(self) {
        self.db.close().await;
    }
}
