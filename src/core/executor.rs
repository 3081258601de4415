//! 复制执行器 - 空间预检、临时文件复制、校验、原子提交

use crate::core::fingerprint::FileRecord;
use crate::core::planner::CopyPlanItem;
use crate::core::store::FingerprintStore;
use crate::db::{TEMP_PREFIX, TEMP_SUFFIX};
use crate::error::{Error, Result};
use crate::storage::Storage;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 单个复制项的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CopyStatus {
    Copied,
    /// 目标已存在，未覆盖
    SkippedExists,
    /// 复制后的内容与预期 checksum 不符，临时文件已删除
    VerificationFailed,
    IoError,
    /// 预检发现目标空间不足，整批未执行
    SpaceInsufficient,
    /// 取消后未执行
    Cancelled,
    /// dry-run：会被复制
    WouldCopy,
}

impl CopyStatus {
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            CopyStatus::VerificationFailed | CopyStatus::IoError | CopyStatus::SpaceInsufficient
        )
    }
}

impl std::fmt::Display for CopyStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CopyStatus::Copied => "copied",
            CopyStatus::SkippedExists => "skipped_exists",
            CopyStatus::VerificationFailed => "verification_failed",
            CopyStatus::IoError => "io_error",
            CopyStatus::SpaceInsufficient => "space_insufficient",
            CopyStatus::Cancelled => "cancelled",
            CopyStatus::WouldCopy => "would_copy",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CopyOutcome {
    pub item: CopyPlanItem,
    pub status: CopyStatus,
    pub bytes_copied: u64,
    /// io_error / verification_failed / space_insufficient 的原因；
    /// copied 时表示文件已提交但目标指纹库未能更新
    pub error: Option<String>,
}

impl CopyOutcome {
    fn new(item: CopyPlanItem, status: CopyStatus) -> Self {
        Self {
            item,
            status,
            bytes_copied: 0,
            error: None,
        }
    }

    fn failed(item: CopyPlanItem, status: CopyStatus, error: String) -> Self {
        Self {
            item,
            status,
            bytes_copied: 0,
            error: Some(error),
        }
    }
}

/// 临时文件路径：与目标同目录（同一文件系统），以保留前缀命名，扫描时会被跳过
fn temp_path_for(dest: &Path) -> PathBuf {
    let name = format!("{}{}{}", TEMP_PREFIX, uuid::Uuid::new_v4(), TEMP_SUFFIX);
    match dest.parent() {
        Some(parent) => parent.join(name),
        None => PathBuf::from(name),
    }
}

/// 复制执行器
pub struct CopyExecutor {
    storage: Arc<dyn Storage>,
    workers: usize,
}

impl CopyExecutor {
    pub fn new(storage: Arc<dyn Storage>, workers: usize) -> Self {
        Self {
            storage,
            workers: workers.max(1),
        }
    }

    /// 检查每个目标位置的可用空间是否足够写入计划中的字节数
    pub async fn preflight(&self, items: &[CopyPlanItem]) -> Result<()> {
        let mut required: BTreeMap<&Path, u64> = BTreeMap::new();
        for item in items {
            *required.entry(item.dest_root.as_path()).or_insert(0) += item.size_bytes;
        }

        for (root, required) in required {
            let available = self.storage.available_space(root).await?;
            debug!("空间预检 {:?}: 需要 {} 字节, 可用 {} 字节", root, required, available);
            if required > available {
                return Err(Error::SpaceInsufficient {
                    root: root.to_path_buf(),
                    required,
                    available,
                });
            }
        }
        Ok(())
    }

    /// 执行计划
    ///
    /// 结果与 `items` 顺序一致。单个文件的失败只记录在结果中；
    /// 复制成功的文件在结束后写入 `stores` 中根目录匹配的指纹库，
    /// 指纹库保存失败不影响已完成的复制结果。
    pub async fn execute(
        &self,
        items: &[CopyPlanItem],
        stores: &mut [&mut FingerprintStore],
        cancel: &CancellationToken,
        dry_run: bool,
    ) -> Result<Vec<CopyOutcome>> {
        if items.is_empty() {
            return Ok(Vec::new());
        }

        if dry_run {
            for item in items {
                info!("[dry-run] {:?} -> {:?}", item.source_path(), item.dest_path());
            }
            return Ok(items
                .iter()
                .cloned()
                .map(|item| CopyOutcome::new(item, CopyStatus::WouldCopy))
                .collect());
        }

        if let Err(e) = self.preflight(items).await {
            error!("空间预检失败，本批次不执行: {}", e);
            let status = match e {
                Error::SpaceInsufficient { .. } => CopyStatus::SpaceInsufficient,
                _ => CopyStatus::IoError,
            };
            let message = e.to_string();
            return Ok(items
                .iter()
                .cloned()
                .map(|item| CopyOutcome::failed(item, status, message.clone()))
                .collect());
        }

        info!(
            "开始复制 {} 个文件 (存储: {}, 并发: {})",
            items.len(),
            self.storage.name(),
            self.workers
        );

        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut handles = Vec::with_capacity(items.len());
        let mut outcomes: Vec<Option<CopyOutcome>> = vec![None; items.len()];

        for (index, item) in items.iter().enumerate() {
            // 在文件之间检查取消，不会中断正在复制的文件
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) if !cancel.is_cancelled() => permit,
                _ => {
                    outcomes[index] = Some(CopyOutcome::new(item.clone(), CopyStatus::Cancelled));
                    continue;
                }
            };

            let storage = self.storage.clone();
            let item = item.clone();
            handles.push((
                index,
                tokio::spawn(async move {
                    let outcome = copy_item(storage.as_ref(), item).await;
                    drop(permit);
                    outcome
                }),
            ));
        }

        for (index, handle) in handles {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    let e = Error::Task(e);
                    error!("复制任务异常退出 {}: {}", items[index].relative_path, e);
                    CopyOutcome::failed(items[index].clone(), CopyStatus::IoError, e.to_string())
                }
            };
            outcomes[index] = Some(outcome);
        }

        let mut outcomes: Vec<CopyOutcome> = outcomes.into_iter().flatten().collect();
        self.record_copied(&mut outcomes, stores).await;

        Ok(outcomes)
    }

    /// 把复制成功的文件写入目标位置的指纹库，每个库保存一次
    ///
    /// 某个库保存失败时记录在对应的结果上，其余库照常保存。
    async fn record_copied(
        &self,
        outcomes: &mut [CopyOutcome],
        stores: &mut [&mut FingerprintStore],
    ) {
        let now = chrono::Utc::now().timestamp();
        let mut by_root: HashMap<PathBuf, Vec<FileRecord>> = HashMap::new();

        for outcome in outcomes.iter().filter(|o| o.status == CopyStatus::Copied) {
            let item = &outcome.item;
            let meta = match self.storage.metadata(&item.dest_path()).await {
                Ok(meta) => meta,
                Err(e) => {
                    // 下次扫描会重新计算
                    warn!("无法读取已复制文件的元数据 {:?}: {}", item.dest_path(), e);
                    continue;
                }
            };
            by_root
                .entry(item.dest_root.clone())
                .or_default()
                .push(FileRecord {
                    relative_path: item.dest_relative_path.clone(),
                    size_bytes: meta.size,
                    modified_time: meta.modified_time,
                    checksum: item.expected_checksum.clone(),
                    last_scanned_time: now,
                });
        }

        for (root, records) in by_root {
            let Some(store) = stores.iter_mut().find(|store| store.root() == root.as_path()) else {
                debug!("没有打开 {:?} 的指纹库，跳过记录更新", root);
                continue;
            };
            store.upsert_batch(records);
            if let Err(e) = store.save().await {
                // 文件已经提交，下次扫描会重新计算
                error!("指纹库保存失败 {:?}: {}", root, e);
                let message = format!("指纹库未更新: {}", e);
                for outcome in outcomes
                    .iter_mut()
                    .filter(|o| o.status == CopyStatus::Copied && o.item.dest_root == root)
                {
                    outcome.error = Some(message.clone());
                }
            }
        }
    }
}

/// 复制单个文件，失败转为结果中的状态
async fn copy_item(storage: &dyn Storage, item: CopyPlanItem) -> CopyOutcome {
    match try_copy_item(storage, &item).await {
        Ok((CopyStatus::Copied, bytes)) => {
            debug!("已复制: {} -> {:?}", item.relative_path, item.dest_root);
            CopyOutcome {
                item,
                status: CopyStatus::Copied,
                bytes_copied: bytes,
                error: None,
            }
        }
        Ok((status, _)) => {
            debug!("跳过 {}: {}", item.dest_relative_path, status);
            CopyOutcome::new(item, status)
        }
        Err(e @ Error::VerificationFailed { .. }) => {
            warn!("{}", e);
            CopyOutcome::failed(item, CopyStatus::VerificationFailed, e.to_string())
        }
        Err(e) => {
            warn!("复制失败 {}: {}", item.relative_path, e);
            CopyOutcome::failed(item, CopyStatus::IoError, e.to_string())
        }
    }
}

async fn try_copy_item(storage: &dyn Storage, item: &CopyPlanItem) -> Result<(CopyStatus, u64)> {
    let source = item.source_path();
    let dest = item.dest_path();

    if !item.overwrite && storage.exists(&dest).await? {
        return Ok((CopyStatus::SkippedExists, 0));
    }

    if let Some(parent) = dest.parent() {
        storage.create_dir_all(parent).await?;
    }

    let temp = temp_path_for(&dest);
    // 除成功提交外的所有路径（包括 future 被丢弃）都删除临时文件
    let temp_guard = scopeguard::guard(temp, |temp| {
        let _ = std::fs::remove_file(&temp);
    });

    let bytes = storage.copy_file(&source, &temp_guard).await?;

    let actual = storage.hash_file(&temp_guard).await?;
    if actual != item.expected_checksum {
        storage.remove_file(&temp_guard).await?;
        return Err(Error::VerificationFailed {
            path: item.dest_relative_path.clone(),
            expected: item.expected_checksum.clone(),
            actual,
        });
    }

    // 复制期间目标可能被其他程序创建
    if !item.overwrite && storage.exists(&dest).await? {
        return Ok((CopyStatus::SkippedExists, 0));
    }

    storage.rename(&temp_guard, &dest).await?;
    scopeguard::ScopeGuard::into_inner(temp_guard);

    Ok((CopyStatus::Copied, bytes))
}
