//! 编排器集成测试：扫描 → 比较 → 计划 → 执行

use async_trait::async_trait;
use photosync_lib::core::fingerprint;
use photosync_lib::core::{CopyExecutor, CopyStatus, FileScanner, FingerprintStore, ScanConfig};
use photosync_lib::storage::{FileMeta, LocalStorage, Storage};
use photosync_lib::{EngineConfig, Error, SyncEngine};
use std::fs;
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

/// 复制后翻转第一个字节，模拟传输损坏
struct CorruptingStorage {
    inner: LocalStorage,
}

/// 第一个文件复制完后触发取消
struct CancellingStorage {
    inner: LocalStorage,
    cancel: CancellationToken,
}

/// 报告固定的可用空间
struct FixedSpaceStorage {
    inner: LocalStorage,
    available: u64,
}

#[async_trait]
impl Storage for CorruptingStorage {
    async fn available_space(&self, root: &Path) -> photosync_lib::Result<u64> {
        self.inner.available_space(root).await
    }
    async fn exists(&self, path: &Path) -> photosync_lib::Result<bool> {
        self.inner.exists(path).await
    }
    async fn metadata(&self, path: &Path) -> photosync_lib::Result<FileMeta> {
        self.inner.metadata(path).await
    }
    async fn create_dir_all(&self, path: &Path) -> photosync_lib::Result<()> {
        self.inner.create_dir_all(path).await
    }
    async fn copy_file(&self, from: &Path, to: &Path) -> photosync_lib::Result<u64> {
        let bytes = self.inner.copy_file(from, to).await?;
        let mut file = fs::OpenOptions::new().read(true).write(true).open(to)?;
        let mut first = [0u8; 1];
        std::io::Read::read_exact(&mut file, &mut first)?;
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&[first[0] ^ 0xFF])?;
        Ok(bytes)
    }
    async fn hash_file(&self, path: &Path) -> photosync_lib::Result<String> {
        self.inner.hash_file(path).await
    }
    async fn rename(&self, from: &Path, to: &Path) -> photosync_lib::Result<()> {
        self.inner.rename(from, to).await
    }
    async fn remove_file(&self, path: &Path) -> photosync_lib::Result<()> {
        self.inner.remove_file(path).await
    }
    fn name(&self) -> &str {
        "corrupting"
    }
}

#[async_trait]
impl Storage for CancellingStorage {
    async fn available_space(&self, root: &Path) -> photosync_lib::Result<u64> {
        self.inner.available_space(root).await
    }
    async fn exists(&self, path: &Path) -> photosync_lib::Result<bool> {
        self.inner.exists(path).await
    }
    async fn metadata(&self, path: &Path) -> photosync_lib::Result<FileMeta> {
        self.inner.metadata(path).await
    }
    async fn create_dir_all(&self, path: &Path) -> photosync_lib::Result<()> {
        self.inner.create_dir_all(path).await
    }
    async fn copy_file(&self, from: &Path, to: &Path) -> photosync_lib::Result<u64> {
        let bytes = self.inner.copy_file(from, to).await?;
        self.cancel.cancel();
        Ok(bytes)
    }
    async fn hash_file(&self, path: &Path) -> photosync_lib::Result<String> {
        self.inner.hash_file(path).await
    }
    async fn rename(&self, from: &Path, to: &Path) -> photosync_lib::Result<()> {
        self.inner.rename(from, to).await
    }
    async fn remove_file(&self, path: &Path) -> photosync_lib::Result<()> {
        self.inner.remove_file(path).await
    }
    fn name(&self) -> &str {
        "cancelling"
    }
}

#[async_trait]
impl Storage for FixedSpaceStorage {
    async fn available_space(&self, _root: &Path) -> photosync_lib::Result<u64> {
        Ok(self.available)
    }
    async fn exists(&self, path: &Path) -> photosync_lib::Result<bool> {
        self.inner.exists(path).await
    }
    async fn metadata(&self, path: &Path) -> photosync_lib::Result<FileMeta> {
        self.inner.metadata(path).await
    }
    async fn create_dir_all(&self, path: &Path) -> photosync_lib::Result<()> {
        self.inner.create_dir_all(path).await
    }
    async fn copy_file(&self, from: &Path, to: &Path) -> photosync_lib::Result<u64> {
        self.inner.copy_file(from, to).await
    }
    async fn hash_file(&self, path: &Path) -> photosync_lib::Result<String> {
        self.inner.hash_file(path).await
    }
    async fn rename(&self, from: &Path, to: &Path) -> photosync_lib::Result<()> {
        self.inner.rename(from, to).await
    }
    async fn remove_file(&self, path: &Path) -> photosync_lib::Result<()> {
        self.inner.remove_file(path).await
    }
    fn name(&self) -> &str {
        "fixed-space"
    }
}

fn write(root: &Path, rel: &str, content: &[u8]) {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, content).unwrap();
}

fn config() -> EngineConfig {
    EngineConfig {
        scan_workers: 2,
        checkpoint_interval: 2,
        ..Default::default()
    }
}

fn engine() -> SyncEngine {
    SyncEngine::new(config())
}

fn token() -> CancellationToken {
    CancellationToken::new()
}

/// 目录中残留的临时文件数
fn temp_files(root: &Path) -> usize {
    walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().starts_with(".photosync-tmp"))
        .count()
}

/// A: img1 (H1), img2 (H2); B: img1 (H1), img3 (H3)
fn scenario() -> (TempDir, TempDir) {
    let a = TempDir::new().unwrap();
    let b = TempDir::new().unwrap();
    write(a.path(), "img1.jpg", b"one");
    write(a.path(), "img2.jpg", b"two");
    write(b.path(), "img1.jpg", b"one");
    write(b.path(), "img3.jpg", b"three");
    (a, b)
}

#[tokio::test]
async fn test_compare_scenario() {
    let (a, b) = scenario();
    let report = engine()
        .compare(a.path(), b.path(), false, &token())
        .await
        .unwrap();

    let c = &report.comparison;
    assert_eq!(c.identical, vec!["img1.jpg".to_string()]);
    assert_eq!(c.only_in_a.len(), 1);
    assert_eq!(c.only_in_a[0].relative_path, "img2.jpg");
    assert_eq!(c.only_in_b.len(), 1);
    assert_eq!(c.only_in_b[0].relative_path, "img3.jpg");
    assert!(c.differing.is_empty());

    // compare 不复制任何文件
    assert!(!b.path().join("img2.jpg").exists());
    assert!(!a.path().join("img3.jpg").exists());
}

#[tokio::test]
async fn test_sync_scenario_is_idempotent() {
    let (a, b) = scenario();
    let engine = engine();

    let first = engine
        .sync(a.path(), b.path(), false, false, &token())
        .await
        .unwrap();
    assert_eq!(first.plan.items.len(), 2);
    assert_eq!(first.summary.copied, 2);
    assert_eq!(first.summary.missing_in_a, 1);
    assert_eq!(first.summary.missing_in_b, 1);
    assert_eq!(first.summary.bytes_copied, 8);
    assert!(!first.summary.has_failures());

    for root in [a.path(), b.path()] {
        for (rel, content) in [("img1.jpg", "one"), ("img2.jpg", "two"), ("img3.jpg", "three")] {
            assert_eq!(fs::read_to_string(root.join(rel)).unwrap(), content);
        }
        assert_eq!(temp_files(root), 0);
    }

    let second = engine
        .sync(a.path(), b.path(), false, false, &token())
        .await
        .unwrap();
    assert!(second.plan.items.is_empty());
    assert!(second.comparison.is_synchronized());
    assert_eq!(second.summary.copied, 0);
    // 复制时保留了修改时间，记录直接复用
    assert_eq!(second.scan_a.files_rehashed, 0);
    assert_eq!(second.scan_b.files_rehashed, 0);
}

#[tokio::test]
async fn test_peer_sync_never_overwrites_differing() {
    let a = TempDir::new().unwrap();
    let b = TempDir::new().unwrap();
    write(a.path(), "same.jpg", b"version a");
    write(b.path(), "same.jpg", b"version b, longer");

    let report = engine()
        .sync(a.path(), b.path(), false, false, &token())
        .await
        .unwrap();

    assert!(report.plan.items.is_empty());
    assert_eq!(report.plan.conflicts.len(), 1);
    assert_eq!(report.summary.differing, 1);
    assert_eq!(fs::read(a.path().join("same.jpg")).unwrap(), b"version a");
    assert_eq!(fs::read(b.path().join("same.jpg")).unwrap(), b"version b, longer");
}

#[tokio::test]
async fn test_existing_destination_is_skipped() {
    let (a, b) = scenario();
    let engine = engine();
    let plan = engine
        .sync(a.path(), b.path(), false, true, &token())
        .await
        .unwrap()
        .plan;

    // 计划生成后目标被其他程序写入
    write(b.path(), "img2.jpg", b"written meanwhile");
    let before = fingerprint::hash_file(&b.path().join("img2.jpg")).unwrap();

    let executor = CopyExecutor::new(Arc::new(LocalStorage::new()), 2);
    let outcomes = executor
        .execute(&plan.items, &mut [], &token(), false)
        .await
        .unwrap();

    let skipped = outcomes
        .iter()
        .find(|o| o.item.relative_path == "img2.jpg")
        .unwrap();
    assert_eq!(skipped.status, CopyStatus::SkippedExists);
    assert_eq!(fingerprint::hash_file(&b.path().join("img2.jpg")).unwrap(), before);
}

#[tokio::test]
async fn test_corrupted_copy_fails_verification() {
    let (a, b) = scenario();
    let engine = SyncEngine::with_storage(
        config(),
        Arc::new(CorruptingStorage {
            inner: LocalStorage::new(),
        }),
    );

    let report = engine
        .sync(a.path(), b.path(), false, false, &token())
        .await
        .unwrap();

    assert_eq!(report.outcomes.len(), 2);
    for outcome in &report.outcomes {
        assert_eq!(outcome.status, CopyStatus::VerificationFailed);
        assert!(outcome.error.is_some());
    }
    assert_eq!(report.summary.errors, 2);
    assert!(!b.path().join("img2.jpg").exists());
    assert!(!a.path().join("img3.jpg").exists());
    assert_eq!(temp_files(a.path()) + temp_files(b.path()), 0);

    // 失败的文件不会写入目标的指纹库
    let store = FingerprintStore::open(&b.path().canonicalize().unwrap()).await.unwrap();
    assert!(!store.load().await.unwrap().contains("img2.jpg"));
}

#[tokio::test]
async fn test_insufficient_space_copies_nothing() {
    let (a, b) = scenario();
    let engine = SyncEngine::with_storage(
        config(),
        Arc::new(FixedSpaceStorage {
            inner: LocalStorage::new(),
            available: 2,
        }),
    );

    let report = engine
        .sync(a.path(), b.path(), false, false, &token())
        .await
        .unwrap();

    assert_eq!(report.outcomes.len(), 2);
    assert!(report
        .outcomes
        .iter()
        .all(|o| o.status == CopyStatus::SpaceInsufficient));
    assert_eq!(report.summary.copied, 0);
    assert!(!b.path().join("img2.jpg").exists());
    assert!(!a.path().join("img3.jpg").exists());
}

#[tokio::test]
async fn test_incremental_scan_reuses_unchanged_files() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "2023/a.jpg", b"aaaa");
    write(dir.path(), "2023/b.jpg", b"bbbb");
    write(dir.path(), "c.jpg", b"cccc");

    let scanner = FileScanner::new(ScanConfig::from(&config()));
    let mut store = FingerprintStore::open(dir.path()).await.unwrap();

    let (_, first) = scanner.scan_location(&mut store, false).await.unwrap();
    assert_eq!(first.files_rehashed, 3);

    // 改变大小，修改时间可能不变，大小变化也会触发重新计算
    write(dir.path(), "c.jpg", b"changed content");
    let (set, second) = scanner.scan_location(&mut store, false).await.unwrap();
    assert_eq!(second.files_reused, 2);
    assert_eq!(second.files_rehashed, 1);

    for rel in ["2023/a.jpg", "2023/b.jpg", "c.jpg"] {
        let fresh = fingerprint::hash_file(&dir.path().join(rel)).unwrap();
        assert_eq!(set.get(rel).unwrap().checksum, fresh);
    }

    let (_, forced) = scanner.scan_location(&mut store, true).await.unwrap();
    assert_eq!(forced.files_reused, 0);
    assert_eq!(forced.files_rehashed, 3);
}

#[tokio::test]
async fn test_vanished_files_are_pruned_from_store() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "keep.jpg", b"k");
    write(dir.path(), "gone.jpg", b"g");

    let scanner = FileScanner::new(ScanConfig::from(&config()));
    let mut store = FingerprintStore::open(dir.path()).await.unwrap();
    scanner.scan_location(&mut store, false).await.unwrap();
    assert_eq!(store.record_count().await.unwrap(), 2);

    fs::remove_file(dir.path().join("gone.jpg")).unwrap();
    scanner.scan_location(&mut store, false).await.unwrap();
    let set = store.load().await.unwrap();
    assert_eq!(set.len(), 1);
    assert!(set.contains("keep.jpg"));
}

#[tokio::test]
async fn test_cancelled_sync_copies_nothing() {
    let (a, b) = scenario();
    let cancel = token();
    cancel.cancel();

    let result = engine().sync(a.path(), b.path(), false, false, &cancel).await;
    assert!(matches!(result, Err(Error::Cancelled)));
    assert!(!b.path().join("img2.jpg").exists());
}

#[tokio::test]
async fn test_cancel_mid_batch_keeps_finished_copy() {
    let a = TempDir::new().unwrap();
    let b = TempDir::new().unwrap();
    for name in ["a1.jpg", "a2.jpg", "a3.jpg"] {
        write(a.path(), name, name.as_bytes());
    }
    let plan = engine()
        .sync(a.path(), b.path(), false, true, &token())
        .await
        .unwrap()
        .plan;
    assert_eq!(plan.items.len(), 3);

    let cancel = token();
    let executor = CopyExecutor::new(
        Arc::new(CancellingStorage {
            inner: LocalStorage::new(),
            cancel: cancel.clone(),
        }),
        1,
    );
    let mut store = FingerprintStore::open(&plan.items[0].dest_root).await.unwrap();
    let outcomes = executor
        .execute(&plan.items, &mut [&mut store], &cancel, false)
        .await
        .unwrap();

    let statuses: Vec<CopyStatus> = outcomes.iter().map(|o| o.status).collect();
    assert_eq!(
        statuses,
        vec![CopyStatus::Copied, CopyStatus::Cancelled, CopyStatus::Cancelled]
    );
    assert_eq!(fs::read(b.path().join("a1.jpg")).unwrap(), b"a1.jpg");
    assert!(!b.path().join("a2.jpg").exists());
    assert!(!b.path().join("a3.jpg").exists());
    assert_eq!(temp_files(b.path()), 0);

    let set = store.load().await.unwrap();
    assert!(set.contains("a1.jpg"));
    assert_eq!(set.len(), 1);
}

#[tokio::test]
async fn test_dry_run_reports_without_copying() {
    let (a, b) = scenario();
    let report = engine()
        .sync(a.path(), b.path(), false, true, &token())
        .await
        .unwrap();

    assert!(report.dry_run);
    assert_eq!(report.summary.would_copy, 2);
    assert_eq!(report.summary.copied, 0);
    assert!(report
        .outcomes
        .iter()
        .all(|o| o.status == CopyStatus::WouldCopy));
    assert!(!b.path().join("img2.jpg").exists());
    assert!(!a.path().join("img3.jpg").exists());
}

#[tokio::test]
async fn test_corrupt_store_is_not_reset() {
    let (a, b) = scenario();
    let store_path = b.path().join(".photosync.sqlite");
    fs::write(&store_path, vec![0x5A; 2048]).unwrap();

    let result = engine().sync(a.path(), b.path(), false, false, &token()).await;
    assert!(matches!(result, Err(Error::StoreCorrupt { .. })));
    assert_eq!(fs::read(&store_path).unwrap(), vec![0x5A; 2048]);
    assert!(!b.path().join("img2.jpg").exists());
}

#[tokio::test]
async fn test_missing_location_is_reported() {
    let a = TempDir::new().unwrap();
    let result = engine()
        .compare(a.path(), &a.path().join("missing"), false, &token())
        .await;
    assert!(matches!(result, Err(Error::LocationNotFound(_))));
}

#[tokio::test]
async fn test_backup_uses_archive_as_source_of_truth() {
    let archive = TempDir::new().unwrap();
    let drive = TempDir::new().unwrap();
    write(archive.path(), "2023/a.jpg", b"archive a");
    write(archive.path(), "2023/b.jpg", b"archive b");
    write(drive.path(), "archive/2023/b.jpg", b"stale b");
    write(drive.path(), "archive/only-on-drive.jpg", b"extra");
    write(drive.path(), "other/unrelated.jpg", b"unrelated");

    let engine = engine();
    let drives: Vec<PathBuf> = vec![drive.path().to_path_buf()];
    let report = engine
        .backup(archive.path(), &drives, false, false, &token())
        .await
        .unwrap();

    assert_eq!(report.drives.len(), 1);
    let result = &report.drives[0];
    assert!(result.error.is_none());
    assert_eq!(result.drive_subdir.as_deref(), Some("archive"));
    assert_eq!(result.summary.copied, 2);
    assert_eq!(result.summary.differing, 1);

    assert_eq!(
        fs::read(drive.path().join("archive/2023/a.jpg")).unwrap(),
        b"archive a"
    );
    assert_eq!(
        fs::read(drive.path().join("archive/2023/b.jpg")).unwrap(),
        b"archive b"
    );
    // 硬盘上多出的文件和子目录外的文件保持不变
    assert_eq!(
        fs::read(drive.path().join("archive/only-on-drive.jpg")).unwrap(),
        b"extra"
    );
    assert_eq!(
        fs::read(drive.path().join("other/unrelated.jpg")).unwrap(),
        b"unrelated"
    );
    assert!(!archive.path().join("only-on-drive.jpg").exists());

    let again = engine
        .backup(archive.path(), &drives, false, false, &token())
        .await
        .unwrap();
    assert!(again.drives[0].outcomes.is_empty());
    assert_eq!(again.drives[0].summary.differing, 0);
}

#[tokio::test]
async fn test_backup_creates_default_subdir_and_reports_missing_drive() {
    let archive = TempDir::new().unwrap();
    let drive = TempDir::new().unwrap();
    write(archive.path(), "a.jpg", b"a");

    let missing = drive.path().join("not-mounted");
    let drives = vec![missing.clone(), drive.path().to_path_buf()];
    let report = engine()
        .backup(archive.path(), &drives, false, false, &token())
        .await
        .unwrap();

    assert_eq!(report.drives.len(), 2);
    assert!(report.drives[0].error.is_some());
    assert_eq!(report.drives[0].drive_root, missing);
    assert!(report.has_failures());

    assert!(report.drives[1].error.is_none());
    assert_eq!(report.drives[1].summary.copied, 1);
    assert_eq!(fs::read(drive.path().join("archive/a.jpg")).unwrap(), b"a");
}

#[tokio::test]
async fn test_backup_into_existing_photos_dir() {
    let archive = TempDir::new().unwrap();
    let drive = TempDir::new().unwrap();
    write(archive.path(), "a.jpg", b"a");
    fs::create_dir(drive.path().join("photos")).unwrap();

    let drives = vec![drive.path().to_path_buf()];
    let report = engine()
        .backup(archive.path(), &drives, false, false, &token())
        .await
        .unwrap();

    assert_eq!(report.drives[0].drive_subdir.as_deref(), Some("photos"));
    assert!(drive.path().join("photos/a.jpg").exists());
    assert!(!drive.path().join("archive").exists());
}
