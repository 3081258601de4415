use super::{FileMeta, Storage};
use crate::core::fingerprint;
use crate::error::Result;
use async_trait::async_trait;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;

/// 本地文件系统
#[derive(Debug, Clone, Default)]
pub struct LocalStorage;

impl LocalStorage {
    pub fn new() -> Self {
        Self
    }
}

/// 复制文件内容并保留修改时间（阻塞）
fn copy_preserving_mtime(from: &Path, to: &Path) -> io::Result<u64> {
    let mut source = File::open(from)?;
    let modified = source.metadata()?.modified()?;

    // create_new：临时文件名冲突时绝不覆盖
    let mut dest = OpenOptions::new().write(true).create_new(true).open(to)?;
    let bytes = io::copy(&mut source, &mut dest)?;
    dest.set_modified(modified)?;
    dest.sync_all()?;

    Ok(bytes)
}

#[async_trait]
impl Storage for LocalStorage {
    async fn available_space(&self, root: &Path) -> Result<u64> {
        let root = root.to_path_buf();
        let space = tokio::task::spawn_blocking(move || fs2::available_space(&root)).await??;
        Ok(space)
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        Ok(fs::try_exists(path).await?)
    }

    async fn metadata(&self, path: &Path) -> Result<FileMeta> {
        let metadata = fs::metadata(path).await?;
        Ok(FileMeta {
            size: metadata.len(),
            modified_time: fingerprint::modified_nanos(&metadata),
        })
    }

    async fn create_dir_all(&self, path: &Path) -> Result<()> {
        fs::create_dir_all(path).await?;
        Ok(())
    }

    async fn copy_file(&self, from: &Path, to: &Path) -> Result<u64> {
        let (from, to): (PathBuf, PathBuf) = (from.to_path_buf(), to.to_path_buf());
        let bytes = tokio::task::spawn_blocking(move || copy_preserving_mtime(&from, &to)).await??;
        Ok(bytes)
    }

    async fn hash_file(&self, path: &Path) -> Result<String> {
        let path = path.to_path_buf();
        let checksum = tokio::task::spawn_blocking(move || fingerprint::hash_file(&path)).await??;
        Ok(checksum)
    }

    async fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        fs::rename(from, to).await?;
        Ok(())
    }

    async fn remove_file(&self, path: &Path) -> Result<()> {
        match fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn name(&self) -> &str {
        "local"
    }
}
