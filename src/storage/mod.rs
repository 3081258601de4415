pub mod local;

use crate::error::Result;
use async_trait::async_trait;
use std::path::Path;

pub use local::LocalStorage;

/// 文件元数据（用于更新目标位置的指纹库）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileMeta {
    pub size: u64,
    /// Unix 纳秒
    pub modified_time: i64,
}

/// 复制执行器使用的文件系统接口
///
/// 所有路径都是绝对路径。测试中可以包装本地实现来模拟空间不足或传输损坏。
#[async_trait]
pub trait Storage: Send + Sync {
    /// `root` 所在文件系统的可用字节数
    async fn available_space(&self, root: &Path) -> Result<u64>;

    /// 检查文件是否存在
    async fn exists(&self, path: &Path) -> Result<bool>;

    async fn metadata(&self, path: &Path) -> Result<FileMeta>;

    /// 创建目录
    async fn create_dir_all(&self, path: &Path) -> Result<()>;

    /// 把 `from` 的内容复制到新文件 `to`（`to` 已存在时失败），保留修改时间，返回字节数
    async fn copy_file(&self, from: &Path, to: &Path) -> Result<u64>;

    /// 计算文件内容指纹
    async fn hash_file(&self, path: &Path) -> Result<String>;

    /// 同一文件系统内的原子重命名
    async fn rename(&self, from: &Path, to: &Path) -> Result<()>;

    async fn remove_file(&self, path: &Path) -> Result<()>;

    /// 获取存储名称（用于日志）
    fn name(&self) -> &str;
}
