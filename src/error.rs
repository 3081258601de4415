//! 引擎错误类型

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    /// 指纹库无法读取（文件损坏或不是 SQLite 数据库）
    #[error("指纹库已损坏: {path:?}: {reason}")]
    StoreCorrupt { path: PathBuf, reason: String },

    /// 指纹库 schema 版本不兼容
    #[error("指纹库版本不兼容: {path:?} (版本 {found}, 需要 {expected})")]
    StoreIncompatible {
        path: PathBuf,
        found: i64,
        expected: i64,
    },

    #[error("空间不足: {root:?} 需要 {required} 字节, 可用 {available} 字节")]
    SpaceInsufficient {
        root: PathBuf,
        required: u64,
        available: u64,
    },

    #[error("操作已取消")]
    Cancelled,

    #[error("位置不存在或不是目录: {0:?}")]
    LocationNotFound(PathBuf),

    #[error("两个位置是同一路径: {0:?}")]
    SameLocation(PathBuf),

    #[error("后台任务失败: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("无法读取文件 {path}: {source}")]
    ScanRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("校验失败 {path}: 期望 {expected}, 实际 {actual}")]
    VerificationFailed {
        path: String,
        expected: String,
        actual: String,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
