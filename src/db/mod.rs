pub mod models;
pub use models::*;

use crate::error::{Error, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

pub use sqlx::SqlitePool;

/// 指纹库文件名（保存在位置根目录下）
pub const STORE_FILE_NAME: &str = ".photosync.sqlite";

/// 保留名前缀：指纹库、它的日志（journal）和复制中的临时文件都以此开头，扫描时跳过
pub const RESERVED_PREFIX: &str = ".photosync";

/// 复制中临时文件的前缀与后缀
pub const TEMP_PREFIX: &str = ".photosync-tmp-";
pub const TEMP_SUFFIX: &str = ".part";

/// 当前 schema 版本（保存在 PRAGMA user_version）
pub const SCHEMA_VERSION: i64 = 1;

const CREATE_FILE_RECORDS: &str = r#"
CREATE TABLE file_records (
    relative_path     TEXT    PRIMARY KEY NOT NULL,
    size_bytes        INTEGER NOT NULL,
    modified_time     INTEGER NOT NULL,
    checksum          TEXT    NOT NULL,
    last_scanned_time INTEGER NOT NULL
) WITHOUT ROWID
"#;

/// 判断文件名是否属于引擎自己的元数据
pub fn is_reserved_name(name: &str) -> bool {
    name.starts_with(RESERVED_PREFIX)
}

/// 是否是复制中断后残留的临时文件
pub fn is_temp_name(name: &str) -> bool {
    name.starts_with(TEMP_PREFIX) && name.ends_with(TEMP_SUFFIX)
}

/// SQLITE_CORRUPT (11) / SQLITE_NOTADB (26)
fn is_corruption(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err
            .code()
            .and_then(|code| code.parse::<i64>().ok())
            .map(|code| matches!(code & 0xff, 11 | 26))
            .unwrap_or(false),
        _ => false,
    }
}

fn map_open_error(path: &Path, err: sqlx::Error) -> Error {
    if is_corruption(&err) {
        Error::StoreCorrupt {
            path: path.to_path_buf(),
            reason: err.to_string(),
        }
    } else {
        Error::Database(err)
    }
}

/// 打开（必要时创建）位置的指纹库并检查 schema 版本
///
/// 每个位置只使用一个连接，所有写入都经过同一个写者。
pub async fn open_store_db(db_path: &Path) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Delete)
        .synchronous(SqliteSynchronous::Full);

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .acquire_timeout(Duration::from_secs(30))
        .connect_with(options)
        .await
        .map_err(|e| map_open_error(db_path, e))?;

    if let Err(e) = ensure_schema(&pool, db_path).await {
        pool.close().await;
        return Err(e);
    }

    Ok(pool)
}

async fn ensure_schema(pool: &SqlitePool, db_path: &Path) -> Result<()> {
    let version: i64 = sqlx::query_scalar("PRAGMA user_version")
        .fetch_one(pool)
        .await
        .map_err(|e| map_open_error(db_path, e))?;

    let table_count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'")
            .fetch_one(pool)
            .await
            .map_err(|e| map_open_error(db_path, e))?;

    if version == SCHEMA_VERSION {
        debug!("指纹库版本 {}: {:?}", version, db_path);
        return Ok(());
    }

    // 全新的数据库：建表并写入版本号
    if version == 0 && table_count == 0 {
        let mut tx = pool.begin().await?;
        sqlx::query(CREATE_FILE_RECORDS).execute(&mut *tx).await?;
        sqlx::query(&format!("PRAGMA user_version = {}", SCHEMA_VERSION))
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        info!("已创建指纹库: {:?}", db_path);
        return Ok(());
    }

    // 旧的无版本库或未来版本，不能猜测其格式
    Err(Error::StoreIncompatible {
        path: db_path.to_path_buf(),
        found: version,
        expected: SCHEMA_VERSION,
    })
}
