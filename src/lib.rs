pub mod commands;
pub mod config;
pub mod core;
pub mod db;
pub mod error;
pub mod logging;
pub mod storage;

pub use config::EngineConfig;
pub use crate::core::{BackupReport, CompareReport, SyncEngine, SyncReport, SyncSummary};
pub use error::{Error, Result};
