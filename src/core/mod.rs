pub mod comparator;
pub mod conflict;
pub mod engine;
pub mod executor;
pub mod fingerprint;
pub mod planner;
pub mod scanner;
pub mod store;

pub use comparator::{compare, ComparisonResult, DifferingEntry};
pub use conflict::ConflictItem;
pub use engine::{
    BackupReport, CompareReport, DriveBackupReport, SyncEngine, SyncReport, SyncSummary,
};
pub use executor::{CopyExecutor, CopyOutcome, CopyStatus};
pub use fingerprint::{FileRecord, LocationRecordSet};
pub use planner::{plan, CopyPlanItem, DirectionPolicy, SyncPlan};
pub use scanner::{FileScanner, ProgressFn, ScanConfig, ScanProgress, ScanSession, ScanWarning};
pub use store::FingerprintStore;
