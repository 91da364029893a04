pub mod comparator;
pub mod engine;
pub mod scheduler;
pub mod sync_log;

pub use comparator::{
    CompareConfig, CompareMode, DiffResult, FileComparator, FileRelation, SyncAction,
};
pub use engine::{roots_overlap, EntryError, EntryOp, PassStatus, SyncEngine, SyncReport};
pub use scheduler::Scheduler;
pub use sync_log::{ensure_log_file, LogEntry, SyncLog, SyncLogOptions, LOG_HEADER};
