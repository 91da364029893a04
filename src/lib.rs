pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod storage;

pub use config::{validate_interval, AppConfig};
pub use core::{Scheduler, SyncEngine, SyncLog, SyncReport};
pub use error::SyncError;
pub use storage::{LocalStorage, Storage};
