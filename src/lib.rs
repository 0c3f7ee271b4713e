//! Backup Sync Library
//!
//! Provider transfer backends (S3, CloudFiles, GCS, Dropbox) and a differential
//! directory sync engine built on top of them.

pub mod cloud;
pub mod config;
pub mod managers;
pub mod sync;
pub mod utils;

// Re-export commonly used types
pub use cloud::{CloudError, DeleteTarget, RemoteObject, TransferBackend};
pub use config::{load_config, Config};
pub use managers::logging::{init_console_logging, init_logging, LogGuard, LoggingConfig};
pub use managers::storage::StorageManager;
pub use managers::sync::SyncManager;
pub use sync::{SyncEngine, SyncError, SyncSummary};
